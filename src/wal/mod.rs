mod log_manager;
mod log_record;
pub mod recovery;

pub use log_manager::{LogManager, LogScan};
pub use log_record::{LogRecord, LogRecordType, FRAME_OVERHEAD};
pub use recovery::RecoveryReport;
