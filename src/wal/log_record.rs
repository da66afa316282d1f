//! Log record format.
//!
//! Frame: `[length: u32 LE] [payload] [crc32(payload): u32 LE]`
//!
//! Payload: `lsn u64 | txn_id u64 | type u8 | key i64 | old image | new image`,
//! where an image is a presence flag (`u8`) optionally followed by
//! `len u32 | bytes`. All integers are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::common::{ArborError, Key, Lsn, Result, TxnId, INVALID_LSN};

/// Length prefix plus trailing checksum
pub const FRAME_OVERHEAD: usize = 8;

/// lsn + txn_id + type + key + two image flags
const FIXED_PAYLOAD_SIZE: usize = 8 + 8 + 1 + 8 + 1 + 1;

/// Log record types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogRecordType {
    Insert = 1,
    Delete = 2,
    Update = 3,
    Commit = 4,
    Checkpoint = 5,
}

impl TryFrom<u8> for LogRecordType {
    type Error = ArborError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(LogRecordType::Insert),
            2 => Ok(LogRecordType::Delete),
            3 => Ok(LogRecordType::Update),
            4 => Ok(LogRecordType::Commit),
            5 => Ok(LogRecordType::Checkpoint),
            other => Err(ArborError::CorruptPage(format!(
                "unknown log record type {}",
                other
            ))),
        }
    }
}

/// A single entry of the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Assigned by the log manager on append
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub record_type: LogRecordType,
    pub key: Key,
    /// Undo image
    pub old_value: Option<Vec<u8>>,
    /// Redo image
    pub new_value: Option<Vec<u8>>,
}

impl LogRecord {
    fn new(
        txn_id: TxnId,
        record_type: LogRecordType,
        key: Key,
        old_value: Option<Vec<u8>>,
        new_value: Option<Vec<u8>>,
    ) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            record_type,
            key,
            old_value,
            new_value,
        }
    }

    pub fn insert(txn_id: TxnId, key: Key, value: Vec<u8>) -> Self {
        Self::new(txn_id, LogRecordType::Insert, key, None, Some(value))
    }

    pub fn update(txn_id: TxnId, key: Key, old_value: Vec<u8>, new_value: Vec<u8>) -> Self {
        Self::new(
            txn_id,
            LogRecordType::Update,
            key,
            Some(old_value),
            Some(new_value),
        )
    }

    pub fn delete(txn_id: TxnId, key: Key, old_value: Vec<u8>) -> Self {
        Self::new(txn_id, LogRecordType::Delete, key, Some(old_value), None)
    }

    pub fn commit(txn_id: TxnId) -> Self {
        Self::new(txn_id, LogRecordType::Commit, 0, None, None)
    }

    pub fn checkpoint(txn_id: TxnId) -> Self {
        Self::new(txn_id, LogRecordType::Checkpoint, 0, None, None)
    }

    /// Whether the record changes tree contents.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.record_type,
            LogRecordType::Insert | LogRecordType::Update | LogRecordType::Delete
        )
    }

    fn payload_len(&self) -> usize {
        let image = |v: &Option<Vec<u8>>| v.as_ref().map_or(0, |v| 4 + v.len());
        FIXED_PAYLOAD_SIZE + image(&self.old_value) + image(&self.new_value)
    }

    /// Bytes this record occupies in the log file.
    pub fn size_on_disk(&self) -> usize {
        FRAME_OVERHEAD + self.payload_len()
    }

    /// Serializes the record into a checksummed frame.
    pub fn encode(&self) -> Bytes {
        let payload_len = self.payload_len();
        let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + payload_len);

        buf.put_u32_le(payload_len as u32);
        buf.put_u64_le(self.lsn);
        buf.put_u64_le(self.txn_id);
        buf.put_u8(self.record_type as u8);
        buf.put_i64_le(self.key);
        put_image(&mut buf, self.old_value.as_deref());
        put_image(&mut buf, self.new_value.as_deref());

        let checksum = crc32fast::hash(&buf[4..]);
        buf.put_u32_le(checksum);

        buf.freeze()
    }

    /// Parses a payload whose checksum has already been verified.
    pub fn decode_payload(mut data: &[u8]) -> Result<Self> {
        need(data, FIXED_PAYLOAD_SIZE - 2)?;
        let lsn = data.get_u64_le();
        let txn_id = data.get_u64_le();
        let record_type = LogRecordType::try_from(data.get_u8())?;
        let key = data.get_i64_le();
        let old_value = get_image(&mut data)?;
        let new_value = get_image(&mut data)?;

        if data.has_remaining() {
            return Err(ArborError::CorruptPage(format!(
                "{} trailing bytes in log record",
                data.remaining()
            )));
        }

        Ok(Self {
            lsn,
            txn_id,
            record_type,
            key,
            old_value,
            new_value,
        })
    }
}

fn put_image(buf: &mut BytesMut, image: Option<&[u8]>) {
    match image {
        Some(value) => {
            buf.put_u8(1);
            buf.put_u32_le(value.len() as u32);
            buf.put_slice(value);
        }
        None => buf.put_u8(0),
    }
}

fn get_image(data: &mut &[u8]) -> Result<Option<Vec<u8>>> {
    need(*data, 1)?;
    match data.get_u8() {
        0 => Ok(None),
        1 => {
            need(*data, 4)?;
            let len = data.get_u32_le() as usize;
            need(*data, len)?;
            let value = data[..len].to_vec();
            data.advance(len);
            Ok(Some(value))
        }
        flag => Err(ArborError::CorruptPage(format!("image flag {}", flag))),
    }
}

fn need(data: &[u8], len: usize) -> Result<()> {
    if data.remaining() < len {
        return Err(ArborError::CorruptPage(format!(
            "log record needs {} more bytes, {} left",
            len,
            data.remaining()
        )));
    }
    Ok(())
}
