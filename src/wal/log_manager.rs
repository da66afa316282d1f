use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{ArborError, Lsn, Result, INVALID_LSN};

use super::log_record::{LogRecord, FRAME_OVERHEAD};

/// Result of scanning a log file.
#[derive(Debug, Default)]
pub struct LogScan {
    /// Valid records in LSN order
    pub records: Vec<LogRecord>,
    /// Byte length of the valid prefix
    pub valid_len: u64,
    /// What ended the scan early, if anything did
    pub corruption: Option<ArborError>,
}

impl LogScan {
    pub fn last_lsn(&self) -> Lsn {
        self.records.last().map_or(INVALID_LSN, |r| r.lsn)
    }
}

/// Append cursor, guarded by the log latch
struct LogState {
    writer: BufWriter<File>,
    next_lsn: Lsn,
    /// LSN of the newest appended record
    appended_lsn: Lsn,
    /// Bytes in the file, including buffered ones
    size: u64,
}

/// Append-only write-ahead log over a single file.
///
/// Appends are buffered; nothing is durable until [`LogManager::flush`]
/// returns. `flushed_lsn` only moves forward and can be read without the
/// latch, so page write-backs can check it cheaply.
pub struct LogManager {
    path: PathBuf,
    state: Mutex<LogState>,
    flushed_lsn: AtomicU64,
}

impl LogManager {
    /// Opens (or creates) the log at `path`. A torn or corrupt tail is cut off
    /// so new records follow the last valid one. Returns the valid records.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<(Self, LogScan)> {
        let path = path.as_ref().to_path_buf();
        let scan = Self::read_all(&path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        if file_len > scan.valid_len {
            tracing::warn!(
                path = %path.display(),
                discarded = file_len - scan.valid_len,
                reason = scan.corruption.as_ref().map(|e| e.to_string()),
                "discarding log tail"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(scan.valid_len))?;

        let last_lsn = scan.last_lsn();
        let log = Self {
            path,
            state: Mutex::new(LogState {
                writer: BufWriter::new(file),
                next_lsn: last_lsn + 1,
                appended_lsn: last_lsn,
                size: scan.valid_len,
            }),
            flushed_lsn: AtomicU64::new(last_lsn),
        };

        Ok((log, scan))
    }

    /// Assigns the next LSN to `record` and buffers it. Not durable until
    /// the next flush.
    pub fn append(&self, mut record: LogRecord) -> Result<Lsn> {
        let mut state = self.state.lock();

        record.lsn = state.next_lsn;
        let frame = record.encode();
        state.writer.write_all(&frame)?;

        state.next_lsn += 1;
        state.appended_lsn = record.lsn;
        state.size += frame.len() as u64;
        Ok(record.lsn)
    }

    /// Forces every appended record to stable storage.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.writer.flush()?;
        state.writer.get_ref().sync_data()?;
        self.flushed_lsn.fetch_max(state.appended_lsn, Ordering::AcqRel);
        Ok(())
    }

    /// Makes sure the log is durable at least up to `lsn`.
    pub fn flush_to(&self, lsn: Lsn) -> Result<()> {
        if lsn <= self.flushed_lsn() {
            return Ok(());
        }
        self.flush()
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.flushed_lsn.load(Ordering::Acquire)
    }

    /// The LSN the next append will receive.
    pub fn next_lsn(&self) -> Lsn {
        self.state.lock().next_lsn
    }

    /// Keeps LSNs increasing past `lsn` even if the log no longer holds the
    /// records that used them.
    pub fn ensure_next_lsn(&self, lsn: Lsn) {
        let mut state = self.state.lock();
        if state.next_lsn < lsn {
            state.next_lsn = lsn;
        }
    }

    /// Bytes in the log, including records not yet flushed.
    pub fn size_bytes(&self) -> u64 {
        self.state.lock().size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the log with `records`, numbered from the next LSN on. The
    /// new contents are synced under a temporary name and renamed into
    /// place, so a crash leaves either the old log or the new one. Returns
    /// the LSN of the last record written.
    pub fn rewrite(&self, records: Vec<LogRecord>) -> Result<Lsn> {
        let mut state = self.state.lock();
        state.writer.flush()?;

        let tmp_path = self.path.with_extension("wal.tmp");
        let mut lsn = state.next_lsn;
        let mut size = 0u64;
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for mut record in records {
                record.lsn = lsn;
                let frame = record.encode();
                tmp.write_all(&frame)?;
                size += frame.len() as u64;
                lsn += 1;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                // Persists the rename; not every platform can sync a directory
                let _ = dir.sync_all();
            }
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;

        let last_lsn = lsn - 1;
        state.writer = BufWriter::new(file);
        state.next_lsn = lsn;
        state.appended_lsn = last_lsn;
        state.size = size;
        self.flushed_lsn.fetch_max(last_lsn, Ordering::AcqRel);

        Ok(last_lsn)
    }

    /// Reads every valid record of the log at `path`. The scan stops at the
    /// first truncated frame, checksum mismatch, undecodable payload or
    /// non-increasing LSN; everything before it is returned. A missing file
    /// is an empty log.
    pub fn read_all<P: AsRef<Path>>(path: P) -> Result<LogScan> {
        let data = match fs::read(path.as_ref()) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LogScan::default()),
            Err(e) => return Err(e.into()),
        };

        let mut scan = LogScan::default();
        let mut offset = 0usize;

        while offset < data.len() {
            let corrupt = |reason: String| ArborError::LogCorruption {
                offset: offset as u64,
                reason,
            };

            let remaining = &data[offset..];
            if remaining.len() < FRAME_OVERHEAD {
                scan.corruption = Some(corrupt("truncated frame header".into()));
                break;
            }

            let len = u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]])
                as usize;
            let Some(frame_len) = len.checked_add(FRAME_OVERHEAD).filter(|&n| n <= remaining.len())
            else {
                scan.corruption = Some(corrupt(format!(
                    "frame of {} bytes runs past the end of the log",
                    len
                )));
                break;
            };

            let payload = &remaining[4..4 + len];
            let crc_bytes = &remaining[4 + len..frame_len];
            let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
            let computed = crc32fast::hash(payload);
            if stored != computed {
                scan.corruption = Some(corrupt(format!(
                    "checksum mismatch: stored={:#010x}, computed={:#010x}",
                    stored, computed
                )));
                break;
            }

            let record = match LogRecord::decode_payload(payload) {
                Ok(record) => record,
                Err(e) => {
                    scan.corruption = Some(corrupt(e.to_string()));
                    break;
                }
            };

            if record.lsn <= scan.last_lsn() {
                scan.corruption = Some(corrupt(format!(
                    "lsn {} does not follow {}",
                    record.lsn,
                    scan.last_lsn()
                )));
                break;
            }

            scan.records.push(record);
            offset += frame_len;
            scan.valid_len = offset as u64;
        }

        Ok(scan)
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Err(e) = state.writer.flush().and_then(|_| state.writer.get_ref().sync_data()) {
            tracing::error!(path = %self.path.display(), "failed to flush log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::LogRecordType;
    use tempfile::TempDir;

    #[test]
    fn test_log_manager_append_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        let (log, scan) = LogManager::open(&path).unwrap();
        assert!(scan.records.is_empty());

        let lsn1 = log.append(LogRecord::insert(1, 10, b"a".to_vec())).unwrap();
        let lsn2 = log.append(LogRecord::commit(1)).unwrap();
        assert_eq!((lsn1, lsn2), (1, 2));
        assert_eq!(log.flushed_lsn(), INVALID_LSN);

        log.flush().unwrap();
        assert_eq!(log.flushed_lsn(), 2);
        drop(log);

        let (log, scan) = LogManager::open(&path).unwrap();
        assert_eq!(scan.records.len(), 2);
        assert_eq!(scan.records[1].record_type, LogRecordType::Commit);
        assert!(scan.corruption.is_none());
        assert_eq!(log.next_lsn(), 3);
    }

    #[test]
    fn test_log_manager_flush_to_is_lazy() {
        let dir = TempDir::new().unwrap();
        let (log, _) = LogManager::open(dir.path().join("test.wal")).unwrap();

        log.append(LogRecord::commit(1)).unwrap();
        log.flush_to(INVALID_LSN).unwrap();
        assert_eq!(log.flushed_lsn(), INVALID_LSN);

        log.flush_to(1).unwrap();
        assert_eq!(log.flushed_lsn(), 1);
    }

    #[test]
    fn test_log_manager_rewrite_continues_lsns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        let (log, _) = LogManager::open(&path).unwrap();

        for i in 0..5 {
            log.append(LogRecord::insert(i, i as i64, vec![0; 32])).unwrap();
        }
        log.flush().unwrap();
        let before = log.size_bytes();

        let last = log
            .rewrite(vec![LogRecord::insert(9, 1, vec![1]), LogRecord::checkpoint(9)])
            .unwrap();
        assert_eq!(last, 7);
        assert!(log.size_bytes() < before);
        assert_eq!(log.flushed_lsn(), 7);

        log.append(LogRecord::commit(10)).unwrap();
        log.flush().unwrap();

        let scan = LogManager::read_all(&path).unwrap();
        let lsns: Vec<Lsn> = scan.records.iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, vec![6, 7, 8]);
        assert!(!path.with_extension("wal.tmp").exists());
    }

    #[test]
    fn test_log_manager_ensure_next_lsn() {
        let dir = TempDir::new().unwrap();
        let (log, _) = LogManager::open(dir.path().join("test.wal")).unwrap();

        log.ensure_next_lsn(50);
        assert_eq!(log.append(LogRecord::commit(1)).unwrap(), 50);
        log.ensure_next_lsn(10);
        assert_eq!(log.next_lsn(), 51);
    }
}
