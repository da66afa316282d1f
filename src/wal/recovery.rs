use std::collections::HashSet;

use crate::common::{Lsn, Result, TxnId};
use crate::index::BTree;

use super::log_record::{LogRecord, LogRecordType};

/// What a recovery pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Valid records found in the log
    pub records_scanned: usize,
    /// Records at or below the data file's applied LSN
    pub skipped: usize,
    /// Mutations that changed the tree on redo
    pub redone: usize,
    /// Mutations whose effect was already present
    pub already_applied: usize,
    /// Mutations rolled back for transactions that never committed
    pub undone: usize,
    /// Transactions without a COMMIT record
    pub loser_txns: Vec<TxnId>,
    /// Whether the data file was discarded and rebuilt from the log
    pub rebuilt: bool,
    /// Why the log scan stopped early, if it did
    pub corruption: Option<String>,
}

impl RecoveryReport {
    /// Whether recovery changed the tree.
    pub fn changed_tree(&self) -> bool {
        self.redone > 0 || self.undone > 0
    }
}

/// Replays `records` onto `tree`: every mutation newer than `applied_lsn` is
/// redone in LSN order, then mutations of transactions without a COMMIT are
/// undone newest first. Both passes are idempotent, so running them again
/// over the same log changes nothing.
pub fn replay(tree: &mut BTree, records: &[LogRecord], applied_lsn: Lsn) -> Result<RecoveryReport> {
    let mut report = RecoveryReport {
        records_scanned: records.len(),
        ..Default::default()
    };

    let committed: HashSet<TxnId> = records
        .iter()
        .filter(|r| r.record_type == LogRecordType::Commit)
        .map(|r| r.txn_id)
        .collect();

    let mut losers = Vec::new();
    for record in records {
        if record.lsn <= applied_lsn {
            report.skipped += 1;
            continue;
        }
        if !record.is_mutation() {
            continue;
        }

        if redo(tree, record)? {
            report.redone += 1;
        } else {
            report.already_applied += 1;
        }
        if !committed.contains(&record.txn_id) {
            losers.push(record);
        }
    }

    let undo_lsn = records.last().map_or(applied_lsn, |r| r.lsn);
    for record in losers.iter().rev() {
        if undo(tree, record, undo_lsn)? {
            report.undone += 1;
        }
        if !report.loser_txns.contains(&record.txn_id) {
            report.loser_txns.push(record.txn_id);
        }
    }
    report.loser_txns.sort_unstable();

    Ok(report)
}

/// Applies a mutation record's redo image unless the tree already holds it.
/// Returns whether the tree changed.
pub fn redo(tree: &mut BTree, record: &LogRecord) -> Result<bool> {
    match record.record_type {
        LogRecordType::Insert | LogRecordType::Update => {
            let Some(new_value) = &record.new_value else {
                return Ok(false);
            };
            if tree.search(record.key)?.as_ref() == Some(new_value) {
                return Ok(false);
            }
            tree.insert(record.key, new_value.clone(), record.lsn)?;
            Ok(true)
        }
        LogRecordType::Delete => Ok(tree.delete(record.key, record.lsn)?.is_some()),
        LogRecordType::Commit | LogRecordType::Checkpoint => Ok(false),
    }
}

/// Reverts a mutation record using its undo image. Returns whether the tree
/// changed.
pub fn undo(tree: &mut BTree, record: &LogRecord, lsn: Lsn) -> Result<bool> {
    match (record.record_type, &record.old_value) {
        (LogRecordType::Insert, _) => Ok(tree.delete(record.key, lsn)?.is_some()),
        (LogRecordType::Update | LogRecordType::Delete, Some(old_value)) => {
            if tree.search(record.key)?.as_ref() == Some(old_value) {
                return Ok(false);
            }
            tree.insert(record.key, old_value.clone(), lsn)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}
