use parking_lot::Mutex;
use tracing::trace;

use super::{Lsn, ResourceId, TxnId};

pub trait LogManager: Send + Sync {
    /// Record an in-place update of `resource` at byte `offset` of its page
    fn log_update(
        &self,
        txn: TxnId,
        resource: ResourceId,
        offset: usize,
        before: &[u8],
        after: &[u8],
    ) -> Lsn;
}

/// One logged update with its before and after images
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn: TxnId,
    pub resource: ResourceId,
    pub offset: usize,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

#[derive(Debug)]
struct LogState {
    records: Vec<LogRecord>,
    next_lsn: u64,
}

/// In-memory update log, kept until the owning transaction ends
#[derive(Debug)]
pub struct UndoLog {
    state: Mutex<LogState>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LogState {
                records: Vec::new(),
                next_lsn: 1,
            }),
        }
    }

    /// Remove and return the records of `txn`, oldest first
    pub fn drain(&self, txn: TxnId) -> Vec<LogRecord> {
        let mut state = self.state.lock();
        let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.records)
            .into_iter()
            .partition(|r| r.txn == txn);
        state.records = rest;
        mine
    }

    pub fn records_for(&self, txn: TxnId) -> Vec<LogRecord> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|r| r.txn == txn)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogManager for UndoLog {
    fn log_update(
        &self,
        txn: TxnId,
        resource: ResourceId,
        offset: usize,
        before: &[u8],
        after: &[u8],
    ) -> Lsn {
        let mut state = self.state.lock();
        let lsn = Lsn(state.next_lsn);
        state.next_lsn += 1;
        state.records.push(LogRecord {
            lsn,
            txn,
            resource,
            offset,
            before: before.to_vec(),
            after: after.to_vec(),
        });
        trace!(%lsn, txn = %txn, resource = %resource, offset, "logged update");
        lsn
    }
}
