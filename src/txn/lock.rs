use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::trace;

use super::{LockMode, LockOutcome, ResourceId, TxnId};
use crate::table::TableId;

pub trait LockManager: Send + Sync {
    /// Try to take `resource` in `mode`; never waits
    fn acquire(&self, txn: TxnId, resource: ResourceId, mode: LockMode) -> LockOutcome;

    /// Drop every lock held by `txn`
    fn release_all(&self, txn: TxnId);
}

#[derive(Debug)]
struct Holders {
    mode: LockMode,
    txns: Vec<TxnId>,
}

#[derive(Debug, Default)]
struct LockState {
    held: AHashMap<ResourceId, Holders>,
    by_txn: AHashMap<TxnId, Vec<ResourceId>>,
}

/// Record lock table.
///
/// Shared locks are compatible with each other. A transaction that is the
/// only holder may take the lock again or upgrade it to exclusive; any other
/// conflict is reported as [`LockOutcome::Blocked`] immediately.
#[derive(Debug, Default)]
pub struct LockTable {
    state: Mutex<LockState>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mode of `resource`, if anyone holds it
    pub fn mode_of(&self, resource: ResourceId) -> Option<LockMode> {
        self.state.lock().held.get(&resource).map(|h| h.mode)
    }

    /// Number of resources `txn` holds
    pub fn held_by(&self, txn: TxnId) -> usize {
        self.state.lock().by_txn.get(&txn).map_or(0, Vec::len)
    }

    /// Whether any transaction holds a lock on a record of `table`
    pub fn is_table_locked(&self, table: TableId) -> bool {
        self.state.lock().held.keys().any(|r| r.table == table)
    }
}

impl LockManager for LockTable {
    fn acquire(&self, txn: TxnId, resource: ResourceId, mode: LockMode) -> LockOutcome {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let newly_held = match state.held.get_mut(&resource) {
            None => {
                state.held.insert(
                    resource,
                    Holders {
                        mode,
                        txns: vec![txn],
                    },
                );
                true
            }
            Some(holders) => {
                let holds = holders.txns.contains(&txn);
                let sole = holds && holders.txns.len() == 1;
                match (holders.mode, mode) {
                    (LockMode::Shared, LockMode::Shared) => {
                        if !holds {
                            holders.txns.push(txn);
                        }
                        !holds
                    }
                    (LockMode::Exclusive, _) if holds => false,
                    (LockMode::Shared, LockMode::Exclusive) if sole => {
                        holders.mode = LockMode::Exclusive;
                        false
                    }
                    _ => {
                        trace!(txn = %txn, resource = %resource, ?mode, "lock blocked");
                        return LockOutcome::Blocked;
                    }
                }
            }
        };

        if newly_held {
            state.by_txn.entry(txn).or_default().push(resource);
        }
        LockOutcome::Granted
    }

    fn release_all(&self, txn: TxnId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(resources) = state.by_txn.remove(&txn) else {
            return;
        };
        for resource in resources {
            if let Some(holders) = state.held.get_mut(&resource) {
                holders.txns.retain(|&t| t != txn);
                if holders.txns.is_empty() {
                    state.held.remove(&resource);
                }
            }
        }
    }
}
