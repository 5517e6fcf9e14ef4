//! Transaction collaborators used by the engine's transactional paths.
//!
//! The engine only talks to the [`LockManager`] and [`LogManager`] traits;
//! [`LockTable`] and [`UndoLog`] are the in-process implementations the
//! table registry wires up.

mod lock;
mod log;

use std::fmt;

pub use lock::{LockManager, LockTable};
pub use log::{LogManager, LogRecord, UndoLog};

use crate::page::PageId;
use crate::table::TableId;

/// Transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn{}", self.0)
    }
}

/// Log sequence number, increasing with every logged update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lsn(pub u64);

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn{}", self.0)
    }
}

/// A lockable record: one slot of one leaf page of one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub table: TableId,
    pub page: PageId,
    /// Record slot within the leaf
    pub record: usize,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.table, self.page, self.record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Granted,
    Blocked,
}

/// Everything a transactional engine call needs to know about its caller
#[derive(Clone, Copy)]
pub struct TxnScope<'a> {
    pub txn: TxnId,
    pub table: TableId,
    pub locks: &'a dyn LockManager,
    pub log: &'a dyn LogManager,
}

impl<'a> TxnScope<'a> {
    pub fn new(
        txn: TxnId,
        table: TableId,
        locks: &'a dyn LockManager,
        log: &'a dyn LogManager,
    ) -> Self {
        Self {
            txn,
            table,
            locks,
            log,
        }
    }
}
