//! Table registry and request API
//!
//! A [`Database`] is the explicit context every request goes through: it owns
//! the shared buffer pool, one B+ tree per open table file, and the lock
//! table and undo log used by transactional requests.
//!
//! Writes outside a transaction never touch a table while some transaction
//! holds record locks in it, since they may move records under those locks.

mod error;


pub use error::{TableError, TableResult};

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::btree::{BPlusTree, BPlusTreeResult, TreeStats};
use crate::buffer::BufferPool;
use crate::config::EngineConfig;
use crate::page::{Key, PAGE_SIZE, Value};
use crate::txn::{LockManager, LockTable, LogRecord, Lsn, TxnId, TxnScope, UndoLog};

/// Identifier of an open table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table{}", self.0)
    }
}

#[derive(Debug)]
struct Table {
    path: PathBuf,
    tree: BPlusTree,
    /// Shared by transactional requests, exclusive for other writes
    gate: RwLock<()>,
}

#[derive(Debug)]
pub struct Database {
    config: EngineConfig,
    pool: Arc<BufferPool>,
    tables: AHashMap<TableId, Table>,
    /// Canonical path of every open table
    paths: AHashMap<PathBuf, TableId>,
    next_table: u32,
    locks: LockTable,
    log: UndoLog,
    next_txn: AtomicU64,
}

impl Database {
    pub fn new(config: EngineConfig) -> TableResult<Self> {
        config.validate()?;
        let pool = BufferPool::with_policy(config.pool_capacity, config.eviction.build())?;

        Ok(Self {
            config,
            pool: Arc::new(pool),
            tables: AHashMap::new(),
            paths: AHashMap::new(),
            next_table: 0,
            locks: LockTable::new(),
            log: UndoLog::new(),
            next_txn: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    // ========== Registry ==========

    /// Open (creating if needed) the table stored at `path`.
    ///
    /// Opening a path that is already open returns its existing id.
    pub fn open_table<P: AsRef<Path>>(&mut self, path: P) -> TableResult<TableId> {
        let path = path.as_ref();
        if path.exists() {
            let canonical = path.canonicalize()?;
            if let Some(&id) = self.paths.get(&canonical) {
                return Ok(id);
            }
        }

        if self.tables.len() >= self.config.max_tables {
            return Err(TableError::TooManyTables(self.config.max_tables));
        }

        let file = self.pool.open_file(path)?;
        let canonical = match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(e) => {
                self.pool.release_file(file)?;
                return Err(e.into());
            }
        };
        let tree = BPlusTree::new(Arc::clone(&self.pool), file, self.config.tree_options())?;

        let id = TableId(self.next_table);
        self.next_table += 1;
        self.paths.insert(canonical.clone(), id);
        self.tables.insert(
            id,
            Table {
                path: canonical,
                tree,
                gate: RwLock::new(()),
            },
        );

        info!(table = %id, path = %path.display(), "opened table");
        Ok(id)
    }

    /// Write back the table's pages and close its file.
    ///
    /// Fails with [`TableError::TableLocked`] while an open transaction holds
    /// locks in the table.
    pub fn close_table(&mut self, id: TableId) -> TableResult<()> {
        let file = self.table(id)?.file();
        if self.locks.is_table_locked(id) {
            return Err(TableError::TableLocked(id));
        }
        self.pool.release_file(file)?;

        if let Some(table) = self.tables.remove(&id) {
            self.paths.remove(&table.path);
            info!(table = %id, path = %table.path.display(), "closed table");
        }
        Ok(())
    }

    pub fn is_open(&self, id: TableId) -> bool {
        self.tables.contains_key(&id)
    }

    /// Ids of all open tables, ascending
    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.tables.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn path_of(&self, id: TableId) -> TableResult<&Path> {
        self.tables
            .get(&id)
            .map(|t| t.path.as_path())
            .ok_or(TableError::TableNotOpen(id))
    }

    fn entry(&self, id: TableId) -> TableResult<&Table> {
        self.tables.get(&id).ok_or(TableError::TableNotOpen(id))
    }

    fn table(&self, id: TableId) -> TableResult<&BPlusTree> {
        self.entry(id).map(|t| &t.tree)
    }

    /// Run a write outside any transaction, refusing tables with locked records
    fn write_untracked<T>(
        &self,
        id: TableId,
        op: impl FnOnce(&BPlusTree) -> BPlusTreeResult<T>,
    ) -> TableResult<T> {
        let table = self.entry(id)?;
        let _gate = table.gate.write();
        if self.locks.is_table_locked(id) {
            return Err(TableError::TableLocked(id));
        }
        Ok(op(&table.tree)?)
    }

    // ========== Requests ==========

    pub fn insert(&self, id: TableId, key: Key, value: Value) -> TableResult<()> {
        self.write_untracked(id, |tree| tree.insert(key, value))
    }

    pub fn find(&self, id: TableId, key: Key) -> TableResult<Option<Value>> {
        Ok(self.table(id)?.find(key)?)
    }

    pub fn find_range(&self, id: TableId, lo: Key, hi: Key) -> TableResult<Vec<(Key, Value)>> {
        Ok(self.table(id)?.find_range(lo, hi)?)
    }

    pub fn delete(&self, id: TableId, key: Key) -> TableResult<Value> {
        self.write_untracked(id, |tree| tree.remove(key))
    }

    pub fn update(&self, id: TableId, key: Key, value: Value) -> TableResult<()> {
        self.write_untracked(id, |tree| tree.update(key, value))
    }

    /// Drop every record of the table, returning its pages to the free list
    pub fn destroy(&self, id: TableId) -> TableResult<usize> {
        self.write_untracked(id, BPlusTree::destroy_tree)
    }

    pub fn stats(&self, id: TableId) -> TableResult<TreeStats> {
        Ok(self.table(id)?.verify()?)
    }

    /// Natural join on the key: every key present in both tables with both values
    pub fn join(&self, left: TableId, right: TableId) -> TableResult<Vec<(Key, Value, Value)>> {
        let left = self.table(left)?.find_range(Key::MIN, Key::MAX)?;
        let right = self.table(right)?.find_range(Key::MIN, Key::MAX)?;

        let mut joined = Vec::new();
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();

        while let (Some(&(lk, lv)), Some(&(rk, rv))) = (left.peek(), right.peek()) {
            match lk.cmp(&rk) {
                Ordering::Less => {
                    left.next();
                }
                Ordering::Greater => {
                    right.next();
                }
                Ordering::Equal => {
                    joined.push((lk, lv, rv));
                    left.next();
                    right.next();
                }
            }
        }
        Ok(joined)
    }

    // ========== Transactions ==========

    pub fn begin(&self) -> TxnId {
        let txn = TxnId(self.next_txn.fetch_add(1, AtomicOrdering::Relaxed));
        debug!(txn = %txn, "begin");
        txn
    }

    fn scope(&self, txn: TxnId, table: TableId) -> TxnScope<'_> {
        TxnScope::new(txn, table, &self.locks, &self.log)
    }

    /// Look up `key` under a shared record lock held until the transaction ends
    pub fn find_in(&self, txn: TxnId, id: TableId, key: Key) -> TableResult<Option<Value>> {
        let table = self.entry(id)?;
        let _gate = table.gate.read();
        Ok(table.tree.find_in(&self.scope(txn, id), key)?)
    }

    /// Overwrite `key` under an exclusive record lock, logging the old value
    pub fn update_in(&self, txn: TxnId, id: TableId, key: Key, value: Value) -> TableResult<Lsn> {
        let table = self.entry(id)?;
        let _gate = table.gate.read();
        Ok(table.tree.update_in(&self.scope(txn, id), key, value)?)
    }

    /// Keep the transaction's updates and release its locks
    pub fn commit(&self, txn: TxnId) {
        let records = self.log.drain(txn);
        self.locks.release_all(txn);
        debug!(txn = %txn, updates = records.len(), "commit");
    }

    /// Restore every value the transaction overwrote, newest first, then
    /// release its locks.
    ///
    /// If a before-image cannot be written back, the transaction keeps its log
    /// records and locks so the abort can be retried.
    pub fn abort(&self, txn: TxnId) -> TableResult<()> {
        let records = self.log.records_for(txn);
        self.undo(&records)?;

        self.log.drain(txn);
        self.locks.release_all(txn);
        debug!(txn = %txn, updates = records.len(), "abort");
        Ok(())
    }

    fn undo(&self, records: &[LogRecord]) -> TableResult<()> {
        for record in records.iter().rev() {
            let end = record.offset + record.before.len();
            if end > PAGE_SIZE {
                return Err(TableError::InvalidLogRecord(record.lsn));
            }

            self.table(record.resource.table)?.restore_image(
                record.resource.page,
                record.offset,
                &record.before,
            )?;
        }
        Ok(())
    }

    /// Close every table and flush the pool. Open transactions must end first.
    pub fn shutdown(&mut self) -> TableResult<()> {
        for id in self.table_ids() {
            self.close_table(id)?;
        }
        self.pool.flush_all()?;
        info!("database shut down");
        Ok(())
    }
}
