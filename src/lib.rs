pub mod btree;
pub mod buffer;
pub mod config;
pub mod file;
pub mod page;
pub mod table;
pub mod txn;

pub use btree::{BPlusTree, BPlusTreeError, BPlusTreeResult, TreeOptions, TreeStats};
pub use buffer::{BufferPool, EvictionPolicy, LruPolicy, MruPolicy, PageRef, ReplacementPolicy};
pub use config::{ConfigError, ConfigResult, EngineConfig};
pub use file::{DiskManager, FileError, FileHandle, FileResult};
pub use page::{Key, PAGE_SIZE, PageId, Value};
pub use table::{Database, TableError, TableId, TableResult};
pub use txn::{LockManager, LockMode, LockOutcome, LockTable, LogManager, Lsn, ResourceId, TxnId, TxnScope, UndoLog};
