use thiserror::Error;

use super::TableId;
use crate::btree::BPlusTreeError;
use crate::config::ConfigError;
use crate::file::FileError;
use crate::page::CodecError;
use crate::txn::Lsn;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("B+ tree error: {0}")]
    BPlusTree(#[from] BPlusTreeError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Table {0} is not open")]
    TableNotOpen(TableId),

    #[error("Too many open tables (limit {0})")]
    TooManyTables(usize),

    #[error("Log record {0} does not fit in its page")]
    InvalidLogRecord(Lsn),

    #[error("Table {0} has records locked by an open transaction")]
    TableLocked(TableId),
}

pub type TableResult<T> = Result<T, TableError>;
