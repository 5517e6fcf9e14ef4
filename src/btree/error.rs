use thiserror::Error;

use crate::file::FileError;
use crate::page::{CodecError, Key};
use crate::txn::ResourceId;

/// Errors that can occur during B+ tree operations
#[derive(Debug, Error)]
pub enum BPlusTreeError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Key not found: {0}")]
    KeyNotFound(Key),

    #[error("Duplicate key: {0}")]
    DuplicateKey(Key),

    #[error("Invalid tree state: {0}")]
    InvalidState(String),

    #[error("Invalid {kind} order: {order} (must be in 3..={max})")]
    InvalidOrder {
        kind: &'static str,
        order: usize,
        max: usize,
    },

    #[error("Lock conflict on {0}")]
    LockConflict(ResourceId),
}

pub type BPlusTreeResult<T> = Result<T, BPlusTreeError>;
