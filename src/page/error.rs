use thiserror::Error;

/// Errors raised while turning raw blocks into pages and back
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Invalid node tag: {0}")]
    InvalidNodeTag(u32),

    #[error("{kind} node holds {count} keys, capacity is {capacity}")]
    TooManyKeys {
        kind: &'static str,
        count: usize,
        capacity: usize,
    },

    #[error("Internal node has no leftmost child")]
    MissingChild,

    #[error("Value too large: {0} bytes")]
    ValueTooLarge(usize),

    #[error("Corrupted file header: {0}")]
    CorruptedHeader(String),
}

pub type CodecResult<T> = Result<T, CodecError>;
