use std::io;
use thiserror::Error;

use super::FileHandle;
use crate::page::{CodecError, PageId};

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Invalid file handle: {0}")]
    InvalidHandle(FileHandle),

    #[error("Page {page_id} out of range (page count {page_count})")]
    PageOutOfRange { page_id: PageId, page_count: u64 },

    #[error("Page {0} is reserved for the file header")]
    ReservedPage(PageId),

    #[error("Page {0} is pinned")]
    PagePinned(PageId),

    #[error("Buffer pool is full, all frames are pinned")]
    BufferPoolFull,

    #[error("Invalid buffer pool capacity: {0}")]
    InvalidCapacity(usize),
}

pub type FileResult<T> = Result<T, FileError>;
