mod disk_manager;
mod error;

use std::fmt;

pub use disk_manager::DiskManager;
pub use error::{FileError, FileResult};

/// Handle to a file attached to the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub(crate) usize);

impl FileHandle {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
