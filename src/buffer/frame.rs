//! Buffer frame identity and bookkeeping

use crate::file::FileHandle;
use crate::page::PageId;

/// Frame identifier - index into the buffer pool's frame array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

impl FrameId {
    /// Invalid frame ID.
    pub const INVALID: Self = Self(usize::MAX);

    #[inline]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != usize::MAX
    }
}

/// A key identifying a page in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BufferKey {
    pub file: FileHandle,
    pub page_id: PageId,
}

/// Metadata of one frame, guarded by the pool lock
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FrameMeta {
    /// Page currently held (None if the frame is unused)
    pub key: Option<BufferKey>,
    /// Whether the page has been modified since it was loaded
    pub dirty: bool,
    /// Number of accesses currently running against the frame
    pub pin_count: u32,
    /// Stamped each time the frame takes on a new page
    pub generation: u64,
}

impl FrameMeta {
    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    pub fn holds(&self, key: BufferKey) -> bool {
        self.key == Some(key)
    }
}

/// A safe reference to a page in the buffer pool.
///
/// The handle never owns its frame. Every access compares the handle's
/// generation with the frame's: if the frame was evicted and reused in the
/// meantime, the pool looks the page up again (loading it if needed) and
/// refreshes the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRef {
    pub(crate) file: FileHandle,
    pub(crate) page_id: PageId,
    pub(crate) frame: FrameId,
    pub(crate) generation: u64,
}

impl PageRef {
    /// An unresolved handle; the first access locates the page
    pub fn new(file: FileHandle, page_id: PageId) -> Self {
        Self {
            file,
            page_id,
            frame: FrameId::INVALID,
            generation: 0,
        }
    }

    pub fn file(&self) -> FileHandle {
        self.file
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Frame the handle last observed the page in
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    pub(crate) fn key(&self) -> BufferKey {
        BufferKey {
            file: self.file,
            page_id: self.page_id,
        }
    }
}
