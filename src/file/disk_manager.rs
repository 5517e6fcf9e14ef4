use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{FileError, FileResult};
use crate::page::{CodecError, FileHeader, FreePage, HEADER_PAGE_ID, PAGE_SIZE, Page, PageId};

/// Owns one open page file: byte offsets, the free-page list and file growth.
///
/// The file header is read once at open time and written through on every
/// change. No page data is cached here.
pub struct DiskManager {
    file: File,
    path: PathBuf,
    header: FileHeader,
}

impl DiskManager {
    /// Create a new page file, failing if it already exists
    pub fn create<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let path = path.as_ref();

        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }

        Self::open(path)
    }

    /// Open a page file, creating it (and its parent directories) if it doesn't exist
    pub fn open<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut manager = Self {
            file,
            path: path.to_path_buf(),
            header: FileHeader::new(),
        };

        let file_len = manager.file.metadata()?.len();
        if file_len == 0 {
            debug!(path = %path.display(), "initializing new page file");
            manager.write_header()?;
        } else {
            let mut buf = vec![0u8; PAGE_SIZE];
            manager.read_at(HEADER_PAGE_ID, &mut buf)?;
            let header = FileHeader::decode(&buf)?;

            let required = header.page_count * PAGE_SIZE as u64;
            if file_len < required {
                return Err(CodecError::CorruptedHeader(format!(
                    "header claims {} pages but file holds {} bytes",
                    header.page_count, file_len
                ))
                .into());
            }
            manager.header = header;
        }

        Ok(manager)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn root(&self) -> Option<PageId> {
        self.header.root
    }

    /// Record a new tree root in the header
    pub fn set_root(&mut self, root: Option<PageId>) -> FileResult<()> {
        if let Some(id) = root {
            self.check_data_page(id)?;
        }
        self.header.root = root;
        self.write_header()
    }

    /// Total number of pages in the file, header included
    pub fn page_count(&self) -> u64 {
        self.header.page_count
    }

    /// Read a page from the file
    pub fn read_page(&mut self, page_id: PageId, buffer: &mut [u8]) -> FileResult<()> {
        self.check_buffer(buffer.len())?;
        self.check_range(page_id)?;
        self.read_at(page_id, buffer)
    }

    /// Write a page to the file
    pub fn write_page(&mut self, page_id: PageId, buffer: &[u8]) -> FileResult<()> {
        self.check_buffer(buffer.len())?;
        self.check_range(page_id)?;
        self.write_at(page_id, buffer)
    }

    /// Pop a page off the free list, growing the file first if the list is empty
    pub fn create_page(&mut self) -> FileResult<PageId> {
        let page_id = match self.header.free_head {
            Some(head) => head,
            None => self.grow()?,
        };

        let mut buf = vec![0u8; PAGE_SIZE];
        self.read_at(page_id, &mut buf)?;
        let free = FreePage::decode(&buf)?;

        self.header.free_head = free.next;
        self.write_header()?;

        Ok(page_id)
    }

    /// Push a page onto the free list
    pub fn free_page(&mut self, page_id: PageId) -> FileResult<()> {
        self.check_data_page(page_id)?;

        let link = Page::Free(FreePage {
            next: self.header.free_head,
        });
        self.write_at(page_id, &link.to_bytes()?)?;

        self.header.free_head = Some(page_id);
        self.write_header()
    }

    /// Sync the file to disk (flush all OS buffers)
    pub fn sync(&mut self) -> FileResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Extend the file by `max(1, page_count)` pages and chain them onto the free list.
    /// Returns the new free-list head.
    fn grow(&mut self) -> FileResult<PageId> {
        let old_count = self.header.page_count;
        let new_count = old_count + old_count.max(1);

        self.file.set_len(new_count * PAGE_SIZE as u64)?;

        let mut buf = vec![0u8; PAGE_SIZE];
        for page_id in old_count..new_count {
            let next = if page_id + 1 < new_count {
                Some(page_id + 1)
            } else {
                self.header.free_head
            };
            Page::Free(FreePage { next }).encode(&mut buf)?;
            self.write_at(page_id, &buf)?;
        }

        self.header.free_head = Some(old_count);
        self.header.page_count = new_count;
        self.write_header()?;

        debug!(
            path = %self.path.display(),
            old_count,
            new_count,
            "grew page file"
        );
        Ok(old_count)
    }

    fn write_header(&mut self) -> FileResult<()> {
        let bytes = Page::Header(self.header).to_bytes()?;
        self.write_at(HEADER_PAGE_ID, &bytes)
    }

    fn read_at(&mut self, page_id: PageId, buffer: &mut [u8]) -> FileResult<()> {
        let offset = page_id * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buffer)?;
        Ok(())
    }

    fn write_at(&mut self, page_id: PageId, buffer: &[u8]) -> FileResult<()> {
        let offset = page_id * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buffer)?;
        // Not synced here; see `sync`
        Ok(())
    }

    fn check_buffer(&self, len: usize) -> FileResult<()> {
        if len != PAGE_SIZE {
            return Err(CodecError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: len,
            }
            .into());
        }
        Ok(())
    }

    fn check_range(&self, page_id: PageId) -> FileResult<()> {
        if page_id >= self.header.page_count {
            return Err(FileError::PageOutOfRange {
                page_id,
                page_count: self.header.page_count,
            });
        }
        Ok(())
    }

    fn check_data_page(&self, page_id: PageId) -> FileResult<()> {
        if page_id == HEADER_PAGE_ID {
            return Err(FileError::ReservedPage(page_id));
        }
        self.check_range(page_id)
    }
}
