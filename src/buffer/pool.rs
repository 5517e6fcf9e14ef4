use std::fmt;
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::frame::{BufferKey, FrameId, FrameMeta, PageRef};
use super::policy::{LruPolicy, ReplacementPolicy};
use super::usage::UsageList;
use crate::file::{DiskManager, FileError, FileHandle, FileResult};
use crate::page::{FileHeader, HEADER_PAGE_ID, PAGE_SIZE, PageId};

/// A fixed-capacity page cache shared by every open file.
///
/// Page bytes live in an arena of frames, each behind its own reader/writer
/// lock. Everything else (page table, usage order, frame metadata and the
/// attached disk managers) sits behind one pool-wide mutex.
///
/// Accesses are callback-scoped: the frame is pinned while the callback runs
/// and unpinned afterwards. A callback must not call back into the pool.
pub struct BufferPool {
    frames: Vec<RwLock<Box<[u8]>>>,
    state: Mutex<PoolState>,
    policy: Box<dyn ReplacementPolicy>,
}

struct PoolState {
    meta: Vec<FrameMeta>,
    usage: UsageList,
    /// Frames that have never held a page, or were released
    unused: Vec<FrameId>,
    page_table: AHashMap<BufferKey, FrameId>,
    files: AHashMap<FileHandle, DiskManager>,
    next_handle: usize,
    next_generation: u64,
}

impl PoolState {
    fn disk(&mut self, file: FileHandle) -> FileResult<&mut DiskManager> {
        self.files
            .get_mut(&file)
            .ok_or(FileError::InvalidHandle(file))
    }

    /// Frame the handle still points at, if its page was not evicted since
    fn validate(&self, page: &PageRef) -> Option<FrameId> {
        if !page.frame.is_valid() {
            return None;
        }
        let meta = self.meta.get(page.frame.index())?;
        (meta.holds(page.key()) && meta.generation == page.generation).then_some(page.frame)
    }

    fn install(&mut self, frame: FrameId, key: BufferKey, dirty: bool) {
        debug_assert!(!self.page_table.contains_key(&key));
        self.next_generation += 1;
        self.meta[frame.index()] = FrameMeta {
            key: Some(key),
            dirty,
            pin_count: 0,
            generation: self.next_generation,
        };
        self.page_table.insert(key, frame);
        self.usage.touch(frame);
    }

    fn detach(&mut self, frame: FrameId, key: BufferKey) {
        self.page_table.remove(&key);
        self.usage.remove(frame);
        let meta = &mut self.meta[frame.index()];
        meta.key = None;
        meta.dirty = false;
    }

    fn frames_of(&self, file: FileHandle) -> Vec<(FrameId, BufferKey)> {
        self.meta
            .iter()
            .enumerate()
            .filter_map(|(i, meta)| {
                meta.key
                    .filter(|key| key.file == file)
                    .map(|key| (FrameId::new(i), key))
            })
            .collect()
    }
}

/// Unpins its frame (and records dirtiness) when dropped
struct Pinned<'a> {
    pool: &'a BufferPool,
    frame: FrameId,
    dirtied: bool,
}

impl Drop for Pinned<'_> {
    fn drop(&mut self) {
        let mut guard = self.pool.state.lock();
        let state = &mut *guard;
        let meta = &mut state.meta[self.frame.index()];
        debug_assert!(meta.is_pinned());
        meta.pin_count = meta.pin_count.saturating_sub(1);
        if self.dirtied {
            meta.dirty = true;
        }
        state.usage.touch(self.frame);
    }
}

impl BufferPool {
    /// Create a buffer pool with LRU replacement
    pub fn new(capacity: usize) -> FileResult<Self> {
        Self::with_policy(capacity, Box::new(LruPolicy))
    }

    /// Create a buffer pool with the given default replacement policy
    pub fn with_policy(
        capacity: usize,
        policy: Box<dyn ReplacementPolicy>,
    ) -> FileResult<Self> {
        if capacity == 0 {
            return Err(FileError::InvalidCapacity(capacity));
        }

        let frames = (0..capacity)
            .map(|_| RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()))
            .collect();

        Ok(Self {
            frames,
            state: Mutex::new(PoolState {
                meta: vec![FrameMeta::default(); capacity],
                usage: UsageList::new(capacity),
                unused: (0..capacity).rev().map(FrameId::new).collect(),
                page_table: AHashMap::with_capacity(capacity),
                files: AHashMap::new(),
                next_handle: 0,
                next_generation: 0,
            }),
            policy,
        })
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    // ========== Files ==========

    /// Attach an open disk manager, returning the handle used for its pages
    pub fn attach(&self, disk: DiskManager) -> FileHandle {
        let mut state = self.state.lock();
        let handle = FileHandle(state.next_handle);
        state.next_handle += 1;
        debug!(file = %handle, path = %disk.path().display(), "attached file");
        state.files.insert(handle, disk);
        handle
    }

    /// Open (or create) a page file and attach it
    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> FileResult<FileHandle> {
        let disk = DiskManager::open(path)?;
        Ok(self.attach(disk))
    }

    /// Write back and evict every frame of `file`, then close it
    pub fn release_file(&self, file: FileHandle) -> FileResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.disk(file)?;

        let frames = state.frames_of(file);
        if let Some((_, key)) = frames
            .iter()
            .find(|(frame, _)| state.meta[frame.index()].is_pinned())
        {
            return Err(FileError::PagePinned(key.page_id));
        }

        for (frame, _) in frames {
            self.evict_frame(state, frame)?;
            state.unused.push(frame);
        }

        let disk = state.disk(file)?;
        disk.sync()?;
        let path = disk.path().to_path_buf();
        state.files.remove(&file);

        debug!(file = %file, path = %path.display(), "released file");
        Ok(())
    }

    pub fn is_attached(&self, file: FileHandle) -> bool {
        self.state.lock().files.contains_key(&file)
    }

    pub fn file_path(&self, file: FileHandle) -> FileResult<PathBuf> {
        Ok(self.state.lock().disk(file)?.path().to_path_buf())
    }

    pub fn header(&self, file: FileHandle) -> FileResult<FileHeader> {
        Ok(*self.state.lock().disk(file)?.header())
    }

    /// Root page of the tree stored in `file`
    pub fn root(&self, file: FileHandle) -> FileResult<Option<PageId>> {
        Ok(self.state.lock().disk(file)?.root())
    }

    pub fn set_root(&self, file: FileHandle, root: Option<PageId>) -> FileResult<()> {
        self.state.lock().disk(file)?.set_root(root)
    }

    /// Number of pages in `file`, header included
    pub fn page_count(&self, file: FileHandle) -> FileResult<u64> {
        Ok(self.state.lock().disk(file)?.page_count())
    }

    // ========== Pages ==========

    /// Bring a page into the pool and return a handle to it
    pub fn fetch(&self, file: FileHandle, page_id: PageId) -> FileResult<PageRef> {
        let mut page = PageRef::new(file, page_id);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let frame = self.resolve(state, page.key(), self.policy.as_ref())?;
        state.usage.touch(frame);
        page.frame = frame;
        page.generation = state.meta[frame.index()].generation;
        Ok(page)
    }

    /// Allocate a fresh page in `file`.
    ///
    /// The frame starts zeroed and dirty; the caller is expected to write its
    /// initial contents.
    pub fn new_page(&self, file: FileHandle) -> FileResult<PageRef> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.disk(file)?;

        let frame = self.allocate_frame(state, self.policy.as_ref())?;
        let page_id = match state.disk(file).and_then(|disk| disk.create_page()) {
            Ok(page_id) => page_id,
            Err(e) => {
                state.unused.push(frame);
                return Err(e);
            }
        };

        self.frames[frame.index()].write().fill(0);
        let key = BufferKey { file, page_id };
        state.install(frame, key, true);
        trace!(file = %file, page_id, frame = frame.index(), "new page");

        Ok(PageRef {
            file,
            page_id,
            frame,
            generation: state.meta[frame.index()].generation,
        })
    }

    /// Return a page to its file's free list, dropping any cached copy
    pub fn free_page(&self, file: FileHandle, page_id: PageId) -> FileResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.disk(file)?;

        let key = BufferKey { file, page_id };
        if let Some(&frame) = state.page_table.get(&key) {
            if state.meta[frame.index()].is_pinned() {
                return Err(FileError::PagePinned(page_id));
            }
            state.detach(frame, key);
            state.unused.push(frame);
        }

        state.disk(file)?.free_page(page_id)
    }

    /// Run `f` against the page under a shared lock
    pub fn read<R>(&self, page: &mut PageRef, f: impl FnOnce(&[u8]) -> R) -> FileResult<R> {
        self.read_with(page, self.policy.as_ref(), f)
    }

    /// Like [`read`](Self::read), choosing a victim with `policy` if the page must be loaded
    pub fn read_with<R>(
        &self,
        page: &mut PageRef,
        policy: &dyn ReplacementPolicy,
        f: impl FnOnce(&[u8]) -> R,
    ) -> FileResult<R> {
        let pinned = self.pin(page, policy)?;
        let data = self.frames[pinned.frame.index()].read();
        Ok(f(&data[..]))
    }

    /// Run `f` against the page under an exclusive lock and mark it dirty
    pub fn write<R>(&self, page: &mut PageRef, f: impl FnOnce(&mut [u8]) -> R) -> FileResult<R> {
        self.write_with(page, self.policy.as_ref(), f)
    }

    pub fn write_with<R>(
        &self,
        page: &mut PageRef,
        policy: &dyn ReplacementPolicy,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> FileResult<R> {
        let mut pinned = self.pin(page, policy)?;
        pinned.dirtied = true;
        let mut data = self.frames[pinned.frame.index()].write();
        Ok(f(&mut data[..]))
    }

    /// Flush a specific page to disk if it's dirty
    pub fn flush_page(&self, file: FileHandle, page_id: PageId) -> FileResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let key = BufferKey { file, page_id };
        if let Some(&frame) = state.page_table.get(&key)
            && state.meta[frame.index()].dirty
        {
            let data = self.frames[frame.index()].read();
            state.disk(file)?.write_page(page_id, &data[..])?;
            state.meta[frame.index()].dirty = false;
        }
        Ok(())
    }

    /// Flush all dirty pages and sync every attached file
    pub fn flush_all(&self) -> FileResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        for index in 0..state.meta.len() {
            let meta = state.meta[index];
            if let Some(key) = meta.key
                && meta.dirty
            {
                let data = self.frames[index].read();
                state.disk(key.file)?.write_page(key.page_id, &data[..])?;
                state.meta[index].dirty = false;
            }
        }

        for disk in state.files.values_mut() {
            disk.sync()?;
        }
        Ok(())
    }

    /// Write back (if dirty) and drop a page from the pool
    pub fn evict_page(&self, file: FileHandle, page_id: PageId) -> FileResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let key = BufferKey { file, page_id };
        if let Some(&frame) = state.page_table.get(&key) {
            if state.meta[frame.index()].is_pinned() {
                return Err(FileError::PagePinned(page_id));
            }
            self.evict_frame(state, frame)?;
            state.unused.push(frame);
        }
        Ok(())
    }

    // ========== Introspection ==========

    /// Number of pages currently in the pool
    pub fn resident_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.state
            .lock()
            .meta
            .iter()
            .filter(|m| m.key.is_some() && m.dirty)
            .count()
    }

    pub fn is_resident(&self, file: FileHandle, page_id: PageId) -> bool {
        self.state
            .lock()
            .page_table
            .contains_key(&BufferKey { file, page_id })
    }

    // ========== Internals ==========

    fn pin(&self, page: &mut PageRef, policy: &dyn ReplacementPolicy) -> FileResult<Pinned<'_>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let frame = match state.validate(page) {
            Some(frame) => frame,
            None => {
                let frame = self.resolve(state, page.key(), policy)?;
                page.frame = frame;
                page.generation = state.meta[frame.index()].generation;
                frame
            }
        };

        state.meta[frame.index()].pin_count += 1;
        Ok(Pinned {
            pool: self,
            frame,
            dirtied: false,
        })
    }

    /// Find the frame holding `key`, loading the page from disk on a miss
    fn resolve(
        &self,
        state: &mut PoolState,
        key: BufferKey,
        policy: &dyn ReplacementPolicy,
    ) -> FileResult<FrameId> {
        if key.page_id == HEADER_PAGE_ID {
            return Err(FileError::ReservedPage(key.page_id));
        }
        if let Some(&frame) = state.page_table.get(&key) {
            return Ok(frame);
        }
        state.disk(key.file)?;

        let frame = self.allocate_frame(state, policy)?;
        let loaded = {
            let mut data = self.frames[frame.index()].write();
            state
                .disk(key.file)
                .and_then(|disk| disk.read_page(key.page_id, &mut data[..]))
        };
        if let Err(e) = loaded {
            state.unused.push(frame);
            return Err(e);
        }

        state.install(frame, key, false);
        trace!(
            file = %key.file,
            page_id = key.page_id,
            frame = frame.index(),
            "loaded page"
        );
        Ok(frame)
    }

    /// Claim an unused frame, or evict the first unpinned candidate of `policy`
    fn allocate_frame(
        &self,
        state: &mut PoolState,
        policy: &dyn ReplacementPolicy,
    ) -> FileResult<FrameId> {
        if let Some(frame) = state.unused.pop() {
            return Ok(frame);
        }

        let mut candidate = policy.start(&state.usage);
        while let Some(frame) = candidate {
            if !state.meta[frame.index()].is_pinned() {
                self.evict_frame(state, frame)?;
                return Ok(frame);
            }
            candidate = policy.next(&state.usage, frame);
        }

        Err(FileError::BufferPoolFull)
    }

    /// Write back a resident frame if dirty and clear its identity
    fn evict_frame(&self, state: &mut PoolState, frame: FrameId) -> FileResult<()> {
        let meta = state.meta[frame.index()];
        let Some(key) = meta.key else {
            return Ok(());
        };

        if meta.dirty {
            let data = self.frames[frame.index()].read();
            state.disk(key.file)?.write_page(key.page_id, &data[..])?;
        }
        state.detach(frame, key);

        trace!(
            file = %key.file,
            page_id = key.page_id,
            frame = frame.index(),
            dirty = meta.dirty,
            "evicted page"
        );
        Ok(())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BufferPool")
            .field("capacity", &self.frames.len())
            .field("resident", &state.page_table.len())
            .field("files", &state.files.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        // Flush all dirty pages when the pool is dropped
        if let Err(e) = self.flush_all() {
            warn!(error = %e, "failed to flush buffer pool on drop");
        }
    }
}
