//! Recency ordering of resident frames.
//!
//! An intrusive doubly linked list over frame indices: the head is the most
//! recently used frame, the tail the least recently used. Promote, remove and
//! both ends are O(1).

use super::frame::FrameId;

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    /// Neighbor towards the MRU end
    newer: Option<FrameId>,
    /// Neighbor towards the LRU end
    older: Option<FrameId>,
    linked: bool,
}

#[derive(Debug)]
pub struct UsageList {
    links: Vec<Link>,
    mru: Option<FrameId>,
    lru: Option<FrameId>,
    len: usize,
}

impl UsageList {
    pub fn new(capacity: usize) -> Self {
        Self {
            links: vec![Link::default(); capacity],
            mru: None,
            lru: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, frame: FrameId) -> bool {
        self.links[frame.index()].linked
    }

    /// Most recently used frame
    pub fn mru(&self) -> Option<FrameId> {
        self.mru
    }

    /// Least recently used frame
    pub fn lru(&self) -> Option<FrameId> {
        self.lru
    }

    /// Next frame towards the MRU end
    pub fn newer(&self, frame: FrameId) -> Option<FrameId> {
        self.links[frame.index()].newer
    }

    /// Next frame towards the LRU end
    pub fn older(&self, frame: FrameId) -> Option<FrameId> {
        self.links[frame.index()].older
    }

    /// Move `frame` to the MRU end, linking it if needed
    pub fn touch(&mut self, frame: FrameId) {
        if self.mru == Some(frame) {
            return;
        }
        self.remove(frame);

        let old_mru = self.mru;
        self.links[frame.index()] = Link {
            newer: None,
            older: old_mru,
            linked: true,
        };
        match old_mru {
            Some(old) => self.links[old.index()].newer = Some(frame),
            None => self.lru = Some(frame),
        }
        self.mru = Some(frame);
        self.len += 1;
    }

    /// Unlink `frame`; no-op if it isn't in the list
    pub fn remove(&mut self, frame: FrameId) {
        let link = self.links[frame.index()];
        if !link.linked {
            return;
        }

        match link.newer {
            Some(newer) => self.links[newer.index()].older = link.older,
            None => self.mru = link.older,
        }
        match link.older {
            Some(older) => self.links[older.index()].newer = link.newer,
            None => self.lru = link.newer,
        }

        self.links[frame.index()] = Link::default();
        self.len -= 1;
    }

    /// Frames from the LRU end to the MRU end
    pub fn iter_lru(&self) -> impl Iterator<Item = FrameId> + '_ {
        std::iter::successors(self.lru, |&f| self.newer(f))
    }
}
