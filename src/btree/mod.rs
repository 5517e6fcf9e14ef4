//! Disk-resident B+ tree
//!
//! Every node is one page of the tree's file and is reached only through the
//! shared [`BufferPool`]. A node is decoded into an owned [`Node`], changed in
//! memory and encoded back in a single write; updating a child's parent
//! pointer patches the page in place.
//!
//! A tree-wide latch makes each public operation atomic: lookups share it,
//! anything that writes pages holds it exclusively.
//!
//! Order `L` (leaves) and `I` (internal nodes) mean:
//! - Leaves hold at most `L-1` records, at least `ceil((L-1)/2)` (except root)
//! - Internal nodes hold at most `I-1` keys, at least `ceil(I/2)-1` (except root)
//! - With delayed merge, non-root nodes only need one key

mod error;

#[cfg(test)]
mod tests;

pub use error::{BPlusTreeError, BPlusTreeResult};

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::buffer::{BufferPool, MruPolicy, PageRef, ReplacementPolicy};
use crate::file::FileHandle;
use crate::page::{
    Entry, InternalNode, Key, LeafNode, MAX_INTERNAL_ORDER, MAX_LEAF_ORDER, Node, PAGE_SIZE,
    PageId, Record, Value, cut, patch_parent, record_value_offset,
};
use crate::txn::{LockMode, LockOutcome, Lsn, ResourceId, TxnScope};

/// Default leaf order: the most records a 4KB leaf page holds, plus one
pub const DEFAULT_LEAF_ORDER: usize = MAX_LEAF_ORDER;

/// Default internal order: the most entries a 4KB internal page holds, plus one
pub const DEFAULT_INTERNAL_ORDER: usize = MAX_INTERNAL_ORDER;

/// Deepest descent tolerated before the tree is considered corrupted
const MAX_DEPTH: usize = 64;

/// Shape parameters of a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOptions {
    pub leaf_order: usize,
    pub internal_order: usize,
    /// Only rebalance nodes that become empty
    pub delayed_merge: bool,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            leaf_order: DEFAULT_LEAF_ORDER,
            internal_order: DEFAULT_INTERNAL_ORDER,
            delayed_merge: false,
        }
    }
}

impl TreeOptions {
    pub fn validate(&self) -> BPlusTreeResult<()> {
        if !(3..=MAX_LEAF_ORDER).contains(&self.leaf_order) {
            return Err(BPlusTreeError::InvalidOrder {
                kind: "leaf",
                order: self.leaf_order,
                max: MAX_LEAF_ORDER,
            });
        }
        if !(3..=MAX_INTERNAL_ORDER).contains(&self.internal_order) {
            return Err(BPlusTreeError::InvalidOrder {
                kind: "internal",
                order: self.internal_order,
                max: MAX_INTERNAL_ORDER,
            });
        }
        Ok(())
    }
}

/// Shape summary returned by [`BPlusTree::verify`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub height: usize,
    pub leaf_count: usize,
    pub internal_count: usize,
    pub key_count: usize,
}

/// What [`BPlusTree::delete_entry`] takes out of a node
#[derive(Debug, Clone, Copy)]
enum Removal {
    /// A leaf record
    Record(Key),
    /// The internal entry pointing at a merged-away child
    Child(PageId),
}

/// B+ tree over one page file
#[derive(Debug)]
pub struct BPlusTree {
    pool: Arc<BufferPool>,
    file: FileHandle,
    options: TreeOptions,
    latch: RwLock<()>,
}

impl BPlusTree {
    /// Open the tree stored in `file` (empty if the file has no root yet)
    pub fn new(pool: Arc<BufferPool>, file: FileHandle, options: TreeOptions) -> BPlusTreeResult<Self> {
        options.validate()?;
        Ok(Self {
            pool,
            file,
            options,
            latch: RwLock::new(()),
        })
    }

    pub fn file(&self) -> FileHandle {
        self.file
    }

    pub fn options(&self) -> TreeOptions {
        self.options
    }

    /// Root page, None if the tree is empty
    pub fn root(&self) -> BPlusTreeResult<Option<PageId>> {
        Ok(self.pool.root(self.file)?)
    }

    pub fn is_empty(&self) -> BPlusTreeResult<bool> {
        Ok(self.root()?.is_none())
    }

    /// Number of levels (0 for an empty tree, 1 for a single leaf)
    pub fn height(&self) -> BPlusTreeResult<usize> {
        let _latch = self.latch.read();
        let Some(mut id) = self.root()? else {
            return Ok(0);
        };

        for height in 1..=MAX_DEPTH {
            match self.load(id)? {
                Node::Leaf(_) => return Ok(height),
                Node::Internal(node) => id = node.leftmost,
            }
        }
        Err(too_deep())
    }

    fn leaf_order(&self) -> usize {
        self.options.leaf_order
    }

    fn internal_order(&self) -> usize {
        self.options.internal_order
    }

    /// Fewest keys a non-root node may hold
    fn min_keys(&self, node: &Node) -> usize {
        if self.options.delayed_merge {
            1
        } else if node.is_leaf() {
            cut(self.leaf_order() - 1)
        } else {
            cut(self.internal_order()) - 1
        }
    }

    // ========== Page I/O ==========

    fn load(&self, id: PageId) -> BPlusTreeResult<Node> {
        let mut page = PageRef::new(self.file, id);
        Ok(self.pool.read(&mut page, Node::decode)??)
    }

    fn load_with(&self, id: PageId, policy: &dyn ReplacementPolicy) -> BPlusTreeResult<Node> {
        let mut page = PageRef::new(self.file, id);
        Ok(self.pool.read_with(&mut page, policy, Node::decode)??)
    }

    fn load_leaf(&self, id: PageId, policy: &dyn ReplacementPolicy) -> BPlusTreeResult<LeafNode> {
        match self.load_with(id, policy)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(BPlusTreeError::InvalidState(format!(
                "page {id} should be a leaf"
            ))),
        }
    }

    fn load_internal(&self, id: PageId) -> BPlusTreeResult<InternalNode> {
        match self.load(id)? {
            Node::Internal(node) => Ok(node),
            Node::Leaf(_) => Err(BPlusTreeError::InvalidState(format!(
                "page {id} should be an internal node"
            ))),
        }
    }

    fn store(&self, id: PageId, node: &Node) -> BPlusTreeResult<()> {
        let mut page = PageRef::new(self.file, id);
        Ok(self.pool.write(&mut page, |buf| node.encode(buf))??)
    }

    /// Write `node` to a freshly allocated page
    fn allocate(&self, node: &Node) -> BPlusTreeResult<PageId> {
        let mut page = self.pool.new_page(self.file)?;
        self.pool.write(&mut page, |buf| node.encode(buf))??;
        Ok(page.page_id())
    }

    fn set_parent(&self, id: PageId, parent: Option<PageId>) -> BPlusTreeResult<()> {
        let mut page = PageRef::new(self.file, id);
        self.pool.write(&mut page, |buf| patch_parent(buf, parent))?;
        Ok(())
    }

    fn set_root(&self, root: Option<PageId>) -> BPlusTreeResult<()> {
        Ok(self.pool.set_root(self.file, root)?)
    }

    fn free(&self, id: PageId) -> BPlusTreeResult<()> {
        Ok(self.pool.free_page(self.file, id)?)
    }

    // ========== Search Operations ==========

    /// Find the leaf that should contain `key`
    fn find_leaf(&self, key: Key) -> BPlusTreeResult<Option<(PageId, LeafNode)>> {
        let Some(mut id) = self.root()? else {
            return Ok(None);
        };

        for _ in 0..MAX_DEPTH {
            match self.load(id)? {
                Node::Leaf(leaf) => return Ok(Some((id, leaf))),
                Node::Internal(node) => id = node.child_for(key),
            }
        }
        Err(too_deep())
    }

    /// Look up the value stored under `key`
    pub fn find(&self, key: Key) -> BPlusTreeResult<Option<Value>> {
        let _latch = self.latch.read();
        Ok(self
            .find_leaf(key)?
            .and_then(|(_, leaf)| leaf.search(key).copied()))
    }

    /// All records with `lo <= key <= hi`, in key order
    pub fn find_range(&self, lo: Key, hi: Key) -> BPlusTreeResult<Vec<(Key, Value)>> {
        let mut results = Vec::new();
        if lo > hi {
            return Ok(results);
        }

        let _latch = self.latch.read();
        let Some((_, mut leaf)) = self.find_leaf(lo)? else {
            return Ok(results);
        };

        loop {
            for record in &leaf.records {
                if record.key > hi {
                    return Ok(results);
                }
                if record.key >= lo {
                    results.push((record.key, record.value));
                }
            }

            let Some(next) = leaf.sibling else {
                return Ok(results);
            };
            // A scan touches every leaf once; keep it from flushing the working set
            leaf = self.load_leaf(next, &MruPolicy)?;
        }
    }

    // ========== Insert Operations ==========

    /// Insert a new record; the key must not be present yet
    pub fn insert(&self, key: Key, value: Value) -> BPlusTreeResult<()> {
        let record = Record::new(key, value);
        let _latch = self.latch.write();

        let Some((leaf_id, mut leaf)) = self.find_leaf(key)? else {
            return self.start_new_tree(record);
        };

        let slot = match leaf.position(key) {
            Ok(_) => return Err(BPlusTreeError::DuplicateKey(key)),
            Err(slot) => slot,
        };

        if leaf.len() < self.leaf_order() - 1 {
            leaf.records.insert(slot, record);
            return self.store(leaf_id, &Node::Leaf(leaf));
        }

        self.split_leaf(leaf_id, leaf, slot, record)
    }

    fn start_new_tree(&self, record: Record) -> BPlusTreeResult<()> {
        let mut leaf = LeafNode::new(None);
        leaf.records.push(record);
        let root = self.allocate(&Node::Leaf(leaf))?;
        self.set_root(Some(root))
    }

    /// Split a full leaf while inserting `record` at `slot`
    fn split_leaf(
        &self,
        leaf_id: PageId,
        mut leaf: LeafNode,
        slot: usize,
        record: Record,
    ) -> BPlusTreeResult<()> {
        leaf.records.insert(slot, record);
        let right_records = leaf.records.split_off(cut(self.leaf_order() - 1));
        let right_key = right_records
            .first()
            .map(|r| r.key)
            .ok_or_else(|| BPlusTreeError::InvalidState("leaf split produced an empty half".into()))?;

        let right = LeafNode {
            parent: leaf.parent,
            sibling: leaf.sibling,
            records: right_records,
        };
        let right_id = self.allocate(&Node::Leaf(right))?;

        leaf.sibling = Some(right_id);
        let parent = leaf.parent;
        self.store(leaf_id, &Node::Leaf(leaf))?;

        self.insert_into_parent(leaf_id, parent, right_key, right_id)
    }

    /// Hook `right` into the tree next to `left`, separated by `key`
    fn insert_into_parent(
        &self,
        left_id: PageId,
        parent: Option<PageId>,
        key: Key,
        right_id: PageId,
    ) -> BPlusTreeResult<()> {
        let Some(parent_id) = parent else {
            return self.insert_into_new_root(left_id, key, right_id);
        };

        let mut parent = self.load_internal(parent_id)?;
        let index = parent
            .child_index(left_id)
            .ok_or_else(|| not_a_child(left_id, parent_id))?;

        if parent.len() < self.internal_order() - 1 {
            parent.entries.insert(
                index,
                Entry {
                    key,
                    child: right_id,
                },
            );
            return self.store(parent_id, &Node::Internal(parent));
        }

        self.split_internal(parent_id, parent, index, key, right_id)
    }

    fn insert_into_new_root(&self, left_id: PageId, key: Key, right_id: PageId) -> BPlusTreeResult<()> {
        let root = InternalNode::from_parts(None, &[left_id, right_id], &[key]);
        let root_id = self.allocate(&Node::Internal(root))?;

        self.set_parent(left_id, Some(root_id))?;
        self.set_parent(right_id, Some(root_id))?;
        self.set_root(Some(root_id))?;

        debug!(root = root_id, left = left_id, right = right_id, "root split");
        Ok(())
    }

    /// Split a full internal node while inserting `key`/`right_id` as entry `index`
    fn split_internal(
        &self,
        node_id: PageId,
        node: InternalNode,
        index: usize,
        key: Key,
        right_id: PageId,
    ) -> BPlusTreeResult<()> {
        let mut keys: Vec<Key> = node.keys().collect();
        let mut children: Vec<PageId> = node.children().collect();
        keys.insert(index, key);
        children.insert(index + 1, right_id);

        // The middle key moves up instead of staying in either half
        let split = cut(self.internal_order());
        let right_keys = keys.split_off(split);
        let k_prime = keys
            .pop()
            .ok_or_else(|| BPlusTreeError::InvalidState("internal split produced an empty half".into()))?;
        let right_children = children.split_off(split);

        let left = InternalNode::from_parts(node.parent, &children, &keys);
        let right = InternalNode::from_parts(node.parent, &right_children, &right_keys);

        let new_id = self.allocate(&Node::Internal(right))?;
        self.store(node_id, &Node::Internal(left))?;
        for &child in &right_children {
            self.set_parent(child, Some(new_id))?;
        }

        self.insert_into_parent(node_id, node.parent, k_prime, new_id)
    }

    // ========== Delete Operations ==========

    /// Remove `key`, returning the value it held
    pub fn remove(&self, key: Key) -> BPlusTreeResult<Value> {
        let _latch = self.latch.write();
        let (leaf_id, leaf) = self
            .find_leaf(key)?
            .ok_or(BPlusTreeError::KeyNotFound(key))?;
        let value = *leaf.search(key).ok_or(BPlusTreeError::KeyNotFound(key))?;

        self.delete_entry(leaf_id, Node::Leaf(leaf), Removal::Record(key))?;
        Ok(value)
    }

    fn delete_entry(&self, node_id: PageId, mut node: Node, removal: Removal) -> BPlusTreeResult<()> {
        let removed = match (&mut node, removal) {
            (Node::Leaf(leaf), Removal::Record(key)) => leaf.remove(key).is_some(),
            (Node::Internal(internal), Removal::Child(child)) => {
                internal.remove_child(child).is_some()
            }
            _ => false,
        };
        if !removed {
            return Err(BPlusTreeError::InvalidState(format!(
                "page {node_id} has no entry for {removal:?}"
            )));
        }

        if self.root()? == Some(node_id) {
            return self.shrink_root(node_id, node);
        }

        if node.len() >= self.min_keys(&node) {
            return self.store(node_id, &node);
        }

        self.rebalance(node_id, node)
    }

    fn shrink_root(&self, root_id: PageId, root: Node) -> BPlusTreeResult<()> {
        if !root.is_empty() {
            return self.store(root_id, &root);
        }

        match root {
            Node::Leaf(_) => {
                self.free(root_id)?;
                self.set_root(None)?;
                debug!(root = root_id, "tree emptied");
            }
            Node::Internal(node) => {
                // Only one child left: it becomes the root
                let child = node.leftmost;
                self.set_parent(child, None)?;
                self.set_root(Some(child))?;
                self.free(root_id)?;
                debug!(old_root = root_id, root = child, "root shrunk");
            }
        }
        Ok(())
    }

    /// Merge an under-full node with a neighbor, or borrow from it
    fn rebalance(&self, node_id: PageId, node: Node) -> BPlusTreeResult<()> {
        let parent_id = node.parent().ok_or_else(|| {
            BPlusTreeError::InvalidState(format!("non-root page {node_id} has no parent"))
        })?;
        let parent = self.load_internal(parent_id)?;
        let index = parent
            .child_index(node_id)
            .ok_or_else(|| not_a_child(node_id, parent_id))?;

        // The leftmost child pairs with its right neighbor, every other node with its left one
        let (neighbor_index, k_prime_index) = match index {
            0 => (1, 0),
            i => (i - 1, i - 1),
        };
        let neighbor_id = parent.child_at(neighbor_index).ok_or_else(|| {
            BPlusTreeError::InvalidState(format!("page {parent_id} has a single child"))
        })?;
        let k_prime = separator(&parent, k_prime_index)?;
        let neighbor = self.load(neighbor_id)?;

        let capacity = if node.is_leaf() {
            self.leaf_order()
        } else {
            self.internal_order() - 1
        };

        if neighbor.len() + node.len() < capacity {
            if index == 0 {
                self.coalesce(parent_id, parent, (node_id, node), (neighbor_id, neighbor), k_prime)
            } else {
                self.coalesce(parent_id, parent, (neighbor_id, neighbor), (node_id, node), k_prime)
            }
        } else {
            self.redistribute(
                parent_id,
                parent,
                (node_id, node),
                (neighbor_id, neighbor),
                index == 0,
                k_prime_index,
            )
        }
    }

    /// Move everything from `right` into `left` and drop `right` from the parent
    fn coalesce(
        &self,
        parent_id: PageId,
        parent: InternalNode,
        (left_id, left): (PageId, Node),
        (right_id, right): (PageId, Node),
        k_prime: Key,
    ) -> BPlusTreeResult<()> {
        let (merged, moved) = match (left, right) {
            (Node::Leaf(mut left), Node::Leaf(right)) => {
                left.records.extend(right.records);
                left.sibling = right.sibling;
                (Node::Leaf(left), Vec::new())
            }
            (Node::Internal(mut left), Node::Internal(right)) => {
                let moved: Vec<PageId> = right.children().collect();
                left.entries.push(Entry {
                    key: k_prime,
                    child: right.leftmost,
                });
                left.entries.extend(right.entries);
                (Node::Internal(left), moved)
            }
            _ => {
                return Err(BPlusTreeError::InvalidState(format!(
                    "siblings {left_id} and {right_id} are on different levels"
                )));
            }
        };

        self.store(left_id, &merged)?;
        for child in moved {
            self.set_parent(child, Some(left_id))?;
        }
        self.free(right_id)?;

        self.delete_entry(parent_id, Node::Internal(parent), Removal::Child(right_id))
    }

    /// Shift one record or child from `neighbor` into `node` through the parent
    fn redistribute(
        &self,
        parent_id: PageId,
        mut parent: InternalNode,
        (node_id, node): (PageId, Node),
        (neighbor_id, neighbor): (PageId, Node),
        node_is_leftmost: bool,
        k_prime_index: usize,
    ) -> BPlusTreeResult<()> {
        let empty_neighbor =
            || BPlusTreeError::InvalidState(format!("neighbor {neighbor_id} has nothing to lend"));
        let k_prime = separator(&parent, k_prime_index)?;

        let (node, neighbor) = match (node, neighbor) {
            (Node::Leaf(mut node), Node::Leaf(mut neighbor)) => {
                let new_separator = if node_is_leftmost {
                    if neighbor.records.is_empty() {
                        return Err(empty_neighbor());
                    }
                    node.records.push(neighbor.records.remove(0));
                    neighbor.min_key().ok_or_else(empty_neighbor)?
                } else {
                    let moved = neighbor.records.pop().ok_or_else(empty_neighbor)?;
                    node.records.insert(0, moved);
                    moved.key
                };
                set_separator(&mut parent, k_prime_index, new_separator)?;
                (Node::Leaf(node), Node::Leaf(neighbor))
            }
            (Node::Internal(mut node), Node::Internal(mut neighbor)) => {
                let moved_child = if node_is_leftmost {
                    if neighbor.entries.is_empty() {
                        return Err(empty_neighbor());
                    }
                    let first = neighbor.entries.remove(0);
                    let moved = neighbor.leftmost;
                    node.entries.push(Entry {
                        key: k_prime,
                        child: moved,
                    });
                    neighbor.leftmost = first.child;
                    set_separator(&mut parent, k_prime_index, first.key)?;
                    moved
                } else {
                    let last = neighbor.entries.pop().ok_or_else(empty_neighbor)?;
                    node.entries.insert(
                        0,
                        Entry {
                            key: k_prime,
                            child: node.leftmost,
                        },
                    );
                    node.leftmost = last.child;
                    set_separator(&mut parent, k_prime_index, last.key)?;
                    last.child
                };
                self.set_parent(moved_child, Some(node_id))?;
                (Node::Internal(node), Node::Internal(neighbor))
            }
            _ => {
                return Err(BPlusTreeError::InvalidState(format!(
                    "siblings {node_id} and {neighbor_id} are on different levels"
                )));
            }
        };

        self.store(node_id, &node)?;
        self.store(neighbor_id, &neighbor)?;
        self.store(parent_id, &Node::Internal(parent))
    }

    // ========== Update Operations ==========

    /// Overwrite the value of an existing key
    pub fn update(&self, key: Key, value: Value) -> BPlusTreeResult<()> {
        let _latch = self.latch.write();
        let (leaf_id, mut leaf) = self
            .find_leaf(key)?
            .ok_or(BPlusTreeError::KeyNotFound(key))?;
        let slot = leaf
            .position(key)
            .map_err(|_| BPlusTreeError::KeyNotFound(key))?;

        leaf.records[slot].value = value;
        self.store(leaf_id, &Node::Leaf(leaf))
    }

    // ========== Transactional Operations ==========

    fn lock(&self, scope: &TxnScope<'_>, page: PageId, slot: usize, mode: LockMode) -> BPlusTreeResult<ResourceId> {
        let resource = ResourceId {
            table: scope.table,
            page,
            record: slot,
        };
        match scope.locks.acquire(scope.txn, resource, mode) {
            LockOutcome::Granted => Ok(resource),
            LockOutcome::Blocked => Err(BPlusTreeError::LockConflict(resource)),
        }
    }

    /// [`find`](Self::find) under a shared record lock
    pub fn find_in(&self, scope: &TxnScope<'_>, key: Key) -> BPlusTreeResult<Option<Value>> {
        let _latch = self.latch.read();
        let Some((leaf_id, leaf)) = self.find_leaf(key)? else {
            return Ok(None);
        };
        let Ok(slot) = leaf.position(key) else {
            return Ok(None);
        };

        self.lock(scope, leaf_id, slot, LockMode::Shared)?;
        Ok(Some(leaf.records[slot].value))
    }

    /// [`update`](Self::update) under an exclusive record lock, logging the
    /// before and after images first
    pub fn update_in(&self, scope: &TxnScope<'_>, key: Key, value: Value) -> BPlusTreeResult<Lsn> {
        let _latch = self.latch.write();
        let (leaf_id, leaf) = self
            .find_leaf(key)?
            .ok_or(BPlusTreeError::KeyNotFound(key))?;
        let slot = leaf
            .position(key)
            .map_err(|_| BPlusTreeError::KeyNotFound(key))?;

        let resource = self.lock(scope, leaf_id, slot, LockMode::Exclusive)?;
        let before = leaf.records[slot].value;
        let offset = record_value_offset(slot);
        let lsn = scope
            .log
            .log_update(scope.txn, resource, offset, before.as_bytes(), value.as_bytes());

        self.write_bytes(leaf_id, offset, value.as_bytes())?;
        Ok(lsn)
    }

    /// Put a logged before-image back at `offset` of leaf `page`
    pub fn restore_image(&self, page: PageId, offset: usize, image: &[u8]) -> BPlusTreeResult<()> {
        let _latch = self.latch.write();
        self.write_bytes(page, offset, image)
    }

    fn write_bytes(&self, id: PageId, offset: usize, bytes: &[u8]) -> BPlusTreeResult<()> {
        let end = offset + bytes.len();
        if end > PAGE_SIZE {
            return Err(BPlusTreeError::InvalidState(format!(
                "{} bytes at offset {offset} overrun page {id}",
                bytes.len()
            )));
        }
        let mut page = PageRef::new(self.file, id);
        self.pool
            .write(&mut page, |buf| buf[offset..end].copy_from_slice(bytes))?;
        Ok(())
    }

    // ========== Whole-tree Operations ==========

    /// Free every page of the tree and leave it empty; returns the pages freed
    pub fn destroy_tree(&self) -> BPlusTreeResult<usize> {
        let _latch = self.latch.write();
        let Some(root) = self.root()? else {
            return Ok(0);
        };

        let freed = self.destroy_subtree(root, 1)?;
        self.set_root(None)?;
        debug!(freed, "tree destroyed");
        Ok(freed)
    }

    fn destroy_subtree(&self, id: PageId, depth: usize) -> BPlusTreeResult<usize> {
        if depth > MAX_DEPTH {
            return Err(too_deep());
        }

        let mut freed = 0;
        if let Node::Internal(node) = self.load_with(id, &MruPolicy)? {
            for child in node.children() {
                freed += self.destroy_subtree(child, depth + 1)?;
            }
        }
        self.free(id)?;
        Ok(freed + 1)
    }

    /// Walk the whole tree and check its structural invariants
    pub fn verify(&self) -> BPlusTreeResult<TreeStats> {
        let mut stats = TreeStats::default();
        let _latch = self.latch.read();
        let Some(root) = self.root()? else {
            return Ok(stats);
        };

        let mut leaves = Vec::new();
        stats.height = self.verify_node(root, None, (None, None), 1, &mut stats, &mut leaves)?;

        // Leaves in traversal order must form the sibling chain
        for pair in leaves.windows(2) {
            let (id, sibling) = pair[0];
            let (next, _) = pair[1];
            if sibling != Some(next) {
                return Err(BPlusTreeError::InvalidState(format!(
                    "leaf {id} links to {sibling:?} instead of {next}"
                )));
            }
        }
        if let Some(&(id, Some(sibling))) = leaves.last() {
            return Err(BPlusTreeError::InvalidState(format!(
                "last leaf {id} links to {sibling}"
            )));
        }

        Ok(stats)
    }

    /// Check the subtree at `id` and return the depth of its leaves
    fn verify_node(
        &self,
        id: PageId,
        parent: Option<PageId>,
        (lo, hi): (Option<Key>, Option<Key>),
        depth: usize,
        stats: &mut TreeStats,
        leaves: &mut Vec<(PageId, Option<PageId>)>,
    ) -> BPlusTreeResult<usize> {
        let invalid = |msg: String| BPlusTreeError::InvalidState(format!("page {id}: {msg}"));

        if depth > MAX_DEPTH {
            return Err(too_deep());
        }

        let node = self.load(id)?;
        if node.parent() != parent {
            return Err(invalid(format!(
                "parent is {:?}, expected {parent:?}",
                node.parent()
            )));
        }

        let (keys, order): (Vec<Key>, usize) = match &node {
            Node::Leaf(leaf) => (leaf.records.iter().map(|r| r.key).collect(), self.leaf_order()),
            Node::Internal(internal) => (internal.keys().collect(), self.internal_order()),
        };

        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("keys out of order".into()));
        }
        if let Some(&first) = keys.first()
            && lo.is_some_and(|lo| first < lo)
        {
            return Err(invalid(format!("key {first} below separator {lo:?}")));
        }
        if let Some(&last) = keys.last()
            && hi.is_some_and(|hi| last >= hi)
        {
            return Err(invalid(format!("key {last} not below separator {hi:?}")));
        }

        if keys.len() > order - 1 {
            return Err(invalid(format!("{} keys exceed order {order}", keys.len())));
        }
        let min = if parent.is_none() { 1 } else { self.min_keys(&node) };
        if keys.len() < min {
            return Err(invalid(format!("{} keys, need at least {min}", keys.len())));
        }

        match node {
            Node::Leaf(leaf) => {
                stats.leaf_count += 1;
                stats.key_count += leaf.len();
                leaves.push((id, leaf.sibling));
                Ok(depth)
            }
            Node::Internal(internal) => {
                stats.internal_count += 1;

                let children: Vec<PageId> = internal.children().collect();
                let mut leaf_depth = None;
                for (i, &child) in children.iter().enumerate() {
                    let child_lo = if i == 0 { lo } else { Some(keys[i - 1]) };
                    let child_hi = keys.get(i).copied().or(hi);
                    let d = self.verify_node(child, Some(id), (child_lo, child_hi), depth + 1, stats, leaves)?;

                    match leaf_depth {
                        None => leaf_depth = Some(d),
                        Some(expected) if expected != d => {
                            return Err(invalid(format!("leaves at depths {expected} and {d}")));
                        }
                        Some(_) => {}
                    }
                }
                leaf_depth.ok_or_else(|| invalid("internal node without children".into()))
            }
        }
    }
}

fn separator(parent: &InternalNode, index: usize) -> BPlusTreeResult<Key> {
    parent.entries.get(index).map(|e| e.key).ok_or_else(|| {
        BPlusTreeError::InvalidState(format!("separator {index} missing"))
    })
}

fn set_separator(parent: &mut InternalNode, index: usize, key: Key) -> BPlusTreeResult<()> {
    let entry = parent.entries.get_mut(index).ok_or_else(|| {
        BPlusTreeError::InvalidState(format!("separator {index} missing"))
    })?;
    entry.key = key;
    Ok(())
}

fn not_a_child(child: PageId, parent: PageId) -> BPlusTreeError {
    BPlusTreeError::InvalidState(format!("page {child} is not a child of {parent}"))
}

fn too_deep() -> BPlusTreeError {
    BPlusTreeError::InvalidState(format!("tree deeper than {MAX_DEPTH} levels"))
}
