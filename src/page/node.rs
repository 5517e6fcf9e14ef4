use std::fmt;

use super::error::{CodecError, CodecResult};
use super::{Key, PageId, VALUE_SIZE};

/// Fixed-size opaque value stored next to each leaf key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value([u8; VALUE_SIZE]);

impl Value {
    /// An all-zero value
    pub const fn zeroed() -> Self {
        Self([0u8; VALUE_SIZE])
    }

    pub const fn from_array(bytes: [u8; VALUE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy `bytes` into a value, zero-padding the remainder
    pub fn new(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() > VALUE_SIZE {
            return Err(CodecError::ValueTooLarge(bytes.len()));
        }
        let mut buf = [0u8; VALUE_SIZE];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; VALUE_SIZE] {
        &self.0
    }

    /// The value with trailing zero padding stripped
    pub fn payload(&self) -> &[u8] {
        let end = self.0.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        &self.0[..end]
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl TryFrom<&[u8]> for Value {
    type Error = CodecError;

    fn try_from(bytes: &[u8]) -> CodecResult<Self> {
        Self::new(bytes)
    }
}

impl TryFrom<&str> for Value {
    type Error = CodecError;

    fn try_from(s: &str) -> CodecResult<Self> {
        Self::new(s.as_bytes())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.payload()))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:?})", String::from_utf8_lossy(self.payload()))
    }
}

/// One key/value slot of a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub key: Key,
    pub value: Value,
}

impl Record {
    pub fn new(key: Key, value: Value) -> Self {
        Self { key, value }
    }
}

/// One separator of an internal node: `child` holds keys >= `key`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub child: PageId,
}

/// Leaf node: sorted records, linked to the next leaf
#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
    pub parent: Option<PageId>,
    /// Link to next leaf for range queries
    pub sibling: Option<PageId>,
    pub records: Vec<Record>,
}

impl LeafNode {
    /// Create a new empty leaf node
    pub fn new(parent: Option<PageId>) -> Self {
        Self {
            parent,
            sibling: None,
            records: Vec::new(),
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Linear scan for `key`: `Ok(slot)` if present, `Err(slot)` where it would be inserted
    pub fn position(&self, key: Key) -> Result<usize, usize> {
        for (i, record) in self.records.iter().enumerate() {
            if record.key == key {
                return Ok(i);
            }
            if record.key > key {
                return Err(i);
            }
        }
        Err(self.records.len())
    }

    /// Search for a key, return its value
    pub fn search(&self, key: Key) -> Option<&Value> {
        self.position(key).ok().map(|i| &self.records[i].value)
    }

    /// Remove the record with the given key
    pub fn remove(&mut self, key: Key) -> Option<Record> {
        let slot = self.position(key).ok()?;
        Some(self.records.remove(slot))
    }

    pub fn min_key(&self) -> Option<Key> {
        self.records.first().map(|r| r.key)
    }

    pub fn max_key(&self) -> Option<Key> {
        self.records.last().map(|r| r.key)
    }
}

/// Internal node.
///
/// The leftmost child is stored out of band; `entries[i].child` holds the
/// subtree of keys in `[entries[i].key, entries[i + 1].key)`.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalNode {
    pub parent: Option<PageId>,
    pub leftmost: PageId,
    pub entries: Vec<Entry>,
}

impl InternalNode {
    pub fn new(parent: Option<PageId>, leftmost: PageId) -> Self {
        Self {
            parent,
            leftmost,
            entries: Vec::new(),
        }
    }

    /// Build a node from `children.len() == keys.len() + 1` parts
    pub fn from_parts(parent: Option<PageId>, children: &[PageId], keys: &[Key]) -> Self {
        debug_assert_eq!(children.len(), keys.len() + 1);
        Self {
            parent,
            leftmost: children[0],
            entries: keys
                .iter()
                .zip(&children[1..])
                .map(|(&key, &child)| Entry { key, child })
                .collect(),
        }
    }

    /// Number of keys (children - 1)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Child whose subtree may contain `key`: the entry with the largest key <= `key`
    pub fn child_for(&self, key: Key) -> PageId {
        let mut child = self.leftmost;
        for entry in &self.entries {
            if key < entry.key {
                break;
            }
            child = entry.child;
        }
        child
    }

    /// Position of `child` among the children, 0 being the leftmost
    pub fn child_index(&self, child: PageId) -> Option<usize> {
        if self.leftmost == child {
            return Some(0);
        }
        self.entries
            .iter()
            .position(|e| e.child == child)
            .map(|i| i + 1)
    }

    /// Child at `index`, 0 being the leftmost
    pub fn child_at(&self, index: usize) -> Option<PageId> {
        match index {
            0 => Some(self.leftmost),
            i => self.entries.get(i - 1).map(|e| e.child),
        }
    }

    /// All children, leftmost first
    pub fn children(&self) -> impl Iterator<Item = PageId> + '_ {
        std::iter::once(self.leftmost).chain(self.entries.iter().map(|e| e.child))
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.entries.iter().map(|e| e.key)
    }

    /// Remove the entry pointing at `child` (never the leftmost child)
    pub fn remove_child(&mut self, child: PageId) -> Option<Entry> {
        let i = self.entries.iter().position(|e| e.child == child)?;
        Some(self.entries.remove(i))
    }
}

/// B+ tree node (either internal or leaf)
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn parent(&self) -> Option<PageId> {
        match self {
            Node::Internal(node) => node.parent,
            Node::Leaf(node) => node.parent,
        }
    }

    pub fn set_parent(&mut self, parent: Option<PageId>) {
        match self {
            Node::Internal(node) => node.parent = parent,
            Node::Leaf(node) => node.parent = parent,
        }
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        match self {
            Node::Internal(node) => node.len(),
            Node::Leaf(node) => node.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Internal(_) => None,
            Node::Leaf(node) => Some(node),
        }
    }

    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Internal(node) => Some(node),
            Node::Leaf(_) => None,
        }
    }
}
