//! On-disk page layouts
//!
//! Every page is a fixed 4096-byte block. Page 0 holds the file header; every
//! other page is either a link in the free list or a B+ tree node. The block
//! is decoded once into a [`Page`] and re-encoded only when written back.
//!
//! Node header layout (128 bytes, little-endian):
//! - `0..8`     parent page id (0 = none)
//! - `8..12`    is_leaf (1 = leaf, 0 = internal)
//! - `12..16`   key count
//! - `120..128` right sibling (leaf) or leftmost child (internal)

mod codec;
mod error;
mod node;

pub use codec::{patch_parent, record_value_offset};
pub use error::{CodecError, CodecResult};
pub use node::{Entry, InternalNode, LeafNode, Node, Record, Value};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u64;

/// Key type stored in leaf records and internal entries
pub type Key = i64;

/// Page 0 always holds the file header
pub const HEADER_PAGE_ID: PageId = 0;

/// Size of the common node header
pub const NODE_HEADER_SIZE: usize = 128;

/// Size of the opaque value stored next to each leaf key
pub const VALUE_SIZE: usize = 120;

/// Size of one leaf record (key + value)
pub const RECORD_SIZE: usize = 8 + VALUE_SIZE;

/// Size of one internal entry (key + child id)
pub const ENTRY_SIZE: usize = 16;

/// Maximum records a leaf page can physically hold
pub const LEAF_CAPACITY: usize = (PAGE_SIZE - NODE_HEADER_SIZE) / RECORD_SIZE;

/// Maximum entries an internal page can physically hold
pub const INTERNAL_CAPACITY: usize = (PAGE_SIZE - NODE_HEADER_SIZE) / ENTRY_SIZE;

/// Largest leaf order the page layout supports (`LEAF_CAPACITY + 1`)
pub const MAX_LEAF_ORDER: usize = LEAF_CAPACITY + 1;

/// Largest internal order the page layout supports (`INTERNAL_CAPACITY + 1`)
pub const MAX_INTERNAL_ORDER: usize = INTERNAL_CAPACITY + 1;

/// Contents of page 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Head of the free-page stack
    pub free_head: Option<PageId>,
    /// Root of the B+ tree (None if the tree is empty)
    pub root: Option<PageId>,
    /// Total number of pages in the file, header included
    pub page_count: u64,
}

impl FileHeader {
    /// Header of a freshly created file: only page 0 exists
    pub fn new() -> Self {
        Self {
            free_head: None,
            root: None,
            page_count: 1,
        }
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// A reclaimed page waiting on the free list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreePage {
    pub next: Option<PageId>,
}

/// How a raw block should be interpreted.
///
/// Free pages and node pages share offset 0, so the caller always knows
/// from context which layout it expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Header,
    Free,
    Node,
}

/// A decoded page
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    Header(FileHeader),
    Free(FreePage),
    Node(Node),
}

impl Page {
    /// Decode a raw block as the given kind
    pub fn decode(kind: PageKind, buf: &[u8]) -> CodecResult<Self> {
        codec::check_len(buf)?;
        Ok(match kind {
            PageKind::Header => Page::Header(codec::decode_header(buf)?),
            PageKind::Free => Page::Free(codec::decode_free(buf)),
            PageKind::Node => Page::Node(codec::decode_node(buf)?),
        })
    }

    /// Encode into a raw block, zeroing every byte the layout does not use
    pub fn encode(&self, buf: &mut [u8]) -> CodecResult<()> {
        codec::check_len(buf)?;
        buf.fill(0);
        match self {
            Page::Header(header) => codec::encode_header(header, buf),
            Page::Free(free) => codec::encode_free(free, buf),
            Page::Node(node) => codec::encode_node(node, buf)?,
        }
        Ok(())
    }

    /// Encode into a freshly allocated block
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.encode(&mut buf)?;
        Ok(buf)
    }

    pub fn kind(&self) -> PageKind {
        match self {
            Page::Header(_) => PageKind::Header,
            Page::Free(_) => PageKind::Free,
            Page::Node(_) => PageKind::Node,
        }
    }
}

impl FileHeader {
    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        codec::check_len(buf)?;
        codec::decode_header(buf)
    }
}

impl FreePage {
    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        codec::check_len(buf)?;
        Ok(codec::decode_free(buf))
    }
}

impl Node {
    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        codec::check_len(buf)?;
        codec::decode_node(buf)
    }

    /// Encode in place; bytes past the used slots are zeroed
    pub fn encode(&self, buf: &mut [u8]) -> CodecResult<()> {
        codec::check_len(buf)?;
        buf.fill(0);
        codec::encode_node(self, buf)
    }
}

/// `ceil(n / 2)`, the split point used by both node kinds
pub fn cut(n: usize) -> usize {
    n.div_ceil(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(s: &str) -> Value {
        Value::try_from(s).unwrap()
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(LEAF_CAPACITY, 31);
        assert_eq!(INTERNAL_CAPACITY, 248);
        assert_eq!(MAX_LEAF_ORDER, 32);
        assert_eq!(MAX_INTERNAL_ORDER, 249);
        assert_eq!(cut(31), 16);
        assert_eq!(cut(249), 125);
        assert_eq!(cut(3), 2);
    }

    #[test]
    fn test_header_layout() {
        let header = FileHeader {
            free_head: Some(7),
            root: Some(3),
            page_count: 16,
        };
        let buf = Page::Header(header).to_bytes().unwrap();

        assert_eq!(&buf[0..8], &7u64.to_le_bytes());
        assert_eq!(&buf[8..16], &3u64.to_le_bytes());
        assert_eq!(&buf[16..24], &16u64.to_le_bytes());
        assert!(buf[24..].iter().all(|&b| b == 0));

        assert_eq!(
            Page::decode(PageKind::Header, &buf).unwrap(),
            Page::Header(header)
        );
    }

    #[test]
    fn test_empty_header_uses_zero_for_none() {
        let buf = Page::Header(FileHeader::new()).to_bytes().unwrap();
        assert!(buf[0..16].iter().all(|&b| b == 0));

        let Page::Header(header) = Page::decode(PageKind::Header, &buf).unwrap() else {
            panic!("expected header");
        };
        assert_eq!(header.free_head, None);
        assert_eq!(header.root, None);
        assert_eq!(header.page_count, 1);
    }

    #[test]
    fn test_header_with_zero_page_count_is_rejected() {
        let buf = vec![0u8; PAGE_SIZE];
        let result = Page::decode(PageKind::Header, &buf);
        assert!(matches!(result, Err(CodecError::CorruptedHeader(_))));
    }

    #[test]
    fn test_free_page_layout() {
        let buf = Page::Free(FreePage { next: Some(42) }).to_bytes().unwrap();
        assert_eq!(&buf[0..8], &42u64.to_le_bytes());

        let decoded = Page::decode(PageKind::Free, &buf).unwrap();
        assert_eq!(decoded, Page::Free(FreePage { next: Some(42) }));
    }

    #[test]
    fn test_leaf_layout() {
        let mut leaf = LeafNode::new(Some(9));
        leaf.sibling = Some(12);
        leaf.records.push(Record::new(-5, value("minus five")));
        leaf.records.push(Record::new(8, value("eight")));

        let buf = Page::Node(Node::Leaf(leaf.clone())).to_bytes().unwrap();

        assert_eq!(&buf[0..8], &9u64.to_le_bytes());
        assert_eq!(&buf[8..12], &1u32.to_le_bytes());
        assert_eq!(&buf[12..16], &2u32.to_le_bytes());
        assert_eq!(&buf[120..128], &12u64.to_le_bytes());
        assert_eq!(&buf[128..136], &(-5i64).to_le_bytes());
        assert_eq!(&buf[136..146], b"minus five");
        assert_eq!(&buf[256..264], &8i64.to_le_bytes());
        assert_eq!(record_value_offset(1), 264);

        let decoded = Page::decode(PageKind::Node, &buf).unwrap();
        assert_eq!(decoded, Page::Node(Node::Leaf(leaf)));
    }

    #[test]
    fn test_internal_layout() {
        let mut node = InternalNode::new(None, 4);
        node.entries.push(Entry { key: 10, child: 5 });
        node.entries.push(Entry { key: 20, child: 6 });

        let buf = Page::Node(Node::Internal(node.clone())).to_bytes().unwrap();

        assert_eq!(&buf[0..8], &0u64.to_le_bytes());
        assert_eq!(&buf[8..12], &0u32.to_le_bytes());
        assert_eq!(&buf[12..16], &2u32.to_le_bytes());
        assert_eq!(&buf[120..128], &4u64.to_le_bytes());
        assert_eq!(&buf[128..136], &10i64.to_le_bytes());
        assert_eq!(&buf[136..144], &5u64.to_le_bytes());
        assert_eq!(&buf[144..152], &20i64.to_le_bytes());
        assert_eq!(&buf[152..160], &6u64.to_le_bytes());

        let decoded = Page::decode(PageKind::Node, &buf).unwrap();
        assert_eq!(decoded, Page::Node(Node::Internal(node)));
    }

    #[test]
    fn test_full_leaf_fits() {
        let mut leaf = LeafNode::new(None);
        for i in 0..LEAF_CAPACITY as i64 {
            leaf.records.push(Record::new(i, value("x")));
        }
        let buf = Page::Node(Node::Leaf(leaf)).to_bytes().unwrap();
        assert_eq!(buf.len(), PAGE_SIZE);

        leaf = match Page::decode(PageKind::Node, &buf).unwrap() {
            Page::Node(Node::Leaf(leaf)) => leaf,
            other => panic!("unexpected page {:?}", other.kind()),
        };
        assert_eq!(leaf.len(), LEAF_CAPACITY);
    }

    #[test]
    fn test_overfull_nodes_are_rejected() {
        let mut leaf = LeafNode::new(None);
        for i in 0..=LEAF_CAPACITY as i64 {
            leaf.records.push(Record::new(i, Value::zeroed()));
        }
        let result = Page::Node(Node::Leaf(leaf)).to_bytes();
        assert!(matches!(result, Err(CodecError::TooManyKeys { .. })));

        let mut buf = vec![0u8; PAGE_SIZE];
        buf[8..12].copy_from_slice(&1u32.to_le_bytes());
        buf[12..16].copy_from_slice(&(LEAF_CAPACITY as u32 + 1).to_le_bytes());
        let result = Page::decode(PageKind::Node, &buf);
        assert!(matches!(result, Err(CodecError::TooManyKeys { .. })));
    }

    #[test]
    fn test_invalid_node_tag() {
        let mut buf = vec![0u8; PAGE_SIZE];
        buf[8..12].copy_from_slice(&7u32.to_le_bytes());
        let result = Page::decode(PageKind::Node, &buf);
        assert!(matches!(result, Err(CodecError::InvalidNodeTag(7))));
    }

    #[test]
    fn test_internal_without_leftmost_child() {
        let buf = vec![0u8; PAGE_SIZE];
        let result = Page::decode(PageKind::Node, &buf);
        assert!(matches!(result, Err(CodecError::MissingChild)));
    }

    #[test]
    fn test_patch_parent() {
        let leaf = LeafNode::new(Some(3));
        let mut buf = Page::Node(Node::Leaf(leaf)).to_bytes().unwrap();

        patch_parent(&mut buf, Some(77));
        let Page::Node(node) = Page::decode(PageKind::Node, &buf).unwrap() else {
            panic!("expected node");
        };
        assert_eq!(node.parent(), Some(77));

        patch_parent(&mut buf, None);
        let Page::Node(node) = Page::decode(PageKind::Node, &buf).unwrap() else {
            panic!("expected node");
        };
        assert_eq!(node.parent(), None);
    }

    #[test]
    fn test_wrong_buffer_size() {
        let buf = vec![0u8; PAGE_SIZE - 1];
        let result = Page::decode(PageKind::Free, &buf);
        assert!(matches!(result, Err(CodecError::InvalidPageSize { .. })));
    }
}
