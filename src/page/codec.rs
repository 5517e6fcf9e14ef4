//! Byte-level (de)serialization of the page layouts

use super::error::{CodecError, CodecResult};
use super::{
    ENTRY_SIZE, Entry, FileHeader, FreePage, INTERNAL_CAPACITY, InternalNode, LEAF_CAPACITY,
    LeafNode, NODE_HEADER_SIZE, Node, PAGE_SIZE, PageId, RECORD_SIZE, Record, VALUE_SIZE, Value,
};

const PARENT_OFFSET: usize = 0;
const IS_LEAF_OFFSET: usize = 8;
const NUM_KEYS_OFFSET: usize = 12;
/// Right sibling for leaves, leftmost child for internal nodes
const LINK_OFFSET: usize = 120;

const FREE_HEAD_OFFSET: usize = 0;
const ROOT_OFFSET: usize = 8;
const PAGE_COUNT_OFFSET: usize = 16;

pub(super) fn check_len(buf: &[u8]) -> CodecResult<()> {
    if buf.len() != PAGE_SIZE {
        return Err(CodecError::InvalidPageSize {
            expected: PAGE_SIZE,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn get_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn get_i64(buf: &[u8], offset: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    i64::from_le_bytes(bytes)
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Page id 0 is never a node, child, sibling or free page, so it stands for "none" on disk
fn get_link(buf: &[u8], offset: usize) -> Option<PageId> {
    match get_u64(buf, offset) {
        0 => None,
        id => Some(id),
    }
}

fn put_link(buf: &mut [u8], offset: usize, link: Option<PageId>) {
    put_u64(buf, offset, link.unwrap_or(0));
}

/// Byte offset of the value of leaf record `slot`
pub fn record_value_offset(slot: usize) -> usize {
    NODE_HEADER_SIZE + slot * RECORD_SIZE + 8
}

/// Rewrite only the parent field of an encoded node
pub fn patch_parent(buf: &mut [u8], parent: Option<PageId>) {
    put_link(buf, PARENT_OFFSET, parent);
}

pub(super) fn decode_header(buf: &[u8]) -> CodecResult<FileHeader> {
    let page_count = get_u64(buf, PAGE_COUNT_OFFSET);
    if page_count == 0 {
        return Err(CodecError::CorruptedHeader(
            "page count must include the header page".to_string(),
        ));
    }

    let header = FileHeader {
        free_head: get_link(buf, FREE_HEAD_OFFSET),
        root: get_link(buf, ROOT_OFFSET),
        page_count,
    };

    for (name, link) in [("free head", header.free_head), ("root", header.root)] {
        if let Some(id) = link
            && id >= page_count
        {
            return Err(CodecError::CorruptedHeader(format!(
                "{} {} beyond page count {}",
                name, id, page_count
            )));
        }
    }

    Ok(header)
}

pub(super) fn encode_header(header: &FileHeader, buf: &mut [u8]) {
    put_link(buf, FREE_HEAD_OFFSET, header.free_head);
    put_link(buf, ROOT_OFFSET, header.root);
    put_u64(buf, PAGE_COUNT_OFFSET, header.page_count);
}

pub(super) fn decode_free(buf: &[u8]) -> FreePage {
    FreePage {
        next: get_link(buf, 0),
    }
}

pub(super) fn encode_free(free: &FreePage, buf: &mut [u8]) {
    put_link(buf, 0, free.next);
}

pub(super) fn decode_node(buf: &[u8]) -> CodecResult<Node> {
    let parent = get_link(buf, PARENT_OFFSET);
    let num_keys = get_u32(buf, NUM_KEYS_OFFSET) as usize;

    match get_u32(buf, IS_LEAF_OFFSET) {
        1 => {
            if num_keys > LEAF_CAPACITY {
                return Err(CodecError::TooManyKeys {
                    kind: "leaf",
                    count: num_keys,
                    capacity: LEAF_CAPACITY,
                });
            }

            let mut records = Vec::with_capacity(num_keys);
            for i in 0..num_keys {
                let offset = NODE_HEADER_SIZE + i * RECORD_SIZE;
                let mut value = [0u8; VALUE_SIZE];
                value.copy_from_slice(&buf[offset + 8..offset + RECORD_SIZE]);
                records.push(Record::new(get_i64(buf, offset), Value::from_array(value)));
            }

            Ok(Node::Leaf(LeafNode {
                parent,
                sibling: get_link(buf, LINK_OFFSET),
                records,
            }))
        }
        0 => {
            if num_keys > INTERNAL_CAPACITY {
                return Err(CodecError::TooManyKeys {
                    kind: "internal",
                    count: num_keys,
                    capacity: INTERNAL_CAPACITY,
                });
            }

            let leftmost = get_link(buf, LINK_OFFSET).ok_or(CodecError::MissingChild)?;

            let mut entries = Vec::with_capacity(num_keys);
            for i in 0..num_keys {
                let offset = NODE_HEADER_SIZE + i * ENTRY_SIZE;
                let child = get_link(buf, offset + 8).ok_or(CodecError::MissingChild)?;
                entries.push(Entry {
                    key: get_i64(buf, offset),
                    child,
                });
            }

            Ok(Node::Internal(InternalNode {
                parent,
                leftmost,
                entries,
            }))
        }
        tag => Err(CodecError::InvalidNodeTag(tag)),
    }
}

pub(super) fn encode_node(node: &Node, buf: &mut [u8]) -> CodecResult<()> {
    put_link(buf, PARENT_OFFSET, node.parent());

    match node {
        Node::Leaf(leaf) => {
            if leaf.len() > LEAF_CAPACITY {
                return Err(CodecError::TooManyKeys {
                    kind: "leaf",
                    count: leaf.len(),
                    capacity: LEAF_CAPACITY,
                });
            }

            put_u32(buf, IS_LEAF_OFFSET, 1);
            put_u32(buf, NUM_KEYS_OFFSET, leaf.len() as u32);
            put_link(buf, LINK_OFFSET, leaf.sibling);

            for (i, record) in leaf.records.iter().enumerate() {
                let offset = NODE_HEADER_SIZE + i * RECORD_SIZE;
                buf[offset..offset + 8].copy_from_slice(&record.key.to_le_bytes());
                buf[offset + 8..offset + RECORD_SIZE].copy_from_slice(record.value.as_bytes());
            }
        }
        Node::Internal(internal) => {
            if internal.len() > INTERNAL_CAPACITY {
                return Err(CodecError::TooManyKeys {
                    kind: "internal",
                    count: internal.len(),
                    capacity: INTERNAL_CAPACITY,
                });
            }

            put_u32(buf, IS_LEAF_OFFSET, 0);
            put_u32(buf, NUM_KEYS_OFFSET, internal.len() as u32);
            put_u64(buf, LINK_OFFSET, internal.leftmost);

            for (i, entry) in internal.entries.iter().enumerate() {
                let offset = NODE_HEADER_SIZE + i * ENTRY_SIZE;
                buf[offset..offset + 8].copy_from_slice(&entry.key.to_le_bytes());
                put_u64(buf, offset + 8, entry.child);
            }
        }
    }

    Ok(())
}
