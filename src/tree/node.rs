//! # Node Serialization
//!
//! A B-tree node occupies exactly one page, encoded as a slotted page:
//! fixed-size slot data grows forward from the left edge while variable
//! length item payloads grow backward from the right edge.
//!
//! ## Page Layout
//!
//! ```text
//! +--------+-----------+----------------------------+------------------+
//! | header | slot area |        free space          |   item payloads  |
//! +--------+-----------+----------------------------+------------------+
//! 0        3           left cursor -->       <-- right cursor       L-1
//! ```
//!
//! Header: `u8 is_leaf`, `u16 num_items`. Slot area, per item i: for
//! internal nodes the `u64` page number of `children[i]`, then a `u16`
//! offset pointing at the item's payload in the right region. After the
//! last slot an internal node writes `children[num_items]`. Payload, at
//! descending addresses: value bytes, `u8 value_len`, key bytes,
//! `u8 key_len` — so the slot offset lands on the key-length byte and the
//! payload reads forward as `key_len, key, value_len, value`.
//!
//! Key and value lengths are stored in one byte each, which caps both at
//! 255 bytes; the transaction layer enforces the cap before an item ever
//! reaches a node. Serialization refuses to let the two cursors collide,
//! and deserialization bounds-checks every offset and length, so a corrupt
//! page surfaces as an error rather than a panic or a silent overwrite.
//!
//! ## Size Estimate
//!
//! Rebalancing decisions use an estimated node size:
//!
//! ```text
//! size(node) = 3 + sum(len(key_i) + len(value_i) + 8)
//! ```
//!
//! a fixed header plus, per item, the item bytes and one page pointer. The
//! same formula applies to leaves (which store no pointers) and internal
//! nodes (which store one extra); it is deliberately an estimate, not the
//! exact byte count, and both fill thresholds and the split rule use it
//! consistently.

use std::cmp::Ordering;

use eyre::{ensure, Result};

use crate::storage::PAGE_NUMBER_SIZE;

/// Bytes of node header: `u8 is_leaf` plus `u16 num_items`.
pub(crate) const NODE_HEADER_SIZE: usize = 3;

/// Keys are length-prefixed with a single byte.
pub(crate) const MAX_KEY_SIZE: usize = u8::MAX as usize;

/// Values are length-prefixed with a single byte.
pub(crate) const MAX_VALUE_SIZE: usize = u8::MAX as usize;

/// A key/value pair stored in a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Item {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// A single B-tree node: a leaf when `children` is empty, internal
/// otherwise (with `children.len() == items.len() + 1`).
///
/// `page_number` 0 means the node has not been bound to a page yet; page 0
/// itself always holds meta, never a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Node {
    pub page_number: u64,
    pub items: Vec<Item>,
    pub children: Vec<u64>,
}

impl Node {
    pub fn new(items: Vec<Item>, children: Vec<u64>) -> Self {
        Self {
            page_number: 0,
            items,
            children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Estimated serialized size used by the fill policy.
    pub fn size(&self) -> usize {
        let mut size = NODE_HEADER_SIZE;
        for i in 0..self.items.len() {
            size += self.element_size(i);
        }
        size
    }

    /// Estimated bytes charged to item `i`: the item plus one page pointer.
    pub fn element_size(&self, i: usize) -> usize {
        self.items[i].size() + PAGE_NUMBER_SIZE
    }

    /// Linear scan for `key`. Returns `(true, i)` on an exact match, or
    /// `(false, i)` where `i` is the index the key would be inserted at.
    pub fn find_key_in_node(&self, key: &[u8]) -> (bool, usize) {
        for (i, item) in self.items.iter().enumerate() {
            match item.key.as_slice().cmp(key) {
                Ordering::Equal => return (true, i),
                Ordering::Greater => return (false, i),
                Ordering::Less => {}
            }
        }

        (false, self.items.len())
    }

    /// Inserts `item` at `index`, shifting later items right.
    pub fn add_item(&mut self, item: Item, index: usize) {
        if index == self.items.len() {
            self.items.push(item);
        } else {
            self.items.insert(index, item);
        }
    }

    /// First index at which splitting leaves the left half at or above the
    /// minimum fill while keeping at least one item on the right. `None`
    /// means the node cannot spare an item.
    pub fn split_index(&self, min_threshold: usize) -> Option<usize> {
        let mut size = NODE_HEADER_SIZE;
        for i in 0..self.items.len() {
            size += self.element_size(i);
            if size > min_threshold && i < self.items.len() - 1 {
                return Some(i + 1);
            }
        }

        None
    }

    /// Encodes the node into a page buffer using the slotted layout.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<()> {
        let is_leaf = self.is_leaf();
        ensure!(
            is_leaf || self.children.len() == self.items.len() + 1,
            "internal node has {} items but {} children",
            self.items.len(),
            self.children.len()
        );
        ensure!(buf.len() >= NODE_HEADER_SIZE, "page buffer too small");

        let mut left = 0usize;
        let mut right = buf.len() - 1;

        buf[left] = u8::from(is_leaf);
        left += 1;

        let num_items = u16::try_from(self.items.len())
            .map_err(|_| eyre::eyre!("node has {} items, more than fit a page", self.items.len()))?;
        buf[left..left + 2].copy_from_slice(&num_items.to_le_bytes());
        left += 2;

        for (i, item) in self.items.iter().enumerate() {
            ensure!(
                item.key.len() <= MAX_KEY_SIZE && item.value.len() <= MAX_VALUE_SIZE,
                "item key/value lengths {}/{} exceed the one-byte limit",
                item.key.len(),
                item.value.len()
            );

            if !is_leaf {
                buf[left..left + 8].copy_from_slice(&self.children[i].to_le_bytes());
                left += 8;
            }

            let payload = item.key.len() + item.value.len() + 2;
            // Reserve the slot and, for internal nodes, the trailing child
            // pointer so the cursors can never cross.
            let reserved = left + 2 + if is_leaf { 0 } else { 8 };
            let offset = right
                .checked_sub(payload)
                .filter(|offset| reserved <= *offset)
                .ok_or_else(|| {
                    eyre::eyre!(
                        "node contents do not fit in a {}-byte page (item {} of {})",
                        buf.len(),
                        i,
                        self.items.len()
                    )
                })?;

            buf[left..left + 2].copy_from_slice(&(offset as u16).to_le_bytes());
            left += 2;

            right -= item.value.len();
            buf[right..right + item.value.len()].copy_from_slice(&item.value);
            right -= 1;
            buf[right] = item.value.len() as u8;
            right -= item.key.len();
            buf[right..right + item.key.len()].copy_from_slice(&item.key);
            right -= 1;
            buf[right] = item.key.len() as u8;

            debug_assert_eq!(right, offset);
        }

        if !is_leaf {
            buf[left..left + 8].copy_from_slice(&self.children[self.items.len()].to_le_bytes());
        }

        Ok(())
    }

    /// Decodes a node from a page buffer. The caller binds `page_number`.
    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        ensure!(
            buf.len() >= NODE_HEADER_SIZE,
            "page buffer too small for a node header"
        );

        let is_leaf = buf[0] == 1;
        let num_items =
            u16::from_le_bytes(buf[1..3].try_into().expect("slice is 2 bytes")) as usize;
        let mut left = NODE_HEADER_SIZE;

        let mut items = Vec::with_capacity(num_items);
        let mut children = Vec::new();

        for _ in 0..num_items {
            if !is_leaf {
                children.push(read_page_number(buf, &mut left)?);
            }

            ensure!(left + 2 <= buf.len(), "corrupt node: slot area truncated");
            let offset =
                u16::from_le_bytes(buf[left..left + 2].try_into().expect("slice is 2 bytes"))
                    as usize;
            left += 2;

            let mut pos = offset;
            let key = read_datum(buf, &mut pos)?;
            let value = read_datum(buf, &mut pos)?;
            items.push(Item::new(key, value));
        }

        if !is_leaf {
            children.push(read_page_number(buf, &mut left)?);
        }

        Ok(Self {
            page_number: 0,
            items,
            children,
        })
    }
}

fn read_page_number(buf: &[u8], pos: &mut usize) -> Result<u64> {
    ensure!(
        *pos + 8 <= buf.len(),
        "corrupt node: child pointer truncated"
    );
    let page = u64::from_le_bytes(buf[*pos..*pos + 8].try_into().expect("slice is 8 bytes"));
    *pos += 8;
    Ok(page)
}

fn read_datum(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    ensure!(*pos < buf.len(), "corrupt node: slot offset out of range");
    let len = buf[*pos] as usize;
    *pos += 1;
    ensure!(
        *pos + len <= buf.len(),
        "corrupt node: datum of {} bytes at {} overruns the page",
        len,
        *pos
    );
    let datum = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(datum)
}
