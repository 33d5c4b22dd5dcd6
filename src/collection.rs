//! # Collections
//!
//! A collection is a named B-tree. Its catalog record lives as an item in
//! the root collection: the key is the collection name, the value is the
//! 16-byte `root_page ‖ counter` pair (little-endian). The root collection
//! itself is anchored by the root-collections page in meta.
//!
//! A [`Collection`] is a detached handle — it holds the name and root page
//! but no reference into the transaction. Operations take the transaction
//! explicitly, and when an operation relocates the tree root (first insert,
//! root split, height shrink) the handle writes the new root through: named
//! collections rewrite their catalog record, the root collection updates
//! the transaction's meta working copy.
//!
//! Because the handle caches the root page, use one handle per collection
//! per transaction: a second handle fetched before a root move keeps
//! pointing at the old root.

use eyre::{ensure, Result};

use crate::tree::{find_key, BTree, Item};
use crate::tx::Tx;

/// Byte length of a catalog record value: root page plus counter.
const COLLECTION_RECORD_SIZE: usize = 16;

/// A named collection of key/value items.
#[derive(Debug, Clone)]
pub struct Collection {
    name: Vec<u8>,
    root: u64,
    counter: u64,
    root_catalog: bool,
}

impl Collection {
    pub(crate) fn new(name: Vec<u8>, root: u64) -> Self {
        Self {
            name,
            root,
            counter: 0,
            root_catalog: false,
        }
    }

    /// Handle for the root collection, whose records are the catalog.
    pub(crate) fn root_catalog(root: u64) -> Self {
        Self {
            name: Vec::new(),
            root,
            counter: 0,
            root_catalog: true,
        }
    }

    /// Decodes a catalog record into a collection handle.
    pub(crate) fn from_record(record: &Item) -> Result<Self> {
        ensure!(
            record.value.len() == COLLECTION_RECORD_SIZE,
            "corrupt catalog record for '{}': {} bytes (expected {})",
            String::from_utf8_lossy(&record.key),
            record.value.len(),
            COLLECTION_RECORD_SIZE
        );

        let root = u64::from_le_bytes(record.value[0..8].try_into().expect("slice is 8 bytes"));
        let counter =
            u64::from_le_bytes(record.value[8..16].try_into().expect("slice is 8 bytes"));

        Ok(Self {
            name: record.key.clone(),
            root,
            counter,
            root_catalog: false,
        })
    }

    /// Encodes the catalog record value for this collection.
    pub(crate) fn record_value(&self) -> Vec<u8> {
        let mut value = Vec::with_capacity(COLLECTION_RECORD_SIZE);
        value.extend_from_slice(&self.root.to_le_bytes());
        value.extend_from_slice(&self.counter.to_le_bytes());
        value
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Monotonic per-collection counter, reserved for generated ids.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub(crate) fn root_page(&self) -> u64 {
        self.root
    }

    /// Looks up `key`. `None` if the key is not present.
    pub fn find(&self, tx: &Tx<'_>, key: &[u8]) -> Result<Option<Item>> {
        if self.root == 0 {
            return Ok(None);
        }

        let (found, index, mut node, _) = find_key(tx, self.root, key)?;
        if !found {
            return Ok(None);
        }

        Ok(Some(node.items.swap_remove(index)))
    }

    /// Inserts `key` → `value`, replacing any existing value for the key.
    pub fn put(&mut self, tx: &mut Tx<'_>, key: &[u8], value: &[u8]) -> Result<()> {
        tx.ensure_write()?;
        tx.validate_item(key, value)?;

        let previous_root = self.root;
        let mut tree = BTree::new(tx, self.root);
        tree.put(Item::new(key.to_vec(), value.to_vec()))?;
        self.root = tree.root();

        if self.root != previous_root {
            self.persist_root(tx)?;
        }
        Ok(())
    }

    /// Removes `key`. Removing an absent key succeeds.
    pub fn remove(&mut self, tx: &mut Tx<'_>, key: &[u8]) -> Result<()> {
        tx.ensure_write()?;

        if self.root == 0 {
            return Ok(());
        }

        let previous_root = self.root;
        let mut tree = BTree::new(tx, self.root);
        tree.remove(key)?;
        self.root = tree.root();

        if self.root != previous_root {
            self.persist_root(tx)?;
        }
        Ok(())
    }

    /// Writes a relocated root through to wherever this collection is
    /// recorded, so the move survives commit and reopen.
    fn persist_root(&self, tx: &mut Tx<'_>) -> Result<()> {
        if self.root_catalog {
            tx.set_root_collections_page(self.root);
            return Ok(());
        }

        let mut catalog = tx.root_collection();
        catalog.put(tx, &self.name, &self.record_value())
    }
}
