//! # Transactions
//!
//! A [`Tx`] owns one side of the database's readers–writer lock for its
//! whole lifetime, so the locking discipline is the borrow discipline:
//! readers share, a writer excludes everyone, and dropping the transaction
//! releases the lock no matter how the scope exits.
//!
//! ## Write Staging
//!
//! A write transaction never touches the file until commit. Mutations
//! accumulate in three buffers:
//!
//! - `dirty`: page number → latest in-memory node. Reads check here first,
//!   so a writer observes its own uncommitted changes.
//! - `allocated`: page numbers handed out by the free list during this
//!   transaction. On rollback they are returned; on commit they are either
//!   dirty (and get written) or were already released again.
//! - `pages_to_delete`: pages of nodes removed from a tree, released to the
//!   free list at commit.
//!
//! Commit writes every dirty node page, releases the queued deletions,
//! persists the free list, rewrites meta if the root-collections page
//! moved, and syncs the file. Rollback discards the buffers and returns
//! the allocations; a `Tx` dropped without either does the same.
//!
//! ## Collections Catalog
//!
//! Collections are records of a root collection whose tree root lives in
//! meta. The transaction keeps a working copy of that root page; creating,
//! growing, or shrinking the catalog updates the working copy and commit
//! makes it durable.

use std::collections::HashMap;

use eyre::{ensure, Result, WrapErr};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::collection::Collection;
use crate::db::Shared;
use crate::storage::{META_PAGE_NUMBER, PAGE_NUMBER_SIZE};
use crate::tree::{Item, Node, MAX_KEY_SIZE, MAX_VALUE_SIZE, NODE_HEADER_SIZE};

enum TxLock<'db> {
    Read(RwLockReadGuard<'db, Shared>),
    Write(RwLockWriteGuard<'db, Shared>),
}

/// A read or write transaction. Obtained from [`Database::begin_read`] and
/// [`Database::begin_write`]; finish with [`commit`](Tx::commit) or
/// [`rollback`](Tx::rollback).
///
/// [`Database::begin_read`]: crate::Database::begin_read
/// [`Database::begin_write`]: crate::Database::begin_write
pub struct Tx<'db> {
    lock: TxLock<'db>,
    dirty: HashMap<u64, Node>,
    pages_to_delete: Vec<u64>,
    allocated: Vec<u64>,
    root: u64,
    finished: bool,
}

impl<'db> Tx<'db> {
    pub(crate) fn new_read(guard: RwLockReadGuard<'db, Shared>) -> Self {
        let root = guard.meta.root_collections_page();
        Self {
            lock: TxLock::Read(guard),
            dirty: HashMap::new(),
            pages_to_delete: Vec::new(),
            allocated: Vec::new(),
            root,
            finished: false,
        }
    }

    pub(crate) fn new_write(guard: RwLockWriteGuard<'db, Shared>) -> Self {
        let root = guard.meta.root_collections_page();
        Self {
            lock: TxLock::Write(guard),
            dirty: HashMap::new(),
            pages_to_delete: Vec::new(),
            allocated: Vec::new(),
            root,
            finished: false,
        }
    }

    fn shared(&self) -> &Shared {
        match &self.lock {
            TxLock::Read(guard) => guard,
            TxLock::Write(guard) => guard,
        }
    }

    fn shared_mut(&mut self) -> Result<&mut Shared> {
        match &mut self.lock {
            TxLock::Write(guard) => Ok(guard),
            TxLock::Read(_) => {
                eyre::bail!("can't perform a write operation inside a read transaction")
            }
        }
    }

    pub(crate) fn is_write(&self) -> bool {
        matches!(self.lock, TxLock::Write(_))
    }

    pub(crate) fn ensure_write(&self) -> Result<()> {
        ensure!(
            self.is_write(),
            "can't perform a write operation inside a read transaction"
        );
        Ok(())
    }

    // ---- node staging ----------------------------------------------------

    /// Returns the node on `page_number`, preferring the transaction's own
    /// dirty copy over the on-disk encoding.
    pub(crate) fn get_node(&self, page_number: u64) -> Result<Node> {
        if let Some(node) = self.dirty.get(&page_number) {
            return Ok(node.clone());
        }

        let page = self.shared().pager.read_page(page_number)?;
        let mut node = Node::deserialize(&page.data)
            .wrap_err_with(|| format!("failed to decode node on page {page_number}"))?;
        node.page_number = page_number;
        Ok(node)
    }

    /// Builds a node on a freshly allocated page and records the allocation
    /// so rollback can return it.
    pub(crate) fn new_node(&mut self, items: Vec<Item>, children: Vec<u64>) -> Result<Node> {
        let page_number = self.shared_mut()?.freelist.next_page();
        self.allocated.push(page_number);

        let mut node = Node::new(items, children);
        node.page_number = page_number;
        Ok(node)
    }

    /// Stages `node` to be written at commit.
    pub(crate) fn write_node(&mut self, node: &Node) -> Result<()> {
        self.ensure_write()?;
        ensure!(
            node.page_number != 0,
            "cannot stage a node without an allocated page"
        );
        self.dirty.insert(node.page_number, node.clone());
        Ok(())
    }

    /// Queues `page_number` to be released to the free list at commit.
    pub(crate) fn delete_node(&mut self, page_number: u64) -> Result<()> {
        self.ensure_write()?;
        self.pages_to_delete.push(page_number);
        Ok(())
    }

    // ---- fill policy -----------------------------------------------------

    pub(crate) fn page_size(&self) -> usize {
        self.shared().pager.page_size()
    }

    pub(crate) fn max_threshold(&self) -> usize {
        self.shared().pager.max_threshold()
    }

    pub(crate) fn min_threshold(&self) -> usize {
        self.shared().pager.min_threshold()
    }

    pub(crate) fn is_over_populated(&self, node: &Node) -> bool {
        node.size() > self.max_threshold()
    }

    pub(crate) fn is_under_populated(&self, node: &Node) -> bool {
        node.size() < self.min_threshold()
    }

    pub(crate) fn split_index(&self, node: &Node) -> Option<usize> {
        node.split_index(self.min_threshold())
    }

    /// Rejects items the slotted format cannot hold: over-long keys or
    /// values, or an item no split could ever make fit.
    pub(crate) fn validate_item(&self, key: &[u8], value: &[u8]) -> Result<()> {
        ensure!(
            key.len() <= MAX_KEY_SIZE,
            "key of {} bytes exceeds the {}-byte limit",
            key.len(),
            MAX_KEY_SIZE
        );
        ensure!(
            value.len() <= MAX_VALUE_SIZE,
            "value of {} bytes exceeds the {}-byte limit",
            value.len(),
            MAX_VALUE_SIZE
        );

        let single_item_size = NODE_HEADER_SIZE + key.len() + value.len() + PAGE_NUMBER_SIZE;
        ensure!(
            single_item_size <= self.max_threshold(),
            "item of {} bytes cannot fit a {}-byte page",
            key.len() + value.len(),
            self.page_size()
        );
        Ok(())
    }

    // ---- collections -----------------------------------------------------

    /// Working copy of the root-collections page; commit persists it to
    /// meta when it moved.
    pub(crate) fn root_collections_page(&self) -> u64 {
        self.root
    }

    pub(crate) fn set_root_collections_page(&mut self, page: u64) {
        self.root = page;
    }

    pub(crate) fn root_collection(&self) -> Collection {
        Collection::root_catalog(self.root)
    }

    /// Looks up a collection by name. `None` if it does not exist.
    pub fn get_collection(&self, name: &[u8]) -> Result<Option<Collection>> {
        let root_collection = self.root_collection();
        let Some(record) = root_collection.find(self, name)? else {
            return Ok(None);
        };

        Collection::from_record(&record).map(Some)
    }

    /// Creates a new, empty collection and records it in the catalog.
    pub fn create_collection(&mut self, name: &[u8]) -> Result<Collection> {
        self.ensure_write()?;
        ensure!(
            self.get_collection(name)?.is_none(),
            "collection '{}' already exists",
            String::from_utf8_lossy(name)
        );

        let node = self.new_node(Vec::new(), Vec::new())?;
        self.write_node(&node)?;

        let collection = Collection::new(name.to_vec(), node.page_number);
        let mut root_collection = self.root_collection();
        root_collection.put(self, name, &collection.record_value())?;
        Ok(collection)
    }

    /// Drops a collection: releases every page of its tree and removes its
    /// catalog record. Deleting an absent collection succeeds.
    pub fn delete_collection(&mut self, name: &[u8]) -> Result<()> {
        self.ensure_write()?;

        let Some(collection) = self.get_collection(name)? else {
            return Ok(());
        };

        if collection.root_page() != 0 {
            self.release_tree(collection.root_page())?;
        }

        let mut root_collection = self.root_collection();
        root_collection.remove(self, name)
    }

    fn release_tree(&mut self, page_number: u64) -> Result<()> {
        let node = self.get_node(page_number)?;
        for &child in &node.children {
            self.release_tree(child)?;
        }
        self.delete_node(page_number)
    }

    // ---- lifecycle -------------------------------------------------------

    /// Makes the transaction's changes durable. For a read transaction this
    /// only releases the lock.
    pub fn commit(mut self) -> Result<()> {
        let dirty = std::mem::take(&mut self.dirty);
        let pages_to_delete = std::mem::take(&mut self.pages_to_delete);
        let root = self.root;

        match &mut self.lock {
            TxLock::Read(_) => {
                self.finished = true;
                Ok(())
            }
            TxLock::Write(guard) => {
                let shared: &mut Shared = guard;

                for node in dirty.values() {
                    let mut page = shared.pager.allocate_page(node.page_number);
                    node.serialize(&mut page.data).wrap_err_with(|| {
                        format!("failed to serialize node for page {}", node.page_number)
                    })?;
                    shared.pager.write_page(&page)?;
                }

                for page_number in pages_to_delete {
                    shared.freelist.release_page(page_number);
                }

                let mut freelist_page = shared.pager.allocate_page(shared.meta.freelist_page());
                shared.freelist.write_to(&mut freelist_page.data)?;
                shared.pager.write_page(&freelist_page)?;

                if root != shared.meta.root_collections_page() {
                    shared.meta.set_root_collections_page(root);
                    let mut meta_page = shared.pager.allocate_page(META_PAGE_NUMBER);
                    shared.meta.write_to(&mut meta_page.data)?;
                    shared.pager.write_page(&meta_page)?;
                }

                shared.pager.sync()?;

                self.allocated.clear();
                self.finished = true;
                Ok(())
            }
        }
    }

    /// Discards the transaction's changes. Pages allocated during the
    /// transaction go back to the free list.
    pub fn rollback(mut self) {
        self.rollback_inner();
        self.finished = true;
    }

    fn rollback_inner(&mut self) {
        if let TxLock::Write(guard) = &mut self.lock {
            self.dirty.clear();
            self.pages_to_delete.clear();
            for page_number in self.allocated.drain(..) {
                guard.freelist.release_page(page_number);
            }
        }
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::builder()
            .path(dir.path().join("test.db"))
            .page_size(4096)
            .open()
            .unwrap();
        (dir, db)
    }

    /// Every page reachable from meta: the free-list page plus every tree
    /// page of the catalog and of each named collection.
    fn reachable_pages(tx: &Tx<'_>) -> Vec<u64> {
        fn walk(tx: &Tx<'_>, page: u64, pages: &mut Vec<u64>, records: &mut Vec<Item>) {
            let node = tx.get_node(page).unwrap();
            pages.push(page);
            records.extend(node.items.iter().cloned());
            for &child in &node.children {
                walk(tx, child, pages, records);
            }
        }

        let mut pages = vec![tx.shared().meta.freelist_page()];
        let root = tx.root_collections_page();
        if root == 0 {
            return pages;
        }

        let mut records = Vec::new();
        walk(tx, root, &mut pages, &mut records);

        for record in records {
            let collection = Collection::from_record(&record).unwrap();
            if collection.root_page() != 0 {
                let mut ignored = Vec::new();
                walk(tx, collection.root_page(), &mut pages, &mut ignored);
            }
        }

        pages
    }

    fn assert_freelist_conserved(db: &Database) {
        let tx = db.begin_read();
        let mut pages = reachable_pages(&tx);
        pages.extend_from_slice(tx.shared().freelist.released_pages());
        pages.sort_unstable();

        let max_page = tx.shared().freelist.max_page();
        let expected: Vec<u64> = (1..=max_page).collect();
        assert_eq!(pages, expected, "pages leaked or double-tracked");
    }

    #[test]
    fn mutating_calls_in_a_read_transaction_fail() {
        let (_dir, db) = test_db();
        let mut tx = db.begin_write();
        tx.create_collection(b"stuff").unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin_read();
        let err = tx.create_collection(b"more").unwrap_err();
        assert!(err.to_string().contains("read transaction"));

        let mut stuff = tx.get_collection(b"stuff").unwrap().unwrap();
        let err = stuff.put(&mut tx, b"k", b"v").unwrap_err();
        assert!(err.to_string().contains("read transaction"));
        let err = stuff.remove(&mut tx, b"k").unwrap_err();
        assert!(err.to_string().contains("read transaction"));
        let err = tx.delete_collection(b"stuff").unwrap_err();
        assert!(err.to_string().contains("read transaction"));
    }

    #[test]
    fn a_writer_sees_its_own_staged_writes() {
        let (_dir, db) = test_db();
        let mut tx = db.begin_write();
        let mut notes = tx.create_collection(b"notes").unwrap();

        notes.put(&mut tx, b"draft", b"first").unwrap();

        let found = notes.find(&tx, b"draft").unwrap().unwrap();
        assert_eq!(found.value, b"first");
    }

    #[test]
    fn rollback_discards_changes_and_returns_pages() {
        let (_dir, db) = test_db();
        let mut tx = db.begin_write();
        tx.create_collection(b"keep").unwrap();
        tx.commit().unwrap();

        let max_page_before = {
            let tx = db.begin_read();
            tx.shared().freelist.max_page()
        };

        let mut tx = db.begin_write();
        let mut doomed = tx.create_collection(b"doomed").unwrap();
        doomed.put(&mut tx, b"x", b"y").unwrap();
        tx.rollback();

        let tx = db.begin_read();
        assert!(tx.get_collection(b"doomed").unwrap().is_none());
        assert!(tx.get_collection(b"keep").unwrap().is_some());
        drop(tx);

        // The rolled-back allocation is reused instead of growing the file.
        let mut tx = db.begin_write();
        tx.create_collection(b"reuse").unwrap();
        tx.commit().unwrap();

        let tx = db.begin_read();
        assert_eq!(tx.shared().freelist.max_page(), max_page_before + 1);
    }

    #[test]
    fn dropping_an_unfinished_transaction_rolls_back() {
        let (_dir, db) = test_db();
        {
            let mut tx = db.begin_write();
            let mut ghost = tx.create_collection(b"ghost").unwrap();
            ghost.put(&mut tx, b"k", b"v").unwrap();
            // Dropped without commit.
        }

        // The writer lock was released and nothing was persisted.
        let tx = db.begin_read();
        assert!(tx.get_collection(b"ghost").unwrap().is_none());
    }

    #[test]
    fn commit_persists_the_moved_catalog_root() {
        let (_dir, db) = test_db();
        let mut tx = db.begin_write();
        tx.create_collection(b"first").unwrap();
        tx.commit().unwrap();

        let tx = db.begin_read();
        assert_ne!(tx.shared().meta.root_collections_page(), 0);
        assert_eq!(
            tx.root_collections_page(),
            tx.shared().meta.root_collections_page()
        );
    }

    #[test]
    fn create_collection_rejects_duplicates() {
        let (_dir, db) = test_db();
        let mut tx = db.begin_write();
        tx.create_collection(b"twice").unwrap();

        let err = tx.create_collection(b"twice").unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn oversized_items_are_rejected() {
        let (_dir, db) = test_db();
        let mut tx = db.begin_write();
        let mut blobs = tx.create_collection(b"blobs").unwrap();

        let long = vec![0u8; 300];
        assert!(blobs.put(&mut tx, &long, b"v").is_err());
        assert!(blobs.put(&mut tx, b"k", &long).is_err());
        assert!(blobs.put(&mut tx, b"k", &vec![0u8; 255]).is_ok());
    }

    #[test]
    fn freelist_accounts_for_every_page_after_commits() {
        let (_dir, db) = test_db();
        let mut tx = db.begin_write();
        let mut data = tx.create_collection(b"data").unwrap();
        for i in 0..600u32 {
            let key = format!("key{:03}", i);
            data.put(&mut tx, key.as_bytes(), key.as_bytes()).unwrap();
        }
        tx.commit().unwrap();

        assert_freelist_conserved(&db);

        let mut tx = db.begin_write();
        let mut data = tx.get_collection(b"data").unwrap().unwrap();
        for i in (0..600u32).step_by(3) {
            let key = format!("key{:03}", i);
            data.remove(&mut tx, key.as_bytes()).unwrap();
        }
        tx.commit().unwrap();

        assert_freelist_conserved(&db);
    }

    #[test]
    fn delete_collection_releases_its_pages() {
        let (_dir, db) = test_db();
        let mut tx = db.begin_write();
        let mut data = tx.create_collection(b"data").unwrap();
        for i in 0..600u32 {
            let key = format!("key{:03}", i);
            data.put(&mut tx, key.as_bytes(), key.as_bytes()).unwrap();
        }
        tx.create_collection(b"other").unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin_write();
        tx.delete_collection(b"data").unwrap();
        tx.commit().unwrap();

        let tx = db.begin_read();
        assert!(tx.get_collection(b"data").unwrap().is_none());
        assert!(tx.get_collection(b"other").unwrap().is_some());
        drop(tx);

        assert_freelist_conserved(&db);
    }
}
