//! # B-Tree Operations
//!
//! Search, insert, and delete over the paged tree. All page traffic goes
//! through the transaction, which resolves reads against its dirty-node map
//! first, so a writer always sees its own staged mutations.
//!
//! ## Search
//!
//! `find_key` walks down from the root, collecting the child index taken at
//! each level. The trail starts with a placeholder for the root itself and
//! the retrieval walk skips that first element, so rebalancing code can
//! address `ancestors[i+1]` inside `ancestors[i]` uniformly.
//!
//! ## Insert
//!
//! The item lands in (or replaces an equal key found on the way to) the
//! leaf the search arrives at. Ancestors are then revisited deepest-first
//! and every over-populated child is split; if the root itself overflows, a
//! new root is allocated above it and the tree grows a level.
//!
//! ## Delete
//!
//! Removing from a leaf splices the item out. Removing from an internal
//! node replaces the item with its in-order predecessor (the rightmost item
//! of its left subtree) and extends the ancestors trail with the
//! predecessor path. Ancestors are then revisited deepest-first; an
//! under-populated node first tries to borrow from a sibling that can spare
//! an item (rotate right, then rotate left), and otherwise merges with one.
//! An internal root left with no items is discarded and its only child
//! becomes the new root.

use eyre::{ensure, Result};
use smallvec::{smallvec, SmallVec};

use super::node::{Item, Node};
use crate::tx::Tx;

/// Child indexes taken from the root down to a node; element 0 stands for
/// the root and is skipped when the path is walked.
pub(crate) type AncestorPath = SmallVec<[usize; 8]>;

/// Descends from `root` looking for `key`. Returns whether the key was
/// found, the matching index (or the leaf insertion index), the node the
/// search ended in, and the ancestors trail.
pub(crate) fn find_key(
    tx: &Tx<'_>,
    root: u64,
    key: &[u8],
) -> Result<(bool, usize, Node, AncestorPath)> {
    let mut ancestors: AncestorPath = smallvec![0];
    let node = tx.get_node(root)?;
    let (found, index, node) = find_key_recursive(tx, node, key, &mut ancestors)?;
    Ok((found, index, node, ancestors))
}

fn find_key_recursive(
    tx: &Tx<'_>,
    node: Node,
    key: &[u8],
    ancestors: &mut AncestorPath,
) -> Result<(bool, usize, Node)> {
    let (found, index) = node.find_key_in_node(key);
    if found || node.is_leaf() {
        return Ok((found, index, node));
    }

    ancestors.push(index);
    let child = tx.get_node(node.children[index])?;
    find_key_recursive(tx, child, key, ancestors)
}

/// Mutating view of one collection's tree. Borrows the write transaction;
/// `root` tracks the (possibly relocated) root page across operations and
/// is read back by the collection when the tree is dropped.
pub(crate) struct BTree<'tx, 'db> {
    tx: &'tx mut Tx<'db>,
    root: u64,
}

impl<'tx, 'db> BTree<'tx, 'db> {
    pub fn new(tx: &'tx mut Tx<'db>, root: u64) -> Self {
        Self { tx, root }
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    /// Inserts `item`, overwriting the value if the key already exists.
    pub fn put(&mut self, item: Item) -> Result<()> {
        if self.root == 0 {
            let node = self.tx.new_node(vec![item], Vec::new())?;
            self.tx.write_node(&node)?;
            self.root = node.page_number;
            return Ok(());
        }

        let (found, index, mut node, ancestors_indexes) = find_key(self.tx, self.root, &item.key)?;

        if found {
            node.items[index] = item;
        } else {
            node.add_item(item, index);
        }
        self.tx.write_node(&node)?;

        let mut ancestors = self.get_nodes(&ancestors_indexes)?;

        for i in (0..ancestors.len().saturating_sub(1)).rev() {
            let (upper, lower) = ancestors.split_at_mut(i + 1);
            let parent = &mut upper[i];
            let child = &mut lower[0];

            if self.tx.is_over_populated(child) {
                self.split_child(parent, child, ancestors_indexes[i + 1])?;
            }
        }

        if self.tx.is_over_populated(&ancestors[0]) {
            let mut new_root = self
                .tx
                .new_node(Vec::new(), vec![ancestors[0].page_number])?;
            self.split_child(&mut new_root, &mut ancestors[0], 0)?;
            self.root = new_root.page_number;
        }

        Ok(())
    }

    /// Removes `key` if present; removing an absent key succeeds.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        let (found, index, mut node, mut ancestors_indexes) = find_key(self.tx, self.root, key)?;
        if !found {
            return Ok(());
        }

        if node.is_leaf() {
            node.items.remove(index);
            self.tx.write_node(&node)?;
        } else {
            let affected = self.remove_from_internal(&mut node, index)?;
            ancestors_indexes.extend(affected);
        }

        let mut ancestors = self.get_nodes(&ancestors_indexes)?;

        for i in (0..ancestors.len().saturating_sub(1)).rev() {
            let (upper, lower) = ancestors.split_at_mut(i + 1);
            let parent = &mut upper[i];
            let child = &mut lower[0];

            if self.tx.is_under_populated(child) {
                self.rebalance(parent, child, ancestors_indexes[i + 1])?;
            }
        }

        let root_node = &ancestors[0];
        if root_node.items.is_empty() && !root_node.children.is_empty() {
            // The tree lost a level: promote the only child and recycle the
            // old root page.
            self.tx.delete_node(root_node.page_number)?;
            self.root = root_node.children[0];
        }

        Ok(())
    }

    /// Re-reads the nodes along an ancestors trail, dirty copies included.
    fn get_nodes(&self, indexes: &[usize]) -> Result<Vec<Node>> {
        let mut nodes = Vec::with_capacity(indexes.len());
        let mut current = self.tx.get_node(self.root)?;

        for &index in &indexes[1..] {
            ensure!(
                index < current.children.len(),
                "corrupt ancestor path: child index {} out of {} in page {}",
                index,
                current.children.len(),
                current.page_number
            );
            let next = self.tx.get_node(current.children[index])?;
            nodes.push(std::mem::replace(&mut current, next));
        }

        nodes.push(current);
        Ok(nodes)
    }

    /// Splits `child` (at `parent.children[child_index]`) around its split
    /// index: the middle item moves up into `parent` and everything after
    /// it moves to a freshly allocated right sibling.
    fn split_child(&mut self, parent: &mut Node, child: &mut Node, child_index: usize) -> Result<()> {
        let Some(split_index) = self.tx.split_index(child) else {
            return Ok(());
        };

        let middle = child.items[split_index].clone();

        let sibling = if child.is_leaf() {
            self.tx
                .new_node(child.items.split_off(split_index + 1), Vec::new())?
        } else {
            let upper_children = child.children.split_off(split_index + 1);
            self.tx
                .new_node(child.items.split_off(split_index + 1), upper_children)?
        };
        child.items.truncate(split_index);

        parent.add_item(middle, child_index);
        if parent.children.len() == child_index + 1 {
            parent.children.push(sibling.page_number);
        } else {
            parent.children.insert(child_index + 1, sibling.page_number);
        }

        self.tx.write_node(parent)?;
        self.tx.write_node(child)?;
        self.tx.write_node(&sibling)?;
        Ok(())
    }

    /// Replaces `node.items[index]` with its in-order predecessor, pulled
    /// from the rightmost leaf of the left subtree. Returns the child
    /// indexes of the predecessor path so the caller can rebalance it.
    fn remove_from_internal(&mut self, node: &mut Node, index: usize) -> Result<AncestorPath> {
        let mut affected: AncestorPath = smallvec![index];

        let mut current = self.tx.get_node(node.children[index])?;
        while !current.is_leaf() {
            let traversing = current.children.len() - 1;
            current = self.tx.get_node(current.children[traversing])?;
            affected.push(traversing);
        }

        let predecessor = current.items.pop().ok_or_else(|| {
            eyre::eyre!(
                "corrupt tree: empty leaf on the predecessor path below page {}",
                node.page_number
            )
        })?;
        node.items[index] = predecessor;

        self.tx.write_node(node)?;
        self.tx.write_node(&current)?;
        Ok(affected)
    }

    /// Restores the fill invariant for `node` at `parent.children[node_index]`:
    /// borrow from the left sibling, else the right, else merge.
    fn rebalance(&mut self, parent: &mut Node, node: &mut Node, node_index: usize) -> Result<()> {
        ensure!(
            !parent.children.is_empty(),
            "rebalance against a childless parent (page {})",
            parent.page_number
        );

        if node_index > 0 {
            let mut left = self.tx.get_node(parent.children[node_index - 1])?;
            if self.tx.split_index(&left).is_some() {
                rotate_right(&mut left, parent, node, node_index)?;
                self.tx.write_node(&left)?;
                self.tx.write_node(parent)?;
                self.tx.write_node(node)?;
                return Ok(());
            }
        }

        if node_index < parent.children.len() - 1 {
            let mut right = self.tx.get_node(parent.children[node_index + 1])?;
            if self.tx.split_index(&right).is_some() {
                rotate_left(node, parent, &mut right, node_index)?;
                self.tx.write_node(node)?;
                self.tx.write_node(parent)?;
                self.tx.write_node(&right)?;
                return Ok(());
            }
        }

        // Neither sibling can spare an item. At the left edge the right
        // sibling folds into this node; otherwise this node folds into its
        // left sibling.
        if node_index == 0 {
            let right = self.tx.get_node(parent.children[1])?;
            return self.merge(parent, right, 1);
        }

        self.merge(parent, node.clone(), node_index)
    }

    /// Folds `b_node` (at `parent.children[b_index]`) into its left sibling
    /// along with the separator, then releases `b_node`'s page.
    fn merge(&mut self, parent: &mut Node, b_node: Node, b_index: usize) -> Result<()> {
        ensure!(
            b_index > 0 && b_index < parent.children.len(),
            "merge index {} out of range for page {}",
            b_index,
            parent.page_number
        );

        let mut a_node = self.tx.get_node(parent.children[b_index - 1])?;

        let separator = parent.items.remove(b_index - 1);
        a_node.items.push(separator);
        a_node.items.extend(b_node.items);
        parent.children.remove(b_index);
        if !a_node.is_leaf() {
            a_node.children.extend(b_node.children);
        }

        self.tx.write_node(&a_node)?;
        self.tx.write_node(parent)?;
        self.tx.delete_node(b_node.page_number)?;
        Ok(())
    }
}

fn rotate_right(
    left: &mut Node,
    parent: &mut Node,
    node: &mut Node,
    node_index: usize,
) -> Result<()> {
    let spare = left
        .items
        .pop()
        .ok_or_else(|| eyre::eyre!("rotate right from an empty sibling"))?;

    // Separator index clamps at the left edge.
    let separator_index = node_index.saturating_sub(1);
    let separator = std::mem::replace(&mut parent.items[separator_index], spare);
    node.items.insert(0, separator);

    if !left.is_leaf() {
        let child = left.children.pop().ok_or_else(|| {
            eyre::eyre!("rotate right from an internal sibling without children")
        })?;
        node.children.insert(0, child);
    }

    Ok(())
}

fn rotate_left(
    node: &mut Node,
    parent: &mut Node,
    right: &mut Node,
    node_index: usize,
) -> Result<()> {
    ensure!(
        !right.items.is_empty(),
        "rotate left from an empty sibling"
    );
    let spare = right.items.remove(0);

    // Separator index clamps at the right edge.
    let separator_index = node_index.min(parent.items.len() - 1);
    let separator = std::mem::replace(&mut parent.items[separator_index], spare);
    node.items.push(separator);

    if !right.is_leaf() {
        ensure!(
            !right.children.is_empty(),
            "rotate left from an internal sibling without children"
        );
        node.children.push(right.children.remove(0));
    }

    Ok(())
}
