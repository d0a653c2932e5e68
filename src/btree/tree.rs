//! # Tree Operations
//!
//! [`Tree`] is a handle to one of the container's sixteen trees. Every
//! operation is its own transaction: writes take the slot's write lock,
//! buffer their page changes and commit (or roll back on error), reads
//! take the shared read lock for the duration of the scan.
//!
//! Descents record the interior pages they pass through, so splits can
//! propagate routing cells upward and deletions can rebalance small nodes
//! against a sibling, cascading merges toward the root. A root interior
//! node left with no separators collapses into its single child; deleting
//! the last cell of a root leaf empties the tree.

use eyre::{bail, Result};
use smallvec::SmallVec;

use super::{InteriorCell, InteriorNode, LeafCell, Key, LeafNode, MergeOutcome, Node, SearchResult};
use crate::container::Container;

pub struct Tree<'a> {
    container: &'a Container,
    slot: usize,
}

impl<'a> Tree<'a> {
    pub(crate) fn new(container: &'a Container, slot: usize) -> Self {
        Self { container, slot }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Inserts a key/value pair, replacing the value if the key exists.
    pub fn insert(&self, key: &Key, value: &[u8]) -> Result<()> {
        self.container.write_tree(self.slot)?;
        match self.insert_locked(key, value) {
            Ok(()) => self.container.commit_write(self.slot),
            Err(e) => {
                let _ = self.container.rollback_write(self.slot);
                Err(e)
            }
        }
    }

    /// Replaces the value of an existing key. Returns false (changing
    /// nothing) when the key is absent.
    pub fn update(&self, key: &Key, value: &[u8]) -> Result<bool> {
        self.container.write_tree(self.slot)?;
        let result = self
            .contains_locked(key)
            .and_then(|found| {
                if found {
                    self.insert_locked(key, value).map(|()| true)
                } else {
                    Ok(false)
                }
            });
        match result {
            Ok(found) => {
                self.container.commit_write(self.slot)?;
                Ok(found)
            }
            Err(e) => {
                let _ = self.container.rollback_write(self.slot);
                Err(e)
            }
        }
    }

    /// Removes a key. Returns false when the key is absent.
    pub fn delete(&self, key: &Key) -> Result<bool> {
        self.container.write_tree(self.slot)?;
        match self.delete_locked(key) {
            Ok(found) => {
                self.container.commit_write(self.slot)?;
                Ok(found)
            }
            Err(e) => {
                let _ = self.container.rollback_write(self.slot);
                Err(e)
            }
        }
    }

    /// The value stored under `key`, overflow chain reassembled.
    pub fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let mut rows = self.select(key, key)?;
        Ok(rows.pop().map(|(_, value)| value))
    }

    /// All pairs with `min <= key <= max`, in key order. `Key::max()` as
    /// the upper bound scans to the end of the tree.
    pub fn select(&self, min: &Key, max: &Key) -> Result<Vec<(Key, Vec<u8>)>> {
        self.container.read_tree(self.slot)?;
        let result = self.select_locked(min, max);
        let unlocked = self.container.unlock_read(self.slot);
        match result {
            Ok(rows) => {
                unlocked?;
                Ok(rows)
            }
            Err(e) => Err(e),
        }
    }

    fn select_locked(&self, min: &Key, max: &Key) -> Result<Vec<(Key, Vec<u8>)>> {
        let root = self.container.tree_root(self.slot)?;
        if root == 0 {
            return Ok(Vec::new());
        }
        let mut current = root;
        let mut leaf = loop {
            match self.container.get_node(self.slot, current)? {
                Node::Interior(node) => current = node.find_child(min).1,
                Node::Leaf(node) => break node,
            }
        };
        let mut index = match leaf.find(min) {
            SearchResult::Found(i) | SearchResult::NotFound(i) => i,
        };

        let mut rows = Vec::new();
        loop {
            while index < leaf.cell_count() {
                let cell = leaf.cell(index)?;
                if cell.key() > max {
                    return Ok(rows);
                }
                rows.push((cell.key().clone(), self.read_value(cell)?));
                index += 1;
            }
            let next = leaf.next_leaf();
            if next == 0 {
                return Ok(rows);
            }
            let Node::Leaf(sibling) = self.container.get_node(self.slot, next)? else {
                bail!("expected leaf page {}", next);
            };
            leaf = sibling;
            index = 0;
        }
    }

    fn contains_locked(&self, key: &Key) -> Result<bool> {
        let root = self.container.tree_root(self.slot)?;
        if root == 0 {
            return Ok(false);
        }
        let mut current = root;
        let leaf = loop {
            match self.container.get_node(self.slot, current)? {
                Node::Interior(node) => current = node.find_child(key).1,
                Node::Leaf(node) => break node,
            }
        };
        Ok(matches!(leaf.find(key), SearchResult::Found(_)))
    }

    fn insert_locked(&self, key: &Key, value: &[u8]) -> Result<()> {
        let page_size = self.container.page_size();
        let mut cell = LeafCell::new(key.clone(), value, page_size)?;
        if cell.overflow_page_count() > 0 {
            let first = self.write_overflow_chain(&value[cell.inline().len()..])?;
            cell.set_first_overflow_page(first);
        }

        let root = self.container.tree_root(self.slot)?;
        if root == 0 {
            let mut leaf = self.container.create_leaf(self.slot)?;
            leaf.add_cell(cell);
            let page_no = leaf.page_no();
            self.container.put_node(self.slot, Node::Leaf(leaf))?;
            self.container.set_tree_root(self.slot, page_no)?;
            return Ok(());
        }

        let mut path: SmallVec<[u32; 8]> = SmallVec::new();
        let mut current = root;
        let mut leaf = loop {
            match self.container.get_node(self.slot, current)? {
                Node::Interior(node) => {
                    path.push(current);
                    current = node.find_child(key).1;
                }
                Node::Leaf(node) => break node,
            }
        };

        if let SearchResult::Found(index) = leaf.find(key) {
            let old = leaf.remove_cell(index)?;
            self.free_overflow_chain(old.first_overflow_page())?;
        }
        if !leaf.is_full() {
            leaf.add_cell(cell);
            return self.container.put_node(self.slot, Node::Leaf(leaf));
        }

        let left_page = leaf.page_no();
        let mut right = self.container.create_leaf(self.slot)?;
        let separator = leaf.split(&mut right, cell)?;
        let right_page = right.page_no();
        self.container.put_node(self.slot, Node::Leaf(leaf))?;
        self.container.put_node(self.slot, Node::Leaf(right))?;
        self.add_to_parent(path, separator, left_page, right_page)
    }

    /// Propagates a split upward: each full ancestor splits in turn, and a
    /// split of the root grows the tree by one level.
    fn add_to_parent(
        &self,
        mut path: SmallVec<[u32; 8]>,
        mut separator: Key,
        mut left_page: u32,
        mut right_page: u32,
    ) -> Result<()> {
        loop {
            let Some(parent_no) = path.pop() else {
                let mut root = self.container.create_interior(self.slot, left_page)?;
                root.add_cell(InteriorCell::new(separator, right_page)?)?;
                let page_no = root.page_no();
                self.container.put_node(self.slot, Node::Interior(root))?;
                self.container.set_tree_root(self.slot, page_no)?;
                return Ok(());
            };
            let Node::Interior(mut parent) = self.container.get_node(self.slot, parent_no)?
            else {
                bail!("expected interior page {}", parent_no);
            };
            let cell = InteriorCell::new(separator, right_page)?;
            if !parent.is_full() {
                parent.add_cell(cell)?;
                return self.container.put_node(self.slot, Node::Interior(parent));
            }
            let mut right = self.container.create_interior(self.slot, 0)?;
            separator = parent.split(&mut right, cell)?;
            right_page = right.page_no();
            left_page = parent_no;
            self.container.put_node(self.slot, Node::Interior(parent))?;
            self.container.put_node(self.slot, Node::Interior(right))?;
        }
    }

    fn delete_locked(&self, key: &Key) -> Result<bool> {
        let root = self.container.tree_root(self.slot)?;
        if root == 0 {
            return Ok(false);
        }

        let mut path: SmallVec<[(u32, Option<usize>); 8]> = SmallVec::new();
        let mut current = root;
        let mut leaf = loop {
            match self.container.get_node(self.slot, current)? {
                Node::Interior(node) => {
                    let (separator, child) = node.find_child(key);
                    path.push((current, separator));
                    current = child;
                }
                Node::Leaf(node) => break node,
            }
        };

        let SearchResult::Found(index) = leaf.find(key) else {
            return Ok(false);
        };
        let cell = leaf.remove_cell(index)?;
        self.free_overflow_chain(cell.first_overflow_page())?;

        if path.is_empty() {
            // Root leaf: no sibling to balance against.
            if leaf.cell_count() == 0 {
                self.container.delete_page(self.slot, leaf.page_no())?;
                self.container.set_tree_root(self.slot, 0)?;
            } else {
                self.container.put_node(self.slot, Node::Leaf(leaf))?;
            }
            return Ok(true);
        }
        if !leaf.is_small() {
            self.container.put_node(self.slot, Node::Leaf(leaf))?;
            return Ok(true);
        }
        self.rebalance_leaf(path, leaf)?;
        Ok(true)
    }

    /// Balances a small leaf against its nearest sibling under the same
    /// parent, then walks the path upward fixing any interior node the
    /// merge made small.
    fn rebalance_leaf(
        &self,
        mut path: SmallVec<[(u32, Option<usize>); 8]>,
        leaf: LeafNode,
    ) -> Result<()> {
        let (parent_no, came_from) = path.pop().ok_or_else(|| eyre::eyre!("empty tree path"))?;
        let Node::Interior(mut parent) = self.container.get_node(self.slot, parent_no)? else {
            bail!("expected interior page {}", parent_no);
        };

        let (mut left, mut right, separator_index) = match came_from {
            None => {
                // Leftmost child: pair with the right sibling.
                let right_page = parent.cell(0)?.child();
                let Node::Leaf(sibling) = self.container.get_node(self.slot, right_page)? else {
                    bail!("expected leaf page {}", right_page);
                };
                (leaf, sibling, 0)
            }
            Some(i) => {
                let left_page = if i == 0 {
                    parent.leftmost_child()
                } else {
                    parent.cell(i - 1)?.child()
                };
                let Node::Leaf(sibling) = self.container.get_node(self.slot, left_page)? else {
                    bail!("expected leaf page {}", left_page);
                };
                (sibling, leaf, i)
            }
        };

        match left.merge(&mut right)? {
            MergeOutcome::Rebalanced(separator) => {
                let old = parent.remove_cell(separator_index)?;
                parent.add_cell(InteriorCell::new(separator, old.child())?)?;
                self.container.put_node(self.slot, Node::Leaf(left))?;
                self.container.put_node(self.slot, Node::Leaf(right))?;
                self.container.put_node(self.slot, Node::Interior(parent))
            }
            MergeOutcome::Merged => {
                self.container.delete_page(self.slot, right.page_no())?;
                self.container.put_node(self.slot, Node::Leaf(left))?;
                parent.remove_cell(separator_index)?;
                self.rebalance_interior(path, parent)
            }
        }
    }

    fn rebalance_interior(
        &self,
        mut path: SmallVec<[(u32, Option<usize>); 8]>,
        mut node: InteriorNode,
    ) -> Result<()> {
        loop {
            let Some((parent_no, came_from)) = path.pop() else {
                // The root: collapse into the single child when no
                // separators remain.
                if node.cell_count() == 0 {
                    self.container.delete_page(self.slot, node.page_no())?;
                    self.container
                        .set_tree_root(self.slot, node.leftmost_child())?;
                } else {
                    self.container.put_node(self.slot, Node::Interior(node))?;
                }
                return Ok(());
            };
            if !node.is_small() {
                return self.container.put_node(self.slot, Node::Interior(node));
            }

            let Node::Interior(mut parent) = self.container.get_node(self.slot, parent_no)?
            else {
                bail!("expected interior page {}", parent_no);
            };
            let (mut left, mut right, separator_index) = match came_from {
                None => {
                    let right_page = parent.cell(0)?.child();
                    let Node::Interior(sibling) =
                        self.container.get_node(self.slot, right_page)?
                    else {
                        bail!("expected interior page {}", right_page);
                    };
                    (node, sibling, 0)
                }
                Some(i) => {
                    let left_page = if i == 0 {
                        parent.leftmost_child()
                    } else {
                        parent.cell(i - 1)?.child()
                    };
                    let Node::Interior(sibling) =
                        self.container.get_node(self.slot, left_page)?
                    else {
                        bail!("expected interior page {}", left_page);
                    };
                    (sibling, node, i)
                }
            };

            let separator_cell = parent.cell(separator_index)?.clone();
            match left.merge(&mut right, &separator_cell)? {
                MergeOutcome::Rebalanced(separator) => {
                    let old = parent.remove_cell(separator_index)?;
                    parent.add_cell(InteriorCell::new(separator, old.child())?)?;
                    self.container.put_node(self.slot, Node::Interior(left))?;
                    self.container.put_node(self.slot, Node::Interior(right))?;
                    return self.container.put_node(self.slot, Node::Interior(parent));
                }
                MergeOutcome::Merged => {
                    self.container.delete_page(self.slot, right.page_no())?;
                    self.container.put_node(self.slot, Node::Interior(left))?;
                    parent.remove_cell(separator_index)?;
                    node = parent;
                }
            }
        }
    }

    /// Builds the overflow chain for the non-inline tail of a value and
    /// returns the first page number.
    fn write_overflow_chain(&self, data: &[u8]) -> Result<u32> {
        let mut pages: Vec<_> = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let mut page = self.container.create_overflow(self.slot)?;
            offset += page.write_data(data, offset);
            pages.push(page);
        }
        for i in 0..pages.len().saturating_sub(1) {
            let next = pages[i + 1].page_no();
            pages[i].set_next(next);
        }
        let first = pages.first().map(|p| p.page_no()).unwrap_or(0);
        for page in pages {
            self.container.put_overflow(self.slot, page)?;
        }
        Ok(first)
    }

    fn free_overflow_chain(&self, first: u32) -> Result<()> {
        let mut page_no = first;
        while page_no != 0 {
            let page = self.container.get_overflow(self.slot, page_no)?;
            self.container.delete_page(self.slot, page_no)?;
            page_no = page.next();
        }
        Ok(())
    }

    /// Reassembles a cell's full value from its inline prefix and overflow
    /// chain.
    fn read_value(&self, cell: &LeafCell) -> Result<Vec<u8>> {
        let mut value = cell.inline().to_vec();
        let mut page_no = cell.first_overflow_page();
        while page_no != 0 {
            let page = self.container.get_overflow(self.slot, page_no)?;
            page.read_into(&mut value);
            page_no = page.next();
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_roundtrip() {
        let container = Container::in_memory().unwrap();
        let tree = container.tree(0).unwrap();

        tree.insert(&Key::from_ascii("alpha").unwrap(), b"one").unwrap();
        tree.insert(&Key::from_ascii("beta").unwrap(), b"two").unwrap();

        assert_eq!(
            tree.get(&Key::from_ascii("alpha").unwrap()).unwrap(),
            Some(b"one".to_vec())
        );
        assert_eq!(tree.get(&Key::from_ascii("gamma").unwrap()).unwrap(), None);
    }

    #[test]
    fn insert_replaces_existing_value() {
        let container = Container::in_memory().unwrap();
        let tree = container.tree(0).unwrap();
        let key = Key::from_i32(7);

        tree.insert(&key, b"first").unwrap();
        tree.insert(&key, b"second").unwrap();

        assert_eq!(tree.get(&key).unwrap(), Some(b"second".to_vec()));
        assert_eq!(tree.select(&Key::min(), &Key::max()).unwrap().len(), 1);
    }

    #[test]
    fn update_touches_only_existing_keys() {
        let container = Container::in_memory().unwrap();
        let tree = container.tree(0).unwrap();
        let key = Key::from_i32(1);

        assert!(!tree.update(&key, b"x").unwrap());
        assert_eq!(tree.get(&key).unwrap(), None);

        tree.insert(&key, b"x").unwrap();
        assert!(tree.update(&key, b"y").unwrap());
        assert_eq!(tree.get(&key).unwrap(), Some(b"y".to_vec()));
    }

    #[test]
    fn delete_last_key_empties_the_tree() {
        let container = Container::in_memory().unwrap();
        let tree = container.tree(0).unwrap();
        let key = Key::from_i32(1);

        tree.insert(&key, b"v").unwrap();
        assert!(tree.delete(&key).unwrap());
        assert!(!tree.delete(&key).unwrap());
        assert_eq!(tree.get(&key).unwrap(), None);
        assert!(tree.select(&Key::min(), &Key::max()).unwrap().is_empty());
    }

    #[test]
    fn long_value_roundtrips_through_the_overflow_chain() {
        let container = Container::in_memory().unwrap();
        let tree = container.tree(0).unwrap();
        let key = Key::from_ascii("big").unwrap();
        let value: Vec<u8> = (0..3022u32).map(|i| (i % 251) as u8).collect();

        tree.insert(&key, &value).unwrap();

        assert_eq!(tree.get(&key).unwrap(), Some(value));
    }

    #[test]
    fn trees_are_independent() {
        let container = Container::in_memory().unwrap();
        let key = Key::from_i32(1);

        container.tree(0).unwrap().insert(&key, b"zero").unwrap();
        container.tree(1).unwrap().insert(&key, b"one").unwrap();
        container.tree(0).unwrap().delete(&key).unwrap();

        assert_eq!(container.tree(0).unwrap().get(&key).unwrap(), None);
        assert_eq!(
            container.tree(1).unwrap().get(&key).unwrap(),
            Some(b"one".to_vec())
        );
    }
}
