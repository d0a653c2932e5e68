//! # Leaf Nodes
//!
//! Leaf nodes own the data cells of a tree. Cells are kept strictly sorted
//! by key with no duplicates; a cell's ordinal is its position in the list
//! and is recomputed implicitly by every structural change. Leaves of one
//! tree form a singly linked list in key order through the next-leaf
//! pointer, which range scans follow instead of re-descending.
//!
//! The node tracks its serialized size incrementally (header plus cell
//! sizes) so the small/full classifications that drive merge and split
//! decisions are O(1).

use eyre::{ensure, eyre, Result};
use zerocopy::IntoBytes;

use super::{
    plan_move, LeafCell, MergeOutcome, NodePageHeader, SearchResult, LEAF_PAGE_TYPE,
};
use crate::btree::Key;
use crate::config::{full_threshold, small_threshold, NODE_HEADER_SIZE};

#[derive(Debug, Clone)]
pub struct LeafNode {
    page_no: u32,
    page_size: usize,
    cells: Vec<LeafCell>,
    next_leaf: u32,
    size: usize,
    dirty: bool,
}

impl LeafNode {
    pub fn new(page_no: u32, page_size: usize) -> Self {
        Self {
            page_no,
            page_size,
            cells: Vec::new(),
            next_leaf: 0,
            size: NODE_HEADER_SIZE,
            dirty: true,
        }
    }

    pub fn from_page(page_no: u32, data: &[u8], page_size: usize) -> Result<Self> {
        ensure!(
            data.len() == page_size,
            "invalid page size: {} != {}",
            data.len(),
            page_size
        );
        let header = NodePageHeader::from_bytes(data)?;
        ensure!(
            header.page_type() == LEAF_PAGE_TYPE,
            "expected leaf page, got type {:#04x} on page {}",
            header.page_type(),
            page_no
        );

        let mut cells = Vec::with_capacity(header.cell_count());
        let mut size = NODE_HEADER_SIZE;
        let mut off = NODE_HEADER_SIZE;
        for _ in 0..header.cell_count() {
            let (cell, consumed) = LeafCell::decode(&data[off..], page_size)?;
            if let Some(last) = cells.last() {
                let last: &LeafCell = last;
                ensure!(
                    last.key() < cell.key(),
                    "corrupt leaf page {}: cells out of order",
                    page_no
                );
            }
            cells.push(cell);
            off += consumed;
            size += consumed;
        }

        Ok(Self {
            page_no,
            page_size,
            cells,
            next_leaf: header.link(),
            size,
            dirty: false,
        })
    }

    pub fn save(&self, out: &mut [u8]) -> Result<()> {
        ensure!(
            out.len() == self.page_size,
            "invalid page size: {} != {}",
            out.len(),
            self.page_size
        );
        ensure!(
            self.cells.len() <= u8::MAX as usize,
            "too many cells in leaf page {}: {}",
            self.page_no,
            self.cells.len()
        );
        ensure!(
            self.size <= self.page_size,
            "leaf page {} overflows its page: {} > {}",
            self.page_no,
            self.size,
            self.page_size
        );

        let header = NodePageHeader::new(LEAF_PAGE_TYPE, self.cells.len() as u8, self.next_leaf);
        out[..NODE_HEADER_SIZE].copy_from_slice(header.as_bytes());
        let mut off = NODE_HEADER_SIZE;
        for cell in &self.cells {
            off += cell.encode(&mut out[off..], self.page_size)?;
        }
        out[off..].fill(0);
        Ok(())
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, index: usize) -> Result<&LeafCell> {
        self.cells
            .get(index)
            .ok_or_else(|| eyre!("cell index {} out of bounds ({})", index, self.cells.len()))
    }

    pub fn cells(&self) -> &[LeafCell] {
        &self.cells
    }

    /// Running size: header plus the sum of all cell sizes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_small(&self) -> bool {
        self.size < small_threshold(self.page_size)
    }

    pub fn is_full(&self) -> bool {
        self.size > full_threshold(self.page_size)
    }

    pub fn next_leaf(&self) -> u32 {
        self.next_leaf
    }

    pub fn set_next_leaf(&mut self, page_no: u32) {
        self.next_leaf = page_no;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn find(&self, key: &Key) -> SearchResult {
        match self.cells.binary_search_by(|c| c.key().cmp(key)) {
            Ok(i) => SearchResult::Found(i),
            Err(i) => SearchResult::NotFound(i),
        }
    }

    /// Inserts keeping sort order. A cell with an equal key is replaced and
    /// returned so the caller can purge its overflow chain.
    pub fn add_cell(&mut self, cell: LeafCell) -> Option<LeafCell> {
        self.dirty = true;
        match self.find(cell.key()) {
            SearchResult::Found(i) => {
                self.size += cell.cell_size(self.page_size);
                let old = std::mem::replace(&mut self.cells[i], cell);
                self.size -= old.cell_size(self.page_size);
                Some(old)
            }
            SearchResult::NotFound(i) => {
                self.size += cell.cell_size(self.page_size);
                self.cells.insert(i, cell);
                None
            }
        }
    }

    pub fn remove_cell(&mut self, index: usize) -> Result<LeafCell> {
        ensure!(
            index < self.cells.len(),
            "cell index {} out of bounds ({})",
            index,
            self.cells.len()
        );
        let cell = self.cells.remove(index);
        self.size -= cell.cell_size(self.page_size);
        self.dirty = true;
        Ok(cell)
    }

    /// Splits this (full) node: `cell` is inserted, trailing cells move into
    /// the empty `right` sibling, and the leaf chain is relinked. Returns
    /// the routing key for the parent: the right node's first key.
    pub fn split(&mut self, right: &mut LeafNode, cell: LeafCell) -> Result<Key> {
        ensure!(
            right.cells.is_empty(),
            "split target page {} is not empty",
            right.page_no
        );
        self.add_cell(cell);

        let small = small_threshold(self.page_size);
        let moved = plan_move(
            self.cells
                .iter()
                .rev()
                .map(|c| c.cell_size(self.page_size)),
            self.size,
            right.size,
            small,
        )
        .ok_or_else(|| eyre!("split of page {} found no balance point", self.page_no))?;
        ensure!(
            moved > 0 && moved < self.cells.len(),
            "split of page {} would not divide its cells",
            self.page_no
        );

        let at = self.cells.len() - moved;
        for cell in self.cells.drain(at..) {
            let size = cell.cell_size(right.page_size);
            right.cells.push(cell);
            right.size += size;
            self.size -= size;
        }
        right.next_leaf = self.next_leaf;
        self.next_leaf = right.page_no;
        self.dirty = true;
        right.dirty = true;

        Ok(right.cells[0].key().clone())
    }

    /// Combines this node with its right sibling: a full merge when the
    /// combined cells stay under the small threshold (or no partial move is
    /// possible), otherwise a redistribution towards the smaller side.
    pub fn merge(&mut self, right: &mut LeafNode) -> Result<MergeOutcome> {
        let small = small_threshold(self.page_size);
        let combined = self.size + right.size - NODE_HEADER_SIZE;
        if combined < small {
            self.absorb(right);
            return Ok(MergeOutcome::Merged);
        }

        let plan = if self.size <= right.size {
            // Right donates from its front.
            plan_move(
                right.cells.iter().map(|c| c.cell_size(self.page_size)),
                right.size,
                self.size,
                small,
            )
        } else {
            // Left donates from its back.
            plan_move(
                self.cells
                    .iter()
                    .rev()
                    .map(|c| c.cell_size(self.page_size)),
                self.size,
                right.size,
                small,
            )
        };

        let Some(moved) = plan else {
            self.absorb(right);
            return Ok(MergeOutcome::Merged);
        };

        if moved > 0 {
            if self.size <= right.size {
                for cell in right.cells.drain(..moved) {
                    let size = cell.cell_size(self.page_size);
                    self.cells.push(cell);
                    self.size += size;
                    right.size -= size;
                }
            } else {
                let at = self.cells.len() - moved;
                for (slot, cell) in self.cells.drain(at..).enumerate() {
                    let size = cell.cell_size(right.page_size);
                    right.cells.insert(slot, cell);
                    right.size += size;
                    self.size -= size;
                }
            }
            self.dirty = true;
            right.dirty = true;
        }

        Ok(MergeOutcome::Rebalanced(right.cells[0].key().clone()))
    }

    fn absorb(&mut self, right: &mut LeafNode) {
        for cell in right.cells.drain(..) {
            self.size += cell.cell_size(self.page_size);
            self.cells.push(cell);
        }
        right.size = NODE_HEADER_SIZE;
        self.next_leaf = right.next_leaf;
        self.dirty = true;
        right.dirty = true;
    }
}
