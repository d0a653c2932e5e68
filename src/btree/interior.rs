//! # Interior Nodes
//!
//! Interior nodes route key lookups to children. A node holds a leftmost
//! child pointer plus sorted cells; cell `i` covers keys in
//! `[cell[i].key, cell[i+1].key)` and keys below `cell[0].key` go to the
//! leftmost child. Every separator key therefore has exactly one child to
//! its left and one to its right.
//!
//! Balancing between interior siblings rotates cells through the parent
//! separator: the separator key pairs with the right node's leftmost child
//! to form a regular cell on whichever side receives it, and the boundary
//! cell of the moved run surrenders its key to the parent and its child to
//! the right node's leftmost slot.

use eyre::{ensure, eyre, Result};
use zerocopy::IntoBytes;

use super::{
    plan_rotation, InteriorCell, MergeOutcome, NodePageHeader, INTERIOR_PAGE_TYPE,
};
use crate::btree::Key;
use crate::config::{full_threshold, small_threshold, NODE_HEADER_SIZE};

#[derive(Debug, Clone)]
pub struct InteriorNode {
    page_no: u32,
    page_size: usize,
    cells: Vec<InteriorCell>,
    leftmost_child: u32,
    size: usize,
    dirty: bool,
}

impl InteriorNode {
    pub fn new(page_no: u32, page_size: usize, leftmost_child: u32) -> Self {
        Self {
            page_no,
            page_size,
            cells: Vec::new(),
            leftmost_child,
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
            header.page_type() == INTERIOR_PAGE_TYPE,
            "expected interior page, got type {:#04x} on page {}",
            header.page_type(),
            page_no
        );

        let mut cells = Vec::with_capacity(header.cell_count());
        let mut size = NODE_HEADER_SIZE;
        let mut off = NODE_HEADER_SIZE;
        for _ in 0..header.cell_count() {
            let (cell, consumed) = InteriorCell::decode(&data[off..])?;
            if let Some(last) = cells.last() {
                let last: &InteriorCell = last;
                ensure!(
                    last.key() < cell.key(),
                    "corrupt interior page {}: cells out of order",
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
            leftmost_child: header.link(),
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
            "too many cells in interior page {}: {}",
            self.page_no,
            self.cells.len()
        );
        ensure!(
            self.size <= self.page_size,
            "interior page {} overflows its page: {} > {}",
            self.page_no,
            self.size,
            self.page_size
        );

        let header = NodePageHeader::new(
            INTERIOR_PAGE_TYPE,
            self.cells.len() as u8,
            self.leftmost_child,
        );
        out[..NODE_HEADER_SIZE].copy_from_slice(header.as_bytes());
        let mut off = NODE_HEADER_SIZE;
        for cell in &self.cells {
            off += cell.encode(&mut out[off..])?;
        }
        out[off..].fill(0);
        Ok(())
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, index: usize) -> Result<&InteriorCell> {
        self.cells
            .get(index)
            .ok_or_else(|| eyre!("cell index {} out of bounds ({})", index, self.cells.len()))
    }

    pub fn cells(&self) -> &[InteriorCell] {
        &self.cells
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_small(&self) -> bool {
        self.size < small_threshold(self.page_size)
    }

    pub fn is_full(&self) -> bool {
        self.size > full_threshold(self.page_size)
    }

    pub fn leftmost_child(&self) -> u32 {
        self.leftmost_child
    }

    pub fn set_leftmost_child(&mut self, page_no: u32) {
        self.leftmost_child = page_no;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Routes `key` to a child page. Returns the index of the separator cell
    /// the key fell under (`None` for the leftmost child) together with the
    /// child page number.
    pub fn find_child(&self, key: &Key) -> (Option<usize>, u32) {
        match self.cells.binary_search_by(|c| c.key().cmp(key)) {
            Ok(i) => (Some(i), self.cells[i].child()),
            Err(0) => (None, self.leftmost_child),
            Err(i) => (Some(i - 1), self.cells[i - 1].child()),
        }
    }

    /// Inserts keeping sort order. Separator keys are unique by
    /// construction, so an equal key is a logic error.
    pub fn add_cell(&mut self, cell: InteriorCell) -> Result<()> {
        let index = match self.cells.binary_search_by(|c| c.key().cmp(cell.key())) {
            Ok(_) => eyre::bail!(
                "duplicate separator key in interior page {}",
                self.page_no
            ),
            Err(i) => i,
        };
        self.size += cell.cell_size();
        self.cells.insert(index, cell);
        self.dirty = true;
        Ok(())
    }

    pub fn remove_cell(&mut self, index: usize) -> Result<InteriorCell> {
        ensure!(
            index < self.cells.len(),
            "cell index {} out of bounds ({})",
            index,
            self.cells.len()
        );
        let cell = self.cells.remove(index);
        self.size -= cell.cell_size();
        self.dirty = true;
        Ok(cell)
    }

    /// Splits this (full) node: `cell` is inserted, trailing cells move into
    /// the empty `right` sibling, and the boundary cell is popped so its key
    /// can route in the parent and its child becomes the right node's
    /// leftmost. Returns the routing key.
    pub fn split(&mut self, right: &mut InteriorNode, cell: InteriorCell) -> Result<Key> {
        ensure!(
            right.cells.is_empty(),
            "split target page {} is not empty",
            right.page_no
        );
        self.add_cell(cell)?;

        let small = small_threshold(self.page_size);
        let moved = plan_rotation(
            self.cells.iter().rev().map(InteriorCell::cell_size),
            self.size,
            right.size,
            0,
            small,
        )
        .ok_or_else(|| eyre!("split of page {} found no balance point", self.page_no))?;
        ensure!(
            moved > 1 && moved < self.cells.len(),
            "split of page {} would not divide its cells",
            self.page_no
        );

        let at = self.cells.len() - moved;
        for cell in self.cells.drain(at..) {
            let size = cell.cell_size();
            right.cells.push(cell);
            right.size += size;
            self.size -= size;
        }
        let boundary = right.remove_cell(0)?;
        right.leftmost_child = boundary.child();
        self.dirty = true;
        right.dirty = true;

        Ok(boundary.into_key())
    }

    /// Combines this node with its right sibling across the `separator` cell
    /// in their parent. A full merge absorbs the separator as a regular cell
    /// over the right node's leftmost child; a redistribution rotates cells
    /// through the separator and returns the new routing key.
    pub fn merge(
        &mut self,
        right: &mut InteriorNode,
        separator: &InteriorCell,
    ) -> Result<MergeOutcome> {
        let small = small_threshold(self.page_size);
        let combined = self.size + right.size - NODE_HEADER_SIZE + separator.cell_size();
        if combined < small {
            self.absorb(right, separator)?;
            return Ok(MergeOutcome::Merged);
        }

        let plan = if self.size <= right.size {
            plan_rotation(
                right.cells.iter().map(InteriorCell::cell_size),
                right.size,
                self.size,
                separator.cell_size(),
                small,
            )
        } else {
            plan_rotation(
                self.cells.iter().rev().map(InteriorCell::cell_size),
                self.size,
                right.size,
                separator.cell_size(),
                small,
            )
        };

        let Some(moved) = plan else {
            self.absorb(right, separator)?;
            return Ok(MergeOutcome::Merged);
        };
        if moved == 0 {
            self.absorb(right, separator)?;
            return Ok(MergeOutcome::Merged);
        }

        let new_separator = if self.size <= right.size {
            // Right donates its first `moved` cells. The parent key pairs
            // with the right node's leftmost child on the left side; the
            // last moved cell becomes boundary.
            self.add_cell(InteriorCell::new(
                separator.key().clone(),
                right.leftmost_child,
            )?)?;
            let mut boundary = None;
            for cell in right.cells.drain(..moved) {
                right.size -= cell.cell_size();
                if let Some(prev) = boundary.replace(cell) {
                    self.size += prev.cell_size();
                    self.cells.push(prev);
                }
            }
            let boundary = boundary.ok_or_else(|| eyre!("empty move plan"))?;
            right.leftmost_child = boundary.child();
            boundary.into_key()
        } else {
            // Left donates its last `moved` cells. The first moved cell is
            // the boundary; the rest keep their own key and child.
            let at = self.cells.len() - moved;
            let mut donated = self.cells.drain(at..);
            let boundary = donated.next().ok_or_else(|| eyre!("empty move plan"))?;
            let rest: Vec<InteriorCell> = donated.collect();

            right.add_cell(InteriorCell::new(
                separator.key().clone(),
                right.leftmost_child,
            )?)?;
            for (slot, cell) in rest.into_iter().enumerate() {
                right.size += cell.cell_size();
                right.cells.insert(slot, cell);
            }
            self.size -= boundary.cell_size();
            for cell in &right.cells[..moved - 1] {
                self.size -= cell.cell_size();
            }
            right.leftmost_child = boundary.child();
            boundary.into_key()
        };

        self.dirty = true;
        right.dirty = true;
        Ok(MergeOutcome::Rebalanced(new_separator))
    }

    fn absorb(&mut self, right: &mut InteriorNode, separator: &InteriorCell) -> Result<()> {
        self.add_cell(InteriorCell::new(
            separator.key().clone(),
            right.leftmost_child,
        )?)?;
        for cell in right.cells.drain(..) {
            self.size += cell.cell_size();
            self.cells.push(cell);
        }
        right.size = NODE_HEADER_SIZE;
        self.dirty = true;
        right.dirty = true;
        Ok(())
    }
}
