//! # B+Tree Nodes and Algorithms
//!
//! This module implements the per-tree B+Tree: sorted-cell leaf and interior
//! nodes, the split/merge/redistribute balancing operations, and the `Tree`
//! facade that drives insert/select/delete through the container.
//!
//! ## Node Pages
//!
//! Every node occupies one page. The page starts with a 16-byte header:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ----------------------------------------------
//! 0       1     page type (1 = leaf, 2 = interior)
//! 1       1     cell count
//! 2       2     reserved
//! 4       4     link: next leaf page (leaf) / leftmost child (interior)
//! 8       8     reserved
//! 16      ...   cells, encoded back to back in key order
//! ```
//!
//! Leaves chain through the link pointer in key order, so range scans walk
//! sibling leaves without re-descending. An interior node's cell `i` routes
//! keys in `[cell[i].key, cell[i+1].key)`; keys below `cell[0].key` go to
//! the leftmost child.
//!
//! ## Size Classes
//!
//! A node's size is the 16-byte header plus the sum of its cell sizes.
//! Nodes below `page_size / 4` are *small* (merge candidates); nodes above
//! `page_size - 128` are *full* (must split before the next insert). The
//! margin guarantees any single insert fits.
//!
//! ## Redistribution
//!
//! Split and merge share one planning rule, [`plan_move`]: starting from
//! the donor end nearest the recipient, move cells until the recipient
//! stops being small, keep moving while the donor still exceeds the ideal
//! midpoint, and refuse the move entirely if the donor itself would become
//! small. Both survivors end up between the small and full thresholds, a
//! few cell-widths either side of the midpoint. Interior siblings rotate
//! the moved run through the parent separator, so they plan with the
//! [`plan_rotation`] variant, which prices each donated cell at the size
//! it actually lands with on the recipient.

mod cell;
mod interior;
mod key;
mod leaf;
mod tree;

pub use cell::{InteriorCell, LeafCell};
pub use interior::InteriorNode;
pub use key::Key;
pub use leaf::LeafNode;
pub use tree::Tree;

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::NODE_HEADER_SIZE;

pub const LEAF_PAGE_TYPE: u8 = 1;
pub const INTERIOR_PAGE_TYPE: u8 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct NodePageHeader {
    page_type: u8,
    cell_count: u8,
    reserved: [u8; 2],
    link: U32,
    reserved2: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<NodePageHeader>() == NODE_HEADER_SIZE);

impl NodePageHeader {
    pub(crate) fn new(page_type: u8, cell_count: u8, link: u32) -> Self {
        Self {
            page_type,
            cell_count,
            reserved: [0; 2],
            link: U32::new(link),
            reserved2: [0; 8],
        }
    }

    pub(crate) fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= NODE_HEADER_SIZE,
            "buffer too small for node header: {} < {}",
            data.len(),
            NODE_HEADER_SIZE
        );
        Self::ref_from_bytes(&data[..NODE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read node header: {:?}", e))
    }

    pub(crate) fn page_type(&self) -> u8 {
        self.page_type
    }

    pub(crate) fn cell_count(&self) -> usize {
        self.cell_count as usize
    }

    pub(crate) fn link(&self) -> u32 {
        self.link.get()
    }
}

/// Result of a key lookup within one node's sorted cell list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    NotFound(usize),
}

/// Result of merging a small node with a sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The right node was fully absorbed into the left; the caller removes
    /// the parent separator and frees the right page.
    Merged,
    /// Cells were redistributed; the caller rewrites the parent separator
    /// with the returned key.
    Rebalanced(Key),
}

/// A typed in-memory node page.
#[derive(Debug, Clone)]
pub enum Node {
    Leaf(LeafNode),
    Interior(InteriorNode),
}

impl Node {
    pub fn from_page(page_no: u32, data: &[u8], page_size: usize) -> Result<Self> {
        ensure!(!data.is_empty(), "empty node page {}", page_no);
        match data[0] {
            LEAF_PAGE_TYPE => Ok(Node::Leaf(LeafNode::from_page(page_no, data, page_size)?)),
            INTERIOR_PAGE_TYPE => Ok(Node::Interior(InteriorNode::from_page(
                page_no, data, page_size,
            )?)),
            other => bail!("invalid node page type {:#04x} on page {}", other, page_no),
        }
    }

    pub fn page_no(&self) -> u32 {
        match self {
            Node::Leaf(n) => n.page_no(),
            Node::Interior(n) => n.page_no(),
        }
    }
}

/// Plans how many cells to move from a donor node into a recipient sibling.
///
/// `sizes` yields the donor's cell sizes starting from the end nearest the
/// recipient. Returns the number of cells to move, or `None` when no partial
/// move can leave the donor non-small (the caller falls back to a full
/// merge).
pub(crate) fn plan_move(
    sizes: impl Iterator<Item = usize>,
    donor_size: usize,
    recipient_size: usize,
    small: usize,
) -> Option<usize> {
    let ideal = ((donor_size + recipient_size) / 2).max(small);
    let mut remaining = donor_size;
    let mut recipient = recipient_size;
    let mut moved = 0;

    for cell_size in sizes {
        if recipient >= small && remaining <= ideal {
            break;
        }
        if remaining - cell_size < small {
            // The donor cannot spare this cell.
            if recipient < small {
                return None;
            }
            break;
        }
        remaining -= cell_size;
        recipient += cell_size;
        moved += 1;
    }

    if recipient < small {
        None
    } else {
        Some(moved)
    }
}

/// [`plan_move`] for interior siblings, where the move rotates through the
/// parent separator: the first donated cell lands on the recipient keyed by
/// the separator (`separator_size`), every later cell lands at its
/// predecessor's size, and the boundary cell's key leaves for the parent.
/// A split into an empty right node passes `separator_size` 0, since the
/// boundary cell is popped entirely.
pub(crate) fn plan_rotation(
    sizes: impl Iterator<Item = usize>,
    donor_size: usize,
    recipient_size: usize,
    separator_size: usize,
    small: usize,
) -> Option<usize> {
    let ideal = ((donor_size + recipient_size) / 2).max(small);
    let mut remaining = donor_size;
    let mut recipient = recipient_size;
    let mut moved = 0;
    let mut gain = separator_size;

    for cell_size in sizes {
        if recipient >= small && remaining <= ideal {
            break;
        }
        if remaining - cell_size < small {
            if recipient < small {
                return None;
            }
            break;
        }
        remaining -= cell_size;
        recipient += gain;
        gain = cell_size;
        moved += 1;
    }

    if recipient < small {
        None
    } else {
        Some(moved)
    }
}
