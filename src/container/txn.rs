//! Write transaction state. A writer never touches the file directly:
//! modified pages accumulate as typed objects in the transaction buffer,
//! deletions as tombstones and allocations as a recovery list. Commit
//! serializes the buffer to the file in one pass; rollback discards it and
//! returns the allocated pages to the free list.

use std::collections::{HashMap, HashSet};

use eyre::Result;

use crate::btree::{InteriorNode, LeafNode, Node};
use crate::storage::OverflowPage;

#[derive(Debug, Clone)]
pub(crate) enum PageObj {
    Leaf(LeafNode),
    Interior(InteriorNode),
    Overflow(OverflowPage),
}

impl PageObj {
    pub(crate) fn save(&self, out: &mut [u8]) -> Result<()> {
        match self {
            PageObj::Leaf(n) => n.save(out),
            PageObj::Interior(n) => n.save(out),
            PageObj::Overflow(p) => p.save(out),
        }
    }
}

impl From<Node> for PageObj {
    fn from(node: Node) -> Self {
        match node {
            Node::Leaf(n) => PageObj::Leaf(n),
            Node::Interior(n) => PageObj::Interior(n),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct WriteTxn {
    /// Modified pages, keyed by page number. Committed in one pass.
    pub(crate) pages: HashMap<u32, PageObj>,
    /// Pages deleted by this transaction; released to the free list at
    /// commit.
    pub(crate) freed: HashSet<u32>,
    /// Pages allocated by this transaction; returned to the free list on
    /// rollback.
    pub(crate) allocated: Vec<u32>,
    /// Pending root change for the locked tree.
    pub(crate) root: Option<u32>,
}

impl WriteTxn {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}
