//! # Container
//!
//! The container owns one paged file and multiplexes sixteen independent
//! trees over it. It is the concurrency and durability boundary: per-tree
//! reader/writer locks, write transactions with commit and rollback, page
//! allocation through the free list, and the TTL page cache swept by a
//! background thread.
//!
//! ## Locking
//!
//! Each tree slot admits any number of concurrent readers or exactly one
//! writer. Acquisition blocks on a per-slot condvar; a thread that already
//! holds a conflicting lock on the same slot gets a "lock conflict" error
//! immediately instead of deadlocking against itself. Different slots never
//! contend except for the short critical sections on the shared state.
//!
//! ## Write Transactions
//!
//! Taking a write lock opens a transaction. Page modifications accumulate
//! in a typed buffer, deletions as tombstones and allocations as a recovery
//! list; nothing reaches the file until commit, which serializes the buffer,
//! the touched free-list trunks and the header in one pass and then syncs.
//! Rollback discards the buffer and returns allocated pages to the free
//! list. Readers of other slots are never affected; a crash between commits
//! leaves the file at the previous committed state.

mod lock;
mod txn;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use eyre::{bail, ensure, eyre, Result};
use parking_lot::{Condvar, Mutex};

use crate::btree::{InteriorNode, LeafNode, Node, Tree};
use crate::config::{
    growth_step, CACHE_SWEEP_INTERVAL_MS, DEFAULT_PAGE_SIZE, TREE_COUNT,
};
use crate::storage::{
    FileHeader, FreeListPage, MemPagedFile, MmapPagedFile, OverflowPage, PageCache, PagedFile,
    HEADER_PAGE,
};

use lock::SlotLock;
pub(crate) use txn::{PageObj, WriteTxn};

#[derive(Default)]
struct Slot {
    lock: SlotLock,
    txn: Option<WriteTxn>,
}

struct State {
    file: Box<dyn PagedFile>,
    page_size: usize,
    header: FileHeader,
    cache: PageCache,
    slots: [Slot; TREE_COUNT],
    /// Free-list trunks touched since the last commit. Written back by the
    /// next commit of any tree.
    dirty_trunks: HashMap<u32, FreeListPage>,
    disposed: bool,
}

struct Shared {
    state: Mutex<State>,
    condvars: [Condvar; TREE_COUNT],
}

pub struct Container {
    shared: Arc<Shared>,
    page_size: usize,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Container {
    /// Initializes a fresh container on `file`: one header page, empty
    /// free list, all sixteen trees empty.
    pub fn create(mut file: Box<dyn PagedFile>) -> Result<Self> {
        let page_size = file.page_size();
        file.set_page_count(1)?;
        let header = FileHeader::new(1);
        let mut buf = vec![0u8; page_size];
        header.save(&mut buf)?;
        file.write_page(HEADER_PAGE, &buf)?;
        file.sync()?;
        Ok(Self::from_parts(file, header, page_size))
    }

    /// Opens an existing container, validating the header. Pages past the
    /// committed total (left by a crash mid-growth) are truncated away.
    pub fn open(mut file: Box<dyn PagedFile>) -> Result<Self> {
        let page_size = file.page_size();
        ensure!(file.page_count() >= 1, "file has no header page");
        let mut buf = vec![0u8; page_size];
        file.read_page(HEADER_PAGE, &mut buf)?;
        let header = FileHeader::from_bytes(&buf)?;
        ensure!(
            header.total_pages() <= file.page_count(),
            "file truncated: {} pages on disk, header records {}",
            file.page_count(),
            header.total_pages()
        );
        file.set_page_count(header.total_pages())?;
        Ok(Self::from_parts(file, header, page_size))
    }

    pub fn create_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::create(Box::new(MmapPagedFile::create(
            path.as_ref(),
            DEFAULT_PAGE_SIZE,
        )?))
    }

    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Box::new(MmapPagedFile::open(
            path.as_ref(),
            DEFAULT_PAGE_SIZE,
        )?))
    }

    /// A throwaway container backed by memory.
    pub fn in_memory() -> Result<Self> {
        Self::create(Box::new(MemPagedFile::new(DEFAULT_PAGE_SIZE)))
    }

    fn from_parts(file: Box<dyn PagedFile>, header: FileHeader, page_size: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                file,
                page_size,
                header,
                cache: PageCache::new(),
                slots: std::array::from_fn(|_| Slot::default()),
                dirty_trunks: HashMap::new(),
                disposed: false,
            }),
            condvars: std::array::from_fn(|_| Condvar::new()),
        });
        let sweeper = spawn_sweeper(&shared);
        Self {
            shared,
            page_size,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Total pages in the file, header included.
    pub fn page_count(&self) -> u32 {
        self.shared.state.lock().header.total_pages()
    }

    /// Pages available for allocation: trunk entries plus the trunk pages
    /// themselves, which become allocations once exhausted.
    pub fn free_page_count(&self) -> Result<usize> {
        let mut state = self.shared.state.lock();
        let state = &mut *state;
        let mut count = 0;
        let mut head = state.header.free_list_page();
        while head != 0 {
            let trunk = match state.dirty_trunks.get(&head) {
                Some(trunk) => trunk.clone(),
                None => {
                    let bytes = state.page_bytes(head)?;
                    FreeListPage::from_page(head, &bytes, state.page_size)?
                }
            };
            count += trunk.entries().len() + 1;
            head = trunk.next();
        }
        Ok(count)
    }

    /// Handle to one of the sixteen trees.
    pub fn tree(&self, slot: usize) -> Result<Tree<'_>> {
        ensure!(slot < TREE_COUNT, "tree index {} out of range", slot);
        Ok(Tree::new(self, slot))
    }

    /// Marks the container disposed, wakes every blocked lock waiter and
    /// joins the sweeper thread. Idempotent.
    pub fn dispose(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
        }
        for cv in &self.shared.condvars {
            cv.notify_all();
        }
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
    }

    /// Acquires a shared read lock on a tree, blocking while a writer holds
    /// it. Fails with "lock conflict" if this thread is the writer.
    pub fn read_tree(&self, tree: usize) -> Result<()> {
        ensure!(tree < TREE_COUNT, "tree index {} out of range", tree);
        let me = thread::current().id();
        let mut state = self.shared.state.lock();
        loop {
            ensure!(!state.disposed, "container disposed");
            let lock = &mut state.slots[tree].lock;
            if lock.writer() == Some(me) {
                bail!("lock conflict: thread already writes tree {}", tree);
            }
            if lock.can_read() {
                lock.add_reader(me);
                return Ok(());
            }
            self.shared.condvars[tree].wait(&mut state);
        }
    }

    pub fn unlock_read(&self, tree: usize) -> Result<()> {
        ensure!(tree < TREE_COUNT, "tree index {} out of range", tree);
        let me = thread::current().id();
        {
            let mut state = self.shared.state.lock();
            state.slots[tree].lock.remove_reader(me)?;
        }
        self.shared.condvars[tree].notify_all();
        Ok(())
    }

    /// Acquires the exclusive write lock on a tree and opens a transaction,
    /// blocking while other threads hold the slot. Fails with "lock
    /// conflict" if this thread already holds any lock on the slot.
    pub fn write_tree(&self, tree: usize) -> Result<()> {
        ensure!(tree < TREE_COUNT, "tree index {} out of range", tree);
        let me = thread::current().id();
        let mut state = self.shared.state.lock();
        loop {
            ensure!(!state.disposed, "container disposed");
            let slot = &mut state.slots[tree];
            if slot.lock.writer() == Some(me) || slot.lock.holds_read(me) {
                bail!("lock conflict: thread already locks tree {}", tree);
            }
            if slot.lock.can_write() {
                slot.lock.set_writer(me);
                slot.txn = Some(WriteTxn::new());
                return Ok(());
            }
            self.shared.condvars[tree].wait(&mut state);
        }
    }

    /// Writes the transaction's pages, touched trunks and the header to the
    /// file, syncs, and releases the write lock. The lock is released even
    /// when a write fails, so the slot stays usable; the transaction is
    /// consumed either way.
    pub fn commit_write(&self, tree: usize) -> Result<()> {
        ensure!(tree < TREE_COUNT, "tree index {} out of range", tree);
        let me = thread::current().id();
        let result = {
            let mut state = self.shared.state.lock();
            let state = &mut *state;
            ensure!(
                state.slots[tree].lock.writer() == Some(me),
                "no write transaction on tree {}",
                tree
            );
            let txn = state.slots[tree]
                .txn
                .take()
                .ok_or_else(|| eyre!("no write transaction on tree {}", tree))?;
            let result = state.apply_commit(tree, txn);
            state.slots[tree].lock.clear_writer(me)?;
            result
        };
        self.shared.condvars[tree].notify_all();
        result
    }

    /// Discards the transaction, returns its allocations to the free list
    /// and releases the write lock. The committed state is untouched.
    pub fn rollback_write(&self, tree: usize) -> Result<()> {
        ensure!(tree < TREE_COUNT, "tree index {} out of range", tree);
        let me = thread::current().id();
        {
            let mut state = self.shared.state.lock();
            let state = &mut *state;
            ensure!(
                state.slots[tree].lock.writer() == Some(me),
                "no write transaction on tree {}",
                tree
            );
            let txn = state.slots[tree]
                .txn
                .take()
                .ok_or_else(|| eyre!("no write transaction on tree {}", tree))?;
            for page_no in txn.allocated {
                state.cache.remove(page_no);
                state.release_page(page_no)?;
            }
            state.slots[tree].lock.clear_writer(me)?;
        }
        self.shared.condvars[tree].notify_all();
        Ok(())
    }

    /// The tree's current root page, including an uncommitted change by
    /// this slot's transaction. 0 means the tree is empty.
    pub(crate) fn tree_root(&self, tree: usize) -> Result<u32> {
        let state = self.shared.state.lock();
        if let Some(txn) = &state.slots[tree].txn {
            if let Some(root) = txn.root {
                return Ok(root);
            }
        }
        state.header.tree_root(tree)
    }

    pub(crate) fn set_tree_root(&self, tree: usize, root: u32) -> Result<()> {
        let mut state = self.shared.state.lock();
        let txn = txn_mut(&mut state, tree)?;
        txn.root = Some(root);
        Ok(())
    }

    /// Fetches a node page, preferring this slot's transaction buffer, then
    /// the cache, then the file.
    pub(crate) fn get_node(&self, tree: usize, page_no: u32) -> Result<Node> {
        ensure!(page_no != HEADER_PAGE, "page 0 is not a node");
        let mut state = self.shared.state.lock();
        let state = &mut *state;
        if let Some(txn) = &state.slots[tree].txn {
            ensure!(
                !txn.freed.contains(&page_no),
                "page {} was deleted in this transaction",
                page_no
            );
            match txn.pages.get(&page_no) {
                Some(PageObj::Leaf(n)) => return Ok(Node::Leaf(n.clone())),
                Some(PageObj::Interior(n)) => return Ok(Node::Interior(n.clone())),
                Some(PageObj::Overflow(_)) => bail!("page {} is not a node", page_no),
                None => {}
            }
        }
        let bytes = state.page_bytes(page_no)?;
        Node::from_page(page_no, &bytes, state.page_size)
    }

    pub(crate) fn get_overflow(&self, tree: usize, page_no: u32) -> Result<OverflowPage> {
        ensure!(page_no != HEADER_PAGE, "page 0 is not an overflow page");
        let mut state = self.shared.state.lock();
        let state = &mut *state;
        if let Some(txn) = &state.slots[tree].txn {
            ensure!(
                !txn.freed.contains(&page_no),
                "page {} was deleted in this transaction",
                page_no
            );
            match txn.pages.get(&page_no) {
                Some(PageObj::Overflow(p)) => return Ok(p.clone()),
                Some(_) => bail!("page {} is not an overflow page", page_no),
                None => {}
            }
        }
        let bytes = state.page_bytes(page_no)?;
        OverflowPage::from_page(page_no, &bytes, state.page_size)
    }

    pub(crate) fn put_node(&self, tree: usize, node: Node) -> Result<()> {
        let mut state = self.shared.state.lock();
        let txn = txn_mut(&mut state, tree)?;
        txn.pages.insert(node.page_no(), node.into());
        Ok(())
    }

    pub(crate) fn put_overflow(&self, tree: usize, page: OverflowPage) -> Result<()> {
        let mut state = self.shared.state.lock();
        let txn = txn_mut(&mut state, tree)?;
        txn.pages.insert(page.page_no(), PageObj::Overflow(page));
        Ok(())
    }

    pub fn create_leaf(&self, tree: usize) -> Result<LeafNode> {
        let mut state = self.shared.state.lock();
        let state = &mut *state;
        ensure_writing(state, tree)?;
        let page_no = state.allocate_page()?;
        let node = LeafNode::new(page_no, state.page_size);
        let txn = txn_mut_raw(state, tree)?;
        txn.allocated.push(page_no);
        txn.freed.remove(&page_no);
        txn.pages.insert(page_no, PageObj::Leaf(node.clone()));
        Ok(node)
    }

    pub(crate) fn create_interior(&self, tree: usize, leftmost_child: u32) -> Result<InteriorNode> {
        let mut state = self.shared.state.lock();
        let state = &mut *state;
        ensure_writing(state, tree)?;
        let page_no = state.allocate_page()?;
        let node = InteriorNode::new(page_no, state.page_size, leftmost_child);
        let txn = txn_mut_raw(state, tree)?;
        txn.allocated.push(page_no);
        txn.freed.remove(&page_no);
        txn.pages.insert(page_no, PageObj::Interior(node.clone()));
        Ok(node)
    }

    pub(crate) fn create_overflow(&self, tree: usize) -> Result<OverflowPage> {
        let mut state = self.shared.state.lock();
        let state = &mut *state;
        ensure_writing(state, tree)?;
        let page_no = state.allocate_page()?;
        let page = OverflowPage::new(page_no, state.page_size);
        let txn = txn_mut_raw(state, tree)?;
        txn.allocated.push(page_no);
        txn.freed.remove(&page_no);
        txn.pages.insert(page_no, PageObj::Overflow(page.clone()));
        Ok(page)
    }

    /// Deletes a page within the transaction. The page is released to the
    /// free list when the transaction commits.
    pub(crate) fn delete_page(&self, tree: usize, page_no: u32) -> Result<()> {
        ensure!(page_no != HEADER_PAGE, "page 0 cannot be deleted");
        let mut state = self.shared.state.lock();
        let state = &mut *state;
        let txn = txn_mut(state, tree)?;
        txn.pages.remove(&page_no);
        txn.freed.insert(page_no);
        state.cache.remove(page_no);
        Ok(())
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn ensure_writing(state: &State, tree: usize) -> Result<()> {
    ensure!(
        state.slots[tree].lock.writer() == Some(thread::current().id()),
        "no write transaction on tree {}",
        tree
    );
    Ok(())
}

fn txn_mut<'a>(state: &'a mut State, tree: usize) -> Result<&'a mut WriteTxn> {
    ensure_writing(state, tree)?;
    txn_mut_raw(state, tree)
}

fn txn_mut_raw<'a>(state: &'a mut State, tree: usize) -> Result<&'a mut WriteTxn> {
    state.slots[tree]
        .txn
        .as_mut()
        .ok_or_else(|| eyre!("no write transaction on tree {}", tree))
}

impl State {
    /// Applies one transaction: page buffer, the committing tree's root,
    /// freed releases, touched trunks, then the header, then a sync.
    fn apply_commit(&mut self, tree: usize, txn: WriteTxn) -> Result<()> {
        let mut buf = vec![0u8; self.page_size];
        for (&page_no, obj) in &txn.pages {
            if txn.freed.contains(&page_no) {
                continue;
            }
            obj.save(&mut buf)?;
            self.file.write_page(page_no, &buf)?;
            self.cache.insert(page_no, buf.clone().into_boxed_slice());
        }
        if let Some(root) = txn.root {
            self.header.set_tree_root(tree, root)?;
        }
        for page_no in txn.freed {
            self.cache.remove(page_no);
            self.release_page(page_no)?;
        }
        let trunks: Vec<FreeListPage> =
            self.dirty_trunks.drain().map(|(_, trunk)| trunk).collect();
        for trunk in trunks {
            trunk.save(&mut buf)?;
            self.file.write_page(trunk.page_no(), &buf)?;
            self.cache.remove(trunk.page_no());
        }
        let free_head = self.persist_pending_allocations(&mut buf)?;
        let mut header = self.header;
        header.set_free_list_page(free_head);
        header.save(&mut buf)?;
        self.file.write_page(HEADER_PAGE, &buf)?;
        self.file.sync()?;
        Ok(())
    }

    /// Pages allocated by still-open transactions on other slots are
    /// reachable from no root and sit in no trunk. The persisted header
    /// chains them in front of the real free list as throwaway trunks,
    /// stored in the pending pages themselves, so a crash before those
    /// transactions commit leaves every page accounted for. Returns the
    /// free-list head to record on disk; the in-memory head is untouched.
    fn persist_pending_allocations(&mut self, buf: &mut [u8]) -> Result<u32> {
        let mut pending: Vec<u32> = Vec::new();
        for slot in &self.slots {
            if let Some(txn) = &slot.txn {
                pending.extend_from_slice(&txn.allocated);
            }
        }
        let capacity = crate::config::trunk_capacity(self.page_size);
        let mut head = self.header.free_list_page();
        let mut idx = 0;
        while idx < pending.len() {
            let trunk_no = pending[idx];
            idx += 1;
            let mut trunk = FreeListPage::new(trunk_no, self.page_size);
            trunk.set_next(head);
            let take = capacity.min(pending.len() - idx);
            for _ in 0..take {
                trunk.add(pending[idx])?;
                idx += 1;
            }
            trunk.save(buf)?;
            self.file.write_page(trunk_no, buf)?;
            head = trunk_no;
        }
        Ok(head)
    }

    /// Page bytes from the cache or the file; file reads populate the
    /// cache.
    fn page_bytes(&mut self, page_no: u32) -> Result<Box<[u8]>> {
        if let Some(bytes) = self.cache.get(page_no) {
            return Ok(bytes.into());
        }
        let mut buf = vec![0u8; self.page_size];
        self.file.read_page(page_no, &mut buf)?;
        let bytes = buf.into_boxed_slice();
        self.cache.insert(page_no, bytes.clone());
        Ok(bytes)
    }

    fn ensure_trunk_loaded(&mut self, page_no: u32) -> Result<()> {
        if self.dirty_trunks.contains_key(&page_no) {
            return Ok(());
        }
        let bytes = self.page_bytes(page_no)?;
        let trunk = FreeListPage::from_page(page_no, &bytes, self.page_size)?;
        self.dirty_trunks.insert(page_no, trunk);
        Ok(())
    }

    /// Takes a page from the free list, growing the file when it is empty.
    /// An exhausted trunk page is itself returned as the allocation.
    fn allocate_page(&mut self) -> Result<u32> {
        loop {
            let head = self.header.free_list_page();
            if head == 0 {
                self.grow()?;
                continue;
            }
            self.ensure_trunk_loaded(head)?;
            let trunk = self
                .dirty_trunks
                .get_mut(&head)
                .ok_or_else(|| eyre!("missing trunk page {}", head))?;
            if let Some(page) = trunk.alloc() {
                return Ok(page);
            }
            let next = trunk.next();
            self.dirty_trunks.remove(&head);
            self.cache.remove(head);
            self.header.set_free_list_page(next);
            return Ok(head);
        }
    }

    /// Returns a page to the free list. When the head trunk is full (or
    /// there is none) the released page itself becomes a new head trunk.
    fn release_page(&mut self, page_no: u32) -> Result<()> {
        let head = self.header.free_list_page();
        if head != 0 {
            self.ensure_trunk_loaded(head)?;
            let trunk = self
                .dirty_trunks
                .get_mut(&head)
                .ok_or_else(|| eyre!("missing trunk page {}", head))?;
            if !trunk.is_full() {
                return trunk.add(page_no);
            }
        }
        let mut trunk = FreeListPage::new(page_no, self.page_size);
        trunk.set_next(head);
        self.header.set_free_list_page(page_no);
        self.dirty_trunks.insert(page_no, trunk);
        Ok(())
    }

    /// Grows the file by the size-dependent step and repackages all free
    /// pages, old and new, into freshly built trunks.
    fn grow(&mut self) -> Result<()> {
        let old = self.header.total_pages();
        let step = growth_step(old);
        let new_total = old
            .checked_add(step)
            .ok_or_else(|| eyre!("file cannot grow past {} pages", u32::MAX))?;
        self.file.set_page_count(new_total)?;

        let mut free: Vec<u32> = (old..new_total).collect();
        let mut head = self.header.free_list_page();
        while head != 0 {
            let trunk = match self.dirty_trunks.remove(&head) {
                Some(trunk) => trunk,
                None => {
                    let bytes = self.page_bytes(head)?;
                    FreeListPage::from_page(head, &bytes, self.page_size)?
                }
            };
            free.extend_from_slice(trunk.entries());
            free.push(head);
            self.cache.remove(head);
            head = trunk.next();
        }
        self.dirty_trunks.clear();
        free.sort_unstable();

        let capacity = crate::config::trunk_capacity(self.page_size);
        let mut new_head = 0u32;
        let mut idx = 0;
        while idx < free.len() {
            let trunk_no = free[idx];
            idx += 1;
            let mut trunk = FreeListPage::new(trunk_no, self.page_size);
            trunk.set_next(new_head);
            let take = capacity.min(free.len() - idx);
            for _ in 0..take {
                trunk.add(free[idx])?;
                idx += 1;
            }
            new_head = trunk_no;
            self.dirty_trunks.insert(trunk_no, trunk);
        }
        self.header.set_free_list_page(new_head);
        self.header.set_total_pages(new_total);
        Ok(())
    }
}

fn spawn_sweeper(shared: &Arc<Shared>) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    thread::spawn(move || loop {
        thread::sleep(Duration::from_millis(CACHE_SWEEP_INTERVAL_MS));
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let mut state = shared.state.lock();
        if state.disposed {
            return;
        }
        state.cache.tick();
    })
}
