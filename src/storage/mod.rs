//! # Storage Layer
//!
//! Everything below the tree algorithms: the paged file abstraction and its
//! mmap-backed implementation, the header page, free-list trunk pages,
//! overflow chain pages, and the TTL page cache.
//!
//! ## File Layout
//!
//! ```text
//! Page 0        header page (magic, free list head, page count, tree roots)
//! Page 1..N     node, overflow and free-list trunk pages, interleaved
//! ```
//!
//! Pages are identified by their zero-based index. Page number 0 doubles as
//! the null pointer in every on-disk link field, which is unambiguous
//! because the header page can never be a link target.

mod cache;
mod freelist;
mod header;
mod overflow;
mod pagefile;

pub use cache::PageCache;
pub use freelist::FreeListPage;
pub use header::FileHeader;
pub use overflow::OverflowPage;
pub use pagefile::{MemPagedFile, MmapPagedFile, PagedFile};

/// Page number of the header page.
pub const HEADER_PAGE: u32 = 0;
