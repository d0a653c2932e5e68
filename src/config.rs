//! # Layout Constants
//!
//! This module centralizes the on-disk layout constants and the thresholds
//! derived from the page size. Constants that depend on each other are
//! co-located so a change to one is checked against the others.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> small threshold   (page_size / 4)
//!       │     Nodes below this size are candidates for merge/redistribute.
//!       │
//!       ├─> full threshold    (page_size - FULL_MARGIN)
//!       │     The 128-byte margin leaves room for one more cell before a
//!       │     split becomes mandatory.
//!       │
//!       ├─> min cell size     (page_size / 256)
//!       │     Leaf cells are zero-padded up to this size.
//!       │
//!       ├─> overflow capacity (page_size - OVERFLOW_HEADER_SIZE)
//!       │     Data bytes one overflow page can carry.
//!       │
//!       └─> trunk capacity    (page_size / 4 - 2)
//!             Free page numbers one free-list trunk page can hold.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `FULL_MARGIN` must be large enough for one maximal leaf cell
//!    (`CELL_FIXED_SIZE + MAX_INLINE_PAYLOAD = 128`), so a non-full node can
//!    always absorb one more insert.
//! 2. `MAX_KEY_LEN == MAX_INLINE_PAYLOAD`: a key alone may consume the whole
//!    inline budget, leaving the value fully in overflow pages.

/// Size of each page in bytes. The page size is fixed per file; this is the
/// value used when creating new files.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Number of independent trees addressed by one container.
pub const TREE_COUNT: usize = 16;

/// Magic marker at the start of the header page.
pub const FILE_MAGIC: &[u8; 4] = b"IXTL";

/// Size of the node page header (type, cell count, link pointer, reserved).
pub const NODE_HEADER_SIZE: usize = 16;

/// Size of the overflow page header (next pointer, data length, flags).
pub const OVERFLOW_HEADER_SIZE: usize = 8;

/// Size of the free-list trunk page header (next pointer, entry count).
pub const TRUNK_HEADER_SIZE: usize = 8;

/// Fixed prefix of a serialized cell before key/value bytes.
pub const CELL_FIXED_SIZE: usize = 8;

/// Minimum serialized size of an interior cell (keys shorter than 8 bytes
/// are zero-padded).
pub const MIN_INTERIOR_CELL_SIZE: usize = 16;

/// Combined budget for key plus inline value bytes in a leaf cell. Value
/// bytes beyond `MAX_INLINE_PAYLOAD - key_len` go to overflow pages.
pub const MAX_INLINE_PAYLOAD: usize = 120;

/// Maximum encodable key length.
pub const MAX_KEY_LEN: usize = 120;

/// Safety margin below the page size marking a node as full. A node above
/// the full threshold must split before the next insert.
pub const FULL_MARGIN: usize = 128;

/// Time-to-live assigned to a cache entry on insert and on every access.
pub const CACHE_TTL: u8 = 16;

/// Interval between cache sweeps performed by the container's sweeper thread.
pub const CACHE_SWEEP_INTERVAL_MS: u64 = 250;

/// Largest number of pages added in a single file growth step.
pub const MAX_GROWTH_STEP: u32 = 8192;

const _: () = assert!(
    CELL_FIXED_SIZE + MAX_INLINE_PAYLOAD == FULL_MARGIN,
    "FULL_MARGIN must cover one maximal leaf cell"
);

const _: () = assert!(
    MAX_KEY_LEN == MAX_INLINE_PAYLOAD,
    "a key may consume the whole inline budget"
);

/// Nodes below this size are merge/redistribute candidates.
pub fn small_threshold(page_size: usize) -> usize {
    page_size / 4
}

/// Nodes above this size must split before accepting another cell.
pub fn full_threshold(page_size: usize) -> usize {
    page_size - FULL_MARGIN
}

/// Serialized leaf cells are zero-padded up to this size.
pub fn min_cell_size(page_size: usize) -> usize {
    page_size / 256
}

/// Data bytes one overflow page can carry.
pub fn overflow_capacity(page_size: usize) -> usize {
    page_size - OVERFLOW_HEADER_SIZE
}

/// Free page numbers one trunk page can hold.
pub fn trunk_capacity(page_size: usize) -> usize {
    page_size / 4 - 2
}

/// Number of pages the file grows by, stepped up with file size and capped
/// at `MAX_GROWTH_STEP`.
pub fn growth_step(total_pages: u32) -> u32 {
    match total_pages {
        0..=64 => 8,
        65..=512 => 64,
        513..=4096 => 512,
        4097..=32768 => 4096,
        _ => MAX_GROWTH_STEP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_for_default_page_size() {
        assert_eq!(small_threshold(DEFAULT_PAGE_SIZE), 1024);
        assert_eq!(full_threshold(DEFAULT_PAGE_SIZE), 3968);
        assert_eq!(min_cell_size(DEFAULT_PAGE_SIZE), 16);
        assert_eq!(overflow_capacity(DEFAULT_PAGE_SIZE), 4088);
        assert_eq!(trunk_capacity(DEFAULT_PAGE_SIZE), 1022);
    }

    #[test]
    fn growth_step_is_monotonic_and_capped() {
        assert_eq!(growth_step(1), 8);
        assert_eq!(growth_step(64), 8);
        assert_eq!(growth_step(65), 64);
        assert_eq!(growth_step(513), 512);
        assert_eq!(growth_step(40_000), MAX_GROWTH_STEP);
    }
}
