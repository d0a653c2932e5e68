//! The header page. Page 0 starts with a fixed 96-byte structure holding
//! the file magic, the head of the free-page list, the total page count and
//! the root page of each tree. The remainder of the page is zero.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------
//! 0       4     magic "IXTL"
//! 4       4     first free-list trunk page (LE, 0 = none)
//! 8       4     total pages in the file (LE)
//! 12      20    reserved
//! 32      64    root page of trees 0..15 (LE each, 0 = empty tree)
//! ```

use eyre::{ensure, eyre, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{FILE_MAGIC, TREE_COUNT};

pub const FILE_HEADER_SIZE: usize = 96;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    magic: [u8; 4],
    free_list_page: U32,
    total_pages: U32,
    reserved: [u8; 20],
    tree_roots: [U32; TREE_COUNT],
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    pub fn new(total_pages: u32) -> Self {
        Self {
            magic: *FILE_MAGIC,
            free_list_page: U32::ZERO,
            total_pages: U32::new(total_pages),
            reserved: [0; 20],
            tree_roots: [U32::ZERO; TREE_COUNT],
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() >= FILE_HEADER_SIZE,
            "buffer too small for file header: {} < {}",
            data.len(),
            FILE_HEADER_SIZE
        );
        let header = Self::read_from_bytes(&data[..FILE_HEADER_SIZE])
            .map_err(|e| eyre!("failed to read file header: {:?}", e))?;
        ensure!(
            header.magic == *FILE_MAGIC,
            "invalid magic bytes: {:02x?}",
            header.magic
        );
        Ok(header)
    }

    /// Serializes into the start of a page buffer, zeroing the rest.
    pub fn save(&self, out: &mut [u8]) -> Result<()> {
        ensure!(
            out.len() >= FILE_HEADER_SIZE,
            "buffer too small for file header: {} < {}",
            out.len(),
            FILE_HEADER_SIZE
        );
        out[..FILE_HEADER_SIZE].copy_from_slice(self.as_bytes());
        out[FILE_HEADER_SIZE..].fill(0);
        Ok(())
    }

    pub fn free_list_page(&self) -> u32 {
        self.free_list_page.get()
    }

    pub fn set_free_list_page(&mut self, page_no: u32) {
        self.free_list_page = U32::new(page_no);
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages.get()
    }

    pub fn set_total_pages(&mut self, pages: u32) {
        self.total_pages = U32::new(pages);
    }

    pub fn tree_root(&self, tree: usize) -> Result<u32> {
        ensure!(tree < TREE_COUNT, "tree index {} out of range", tree);
        Ok(self.tree_roots[tree].get())
    }

    pub fn set_tree_root(&mut self, tree: usize, page_no: u32) -> Result<()> {
        ensure!(tree < TREE_COUNT, "tree index {} out of range", tree);
        self.tree_roots[tree] = U32::new(page_no);
        Ok(())
    }
}
