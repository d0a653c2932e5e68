//! Free-list trunk pages. Released pages are recorded, not returned to the
//! filesystem: trunk pages form a singly linked list from the header, each
//! holding up to `page_size / 4 - 2` free page numbers. Allocation pops
//! from the head trunk; when a trunk runs out of entries the trunk page
//! itself becomes the next allocation.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------
//! 0       4     next trunk page (LE, 0 = last trunk)
//! 4       4     entry count (LE)
//! 8       4*n   free page numbers (LE each)
//! ```

use eyre::{ensure, eyre, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{trunk_capacity, TRUNK_HEADER_SIZE};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct TrunkHeader {
    next: U32,
    count: U32,
}

const _: () = assert!(std::mem::size_of::<TrunkHeader>() == TRUNK_HEADER_SIZE);

#[derive(Debug, Clone)]
pub struct FreeListPage {
    page_no: u32,
    page_size: usize,
    next: u32,
    entries: Vec<u32>,
}

impl FreeListPage {
    pub fn new(page_no: u32, page_size: usize) -> Self {
        Self {
            page_no,
            page_size,
            next: 0,
            entries: Vec::new(),
        }
    }

    pub fn from_page(page_no: u32, data: &[u8], page_size: usize) -> Result<Self> {
        ensure!(
            data.len() == page_size,
            "invalid page size: {} != {}",
            data.len(),
            page_size
        );
        let header = TrunkHeader::ref_from_bytes(&data[..TRUNK_HEADER_SIZE])
            .map_err(|e| eyre!("failed to read trunk header: {:?}", e))?;
        let count = header.count.get() as usize;
        ensure!(
            count <= trunk_capacity(page_size),
            "corrupt trunk page {}: {} entries exceed capacity",
            page_no,
            count
        );

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let off = TRUNK_HEADER_SIZE + i * 4;
            entries.push(u32::from_le_bytes([
                data[off],
                data[off + 1],
                data[off + 2],
                data[off + 3],
            ]));
        }

        Ok(Self {
            page_no,
            page_size,
            next: header.next.get(),
            entries,
        })
    }

    pub fn save(&self, out: &mut [u8]) -> Result<()> {
        ensure!(
            out.len() == self.page_size,
            "invalid page size: {} != {}",
            out.len(),
            self.page_size
        );
        let header = TrunkHeader {
            next: U32::new(self.next),
            count: U32::new(self.entries.len() as u32),
        };
        out[..TRUNK_HEADER_SIZE].copy_from_slice(header.as_bytes());
        let mut off = TRUNK_HEADER_SIZE;
        for entry in &self.entries {
            out[off..off + 4].copy_from_slice(&entry.to_le_bytes());
            off += 4;
        }
        out[off..].fill(0);
        Ok(())
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn next(&self) -> u32 {
        self.next
    }

    pub fn set_next(&mut self, page_no: u32) {
        self.next = page_no;
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= trunk_capacity(self.page_size)
    }

    /// True when this is the last trunk in the chain.
    pub fn is_last(&self) -> bool {
        self.next == 0
    }

    /// Pops the most recently added free page.
    pub fn alloc(&mut self) -> Option<u32> {
        self.entries.pop()
    }

    pub fn add(&mut self, page_no: u32) -> Result<()> {
        ensure!(
            !self.is_full(),
            "trunk page {} is full ({} entries)",
            self.page_no,
            self.entries.len()
        );
        self.entries.push(page_no);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PAGE_SIZE;

    #[test]
    fn alloc_pops_in_reverse_add_order() {
        let mut trunk = FreeListPage::new(3, DEFAULT_PAGE_SIZE);
        trunk.add(10).unwrap();
        trunk.add(11).unwrap();

        assert_eq!(trunk.alloc(), Some(11));
        assert_eq!(trunk.alloc(), Some(10));
        assert_eq!(trunk.alloc(), None);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut trunk = FreeListPage::new(3, DEFAULT_PAGE_SIZE);
        for i in 0..1022 {
            trunk.add(100 + i).unwrap();
        }
        assert!(trunk.is_full());
        assert!(trunk.add(9999).is_err());
    }

    #[test]
    fn roundtrip_preserves_entries_and_link() {
        let mut trunk = FreeListPage::new(3, DEFAULT_PAGE_SIZE);
        trunk.set_next(8);
        for i in [44, 45, 46] {
            trunk.add(i).unwrap();
        }

        let mut page = vec![0xCCu8; DEFAULT_PAGE_SIZE];
        trunk.save(&mut page).unwrap();
        let loaded = FreeListPage::from_page(3, &page, DEFAULT_PAGE_SIZE).unwrap();

        assert_eq!(loaded.next(), 8);
        assert_eq!(loaded.entries(), &[44, 45, 46]);
    }

    #[test]
    fn oversized_count_is_rejected() {
        let mut page = vec![0u8; DEFAULT_PAGE_SIZE];
        page[4..8].copy_from_slice(&2000u32.to_le_bytes());

        let err = FreeListPage::from_page(3, &page, DEFAULT_PAGE_SIZE).unwrap_err();
        assert!(err.to_string().contains("exceed capacity"));
    }
}
