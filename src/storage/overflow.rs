//! Overflow chain pages. Value bytes that do not fit inline in a leaf cell
//! are stored across a singly linked chain of overflow pages, each carrying
//! up to `page_size - 8` data bytes.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------
//! 0       4     next overflow page (LE, 0 = end of chain)
//! 4       2     data length (LE)
//! 6       1     has_more flag (1 = continuation follows)
//! 7       1     reserved
//! 8       n     data bytes
//! ```

use eyre::{ensure, eyre, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{overflow_capacity, OVERFLOW_HEADER_SIZE};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct OverflowHeader {
    next: U32,
    data_len: U16,
    has_more: u8,
    reserved: u8,
}

const _: () = assert!(std::mem::size_of::<OverflowHeader>() == OVERFLOW_HEADER_SIZE);

#[derive(Debug, Clone)]
pub struct OverflowPage {
    page_no: u32,
    page_size: usize,
    next: u32,
    has_more: bool,
    data: Vec<u8>,
}

impl OverflowPage {
    pub fn new(page_no: u32, page_size: usize) -> Self {
        Self {
            page_no,
            page_size,
            next: 0,
            has_more: false,
            data: Vec::new(),
        }
    }

    pub fn from_page(page_no: u32, data: &[u8], page_size: usize) -> Result<Self> {
        ensure!(
            data.len() == page_size,
            "invalid page size: {} != {}",
            data.len(),
            page_size
        );
        let header = OverflowHeader::ref_from_bytes(&data[..OVERFLOW_HEADER_SIZE])
            .map_err(|e| eyre!("failed to read overflow header: {:?}", e))?;
        let data_len = header.data_len.get() as usize;
        ensure!(
            data_len <= overflow_capacity(page_size),
            "corrupt overflow page {}: data length {} exceeds capacity",
            page_no,
            data_len
        );

        Ok(Self {
            page_no,
            page_size,
            next: header.next.get(),
            has_more: header.has_more != 0,
            data: data[OVERFLOW_HEADER_SIZE..OVERFLOW_HEADER_SIZE + data_len].to_vec(),
        })
    }

    pub fn save(&self, out: &mut [u8]) -> Result<()> {
        ensure!(
            out.len() == self.page_size,
            "invalid page size: {} != {}",
            out.len(),
            self.page_size
        );
        let header = OverflowHeader {
            next: U32::new(self.next),
            data_len: U16::new(self.data.len() as u16),
            has_more: self.has_more as u8,
            reserved: 0,
        };
        out[..OVERFLOW_HEADER_SIZE].copy_from_slice(header.as_bytes());
        out[OVERFLOW_HEADER_SIZE..OVERFLOW_HEADER_SIZE + self.data.len()]
            .copy_from_slice(&self.data);
        out[OVERFLOW_HEADER_SIZE + self.data.len()..].fill(0);
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

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Fills this page from `src` starting at `offset`. Sets `has_more`
    /// when bytes remain past this page. Returns the number of bytes taken.
    pub fn write_data(&mut self, src: &[u8], offset: usize) -> usize {
        let take = (src.len() - offset).min(overflow_capacity(self.page_size));
        self.data.clear();
        self.data.extend_from_slice(&src[offset..offset + take]);
        self.has_more = offset + take < src.len();
        take
    }

    /// Appends this page's data bytes to `out`.
    pub fn read_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.data);
    }
}
