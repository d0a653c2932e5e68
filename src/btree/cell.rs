//! # Cell Encoding
//!
//! Cells are the unit stored inside node pages. A leaf cell carries a key,
//! an inline prefix of its value, and a pointer to the overflow chain
//! holding the remainder; an interior cell carries a routing key and a child
//! page number. Cells are self-sizing: decoding reads the lengths from the
//! fixed prefix and derives the padded size, so encode and decode are
//! bit-exact inverses.
//!
//! ## Leaf Cell Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------
//! 0       1     key_len
//! 1       1     inline_len        (<= 120 - key_len)
//! 2       2     overflow_pages    (chain length in pages, LE)
//! 4       4     first_overflow    (page number, LE, 0 = none)
//! 8       k     key bytes
//! 8+k     v     inline value bytes
//! ```
//!
//! zero-padded to `max(page_size/256, 8 + k + v)`.
//!
//! ## Interior Cell Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------
//! 0       1     key_len
//! 1       3     reserved
//! 4       4     child page number (LE)
//! 8       k     key bytes
//! ```
//!
//! zero-padded to `max(16, 8 + k)`.
//!
//! ## Inline / Overflow Split
//!
//! The key and inline value share a 120-byte budget. A value longer than
//! `120 - key_len` keeps only that prefix inline; the constructor records
//! how many overflow pages the remainder needs but does not allocate them;
//! the caller creates the chain and sets the first-page pointer afterwards.

use eyre::{ensure, eyre, Result};

use crate::btree::Key;
use crate::config::{
    min_cell_size, overflow_capacity, CELL_FIXED_SIZE, MAX_INLINE_PAYLOAD, MAX_KEY_LEN,
    MIN_INTERIOR_CELL_SIZE,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCell {
    key: Key,
    inline: Vec<u8>,
    overflow_pages: u16,
    first_overflow: u32,
}

impl LeafCell {
    /// Builds a cell for `key`/`value`, splitting the value into its inline
    /// prefix and a recorded (but unallocated) overflow page count.
    pub fn new(key: Key, value: &[u8], page_size: usize) -> Result<Self> {
        check_storable(&key)?;
        let mut cell = Self {
            key,
            inline: Vec::new(),
            overflow_pages: 0,
            first_overflow: 0,
        };
        cell.change_value(value, page_size)?;
        Ok(cell)
    }

    /// Recomputes the inline/overflow split for a new value in place.
    /// Returns true if the stored form changed, so the owning node can mark
    /// itself dirty. The first-overflow pointer is reset; the caller owns
    /// rebuilding the chain.
    pub fn change_value(&mut self, value: &[u8], page_size: usize) -> Result<bool> {
        let key_len = self.key_len();
        let capacity = MAX_INLINE_PAYLOAD - key_len;
        let inline_len = value.len().min(capacity);
        let rest = value.len() - inline_len;
        let pages = rest.div_ceil(overflow_capacity(page_size));
        ensure!(
            pages <= u16::MAX as usize,
            "value too long: {} overflow pages exceed the chain limit",
            pages
        );

        let changed = self.inline != value[..inline_len]
            || self.overflow_pages as usize != pages
            || self.first_overflow != 0;
        self.inline.clear();
        self.inline.extend_from_slice(&value[..inline_len]);
        self.overflow_pages = pages as u16;
        self.first_overflow = 0;
        Ok(changed)
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    fn key_len(&self) -> usize {
        self.key.bytes().map(<[u8]>::len).unwrap_or(0)
    }

    pub fn inline(&self) -> &[u8] {
        &self.inline
    }

    pub fn overflow_page_count(&self) -> u16 {
        self.overflow_pages
    }

    pub fn first_overflow_page(&self) -> u32 {
        self.first_overflow
    }

    /// The first-page pointer is mutable independently of the value: the
    /// chain is allocated after the cell is built.
    pub fn set_first_overflow_page(&mut self, page_no: u32) {
        self.first_overflow = page_no;
    }

    pub fn cell_size(&self, page_size: usize) -> usize {
        min_cell_size(page_size).max(CELL_FIXED_SIZE + self.key_len() + self.inline.len())
    }

    /// Encodes into `out`, zero-padding to the cell size. Returns the number
    /// of bytes written.
    pub fn encode(&self, out: &mut [u8], page_size: usize) -> Result<usize> {
        let size = self.cell_size(page_size);
        ensure!(
            out.len() >= size,
            "buffer too small for leaf cell: {} < {}",
            out.len(),
            size
        );
        let key = self.key.bytes().ok_or_else(|| eyre!("key out of range"))?;

        out[0] = key.len() as u8;
        out[1] = self.inline.len() as u8;
        out[2..4].copy_from_slice(&self.overflow_pages.to_le_bytes());
        out[4..8].copy_from_slice(&self.first_overflow.to_le_bytes());
        let mut off = CELL_FIXED_SIZE;
        out[off..off + key.len()].copy_from_slice(key);
        off += key.len();
        out[off..off + self.inline.len()].copy_from_slice(&self.inline);
        off += self.inline.len();
        out[off..size].fill(0);
        Ok(size)
    }

    /// Decodes one cell from the start of `buf`. Returns the cell and the
    /// number of bytes consumed (including padding).
    pub fn decode(buf: &[u8], page_size: usize) -> Result<(Self, usize)> {
        ensure!(
            buf.len() >= CELL_FIXED_SIZE,
            "buffer too small for leaf cell header: {}",
            buf.len()
        );
        let key_len = buf[0] as usize;
        let inline_len = buf[1] as usize;
        ensure!(
            key_len + inline_len <= MAX_INLINE_PAYLOAD,
            "corrupt leaf cell: key {} + inline {} exceeds inline budget",
            key_len,
            inline_len
        );
        let overflow_pages = u16::from_le_bytes([buf[2], buf[3]]);
        let first_overflow = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

        let size = min_cell_size(page_size).max(CELL_FIXED_SIZE + key_len + inline_len);
        ensure!(
            buf.len() >= size,
            "buffer too small for leaf cell body: {} < {}",
            buf.len(),
            size
        );
        let key = Key::from_bytes(&buf[CELL_FIXED_SIZE..CELL_FIXED_SIZE + key_len]);
        let inline =
            buf[CELL_FIXED_SIZE + key_len..CELL_FIXED_SIZE + key_len + inline_len].to_vec();

        Ok((
            Self {
                key,
                inline,
                overflow_pages,
                first_overflow,
            },
            size,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteriorCell {
    key: Key,
    child: u32,
}

impl InteriorCell {
    pub fn new(key: Key, child: u32) -> Result<Self> {
        check_storable(&key)?;
        Ok(Self { key, child })
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn into_key(self) -> Key {
        self.key
    }

    pub fn child(&self) -> u32 {
        self.child
    }

    fn key_len(&self) -> usize {
        self.key.bytes().map(<[u8]>::len).unwrap_or(0)
    }

    pub fn cell_size(&self) -> usize {
        MIN_INTERIOR_CELL_SIZE.max(CELL_FIXED_SIZE + self.key_len())
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize> {
        let size = self.cell_size();
        ensure!(
            out.len() >= size,
            "buffer too small for interior cell: {} < {}",
            out.len(),
            size
        );
        let key = self.key.bytes().ok_or_else(|| eyre!("key out of range"))?;

        out[0] = key.len() as u8;
        out[1..4].fill(0);
        out[4..8].copy_from_slice(&self.child.to_le_bytes());
        out[CELL_FIXED_SIZE..CELL_FIXED_SIZE + key.len()].copy_from_slice(key);
        out[CELL_FIXED_SIZE + key.len()..size].fill(0);
        Ok(size)
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        ensure!(
            buf.len() >= CELL_FIXED_SIZE,
            "buffer too small for interior cell header: {}",
            buf.len()
        );
        let key_len = buf[0] as usize;
        ensure!(
            key_len <= MAX_KEY_LEN,
            "corrupt interior cell: key length {}",
            key_len
        );
        let child = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

        let size = MIN_INTERIOR_CELL_SIZE.max(CELL_FIXED_SIZE + key_len);
        ensure!(
            buf.len() >= size,
            "buffer too small for interior cell body: {} < {}",
            buf.len(),
            size
        );
        let key = Key::from_bytes(&buf[CELL_FIXED_SIZE..CELL_FIXED_SIZE + key_len]);

        Ok((Self { key, child }, size))
    }
}

fn check_storable(key: &Key) -> Result<()> {
    let bytes = key
        .bytes()
        .ok_or_else(|| eyre!("key out of range: the sentinel maximum cannot be stored"))?;
    ensure!(
        bytes.len() <= MAX_KEY_LEN,
        "key too long: {} > {} bytes",
        bytes.len(),
        MAX_KEY_LEN
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PAGE_SIZE;

    #[test]
    fn empty_value_cell_has_minimum_size() {
        let cell = LeafCell::new(Key::from_ascii("Hi").unwrap(), b"", 4096).unwrap();
        assert_eq!(cell.cell_size(4096), 16);
    }

    #[test]
    fn inline_budget_is_shared_with_key() {
        let key = Key::from_bytes(&[7u8; 100]);
        let cell = LeafCell::new(key, &[1u8; 500], DEFAULT_PAGE_SIZE).unwrap();

        assert_eq!(cell.inline().len(), 20);
        assert_eq!(cell.overflow_page_count(), 1);
        assert_eq!(cell.first_overflow_page(), 0);
    }

    #[test]
    fn oversized_key_is_rejected_before_mutation() {
        let key = Key::from_bytes(&[0u8; 121]);
        let err = LeafCell::new(key, b"", DEFAULT_PAGE_SIZE).unwrap_err();
        assert!(err.to_string().contains("key too long"));
    }

    #[test]
    fn sentinel_key_is_rejected() {
        let err = LeafCell::new(Key::max(), b"", DEFAULT_PAGE_SIZE).unwrap_err();
        assert!(err.to_string().contains("key out of range"));
    }

    #[test]
    fn overflow_page_count_matches_capacity() {
        // 4 byte key -> 116 inline bytes; one overflow page holds 4088.
        let cell = LeafCell::new(Key::from_i32(1), &[9u8; 116 + 4088], DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(cell.overflow_page_count(), 1);

        let cell = LeafCell::new(Key::from_i32(1), &[9u8; 116 + 4089], DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(cell.overflow_page_count(), 2);
    }

    #[test]
    fn change_value_reports_changes_and_resets_chain() {
        let mut cell = LeafCell::new(Key::from_i32(1), b"abc", DEFAULT_PAGE_SIZE).unwrap();
        cell.set_first_overflow_page(42);

        assert!(cell.change_value(b"abcd", DEFAULT_PAGE_SIZE).unwrap());
        assert_eq!(cell.first_overflow_page(), 0);
        assert!(!cell.change_value(b"abcd", DEFAULT_PAGE_SIZE).unwrap());
    }

    #[test]
    fn leaf_cell_roundtrip_is_bit_exact() {
        let mut cell = LeafCell::new(
            Key::from_ascii("roundtrip").unwrap(),
            &[3u8; 300],
            DEFAULT_PAGE_SIZE,
        )
        .unwrap();
        cell.set_first_overflow_page(77);

        let mut buf = vec![0xAAu8; DEFAULT_PAGE_SIZE];
        let written = cell.encode(&mut buf, DEFAULT_PAGE_SIZE).unwrap();
        let (decoded, consumed) = LeafCell::decode(&buf, DEFAULT_PAGE_SIZE).unwrap();

        assert_eq!(written, consumed);
        assert_eq!(decoded, cell);

        let mut again = vec![0u8; written];
        decoded.encode(&mut again, DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(&buf[..written], &again[..]);
    }

    #[test]
    fn interior_cell_roundtrip_pads_short_keys() {
        let cell = InteriorCell::new(Key::from_bytes(b"ab"), 9).unwrap();
        assert_eq!(cell.cell_size(), 16);

        let mut buf = [0xFFu8; 32];
        let written = cell.encode(&mut buf).unwrap();
        assert_eq!(written, 16);
        assert_eq!(&buf[10..16], &[0u8; 6]);

        let (decoded, consumed) = InteriorCell::decode(&buf).unwrap();
        assert_eq!(consumed, 16);
        assert_eq!(decoded, cell);
    }
}
