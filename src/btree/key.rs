//! # Key Type
//!
//! Immutable, totally ordered byte-sequence keys. Ordering is lexicographic
//! byte comparison (a strict prefix sorts before its extension), the empty
//! sequence is the minimum, and a designated sentinel `Max` compares greater
//! than every other key and equal only to itself. The sentinel exists so
//! range scans can express "no upper bound" without a separate option type;
//! it is never stored in a cell.
//!
//! ## Integer Keys
//!
//! Signed 32-bit keys are encoded as 4 big-endian bytes with the sign bit
//! flipped, which makes two's-complement order coincide with unsigned
//! lexicographic order:
//!
//! ```text
//! -2 -> 7F FF FF FE
//! -1 -> 7F FF FF FF
//!  0 -> 80 00 00 00
//!  1 -> 80 00 00 01
//! ```
//!
//! Keys up to 16 bytes are stored inline without heap allocation.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use eyre::{ensure, Result};
use smallvec::SmallVec;

#[derive(Clone, Debug)]
pub enum Key {
    Bytes(SmallVec<[u8; 16]>),
    Max,
}

impl Key {
    /// The minimum key: the empty byte sequence.
    pub fn min() -> Self {
        Key::Bytes(SmallVec::new())
    }

    /// The sentinel maximum, greater than every storable key.
    pub fn max() -> Self {
        Key::Max
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Key::Bytes(SmallVec::from_slice(bytes))
    }

    pub fn from_ascii(s: &str) -> Result<Self> {
        ensure!(s.is_ascii(), "key string is not ascii: {:?}", s);
        Ok(Key::Bytes(SmallVec::from_slice(s.as_bytes())))
    }

    pub fn from_i32(value: i32) -> Self {
        let encoded = (value as u32) ^ 0x8000_0000;
        Key::Bytes(SmallVec::from_slice(&encoded.to_be_bytes()))
    }

    pub fn is_max(&self) -> bool {
        matches!(self, Key::Max)
    }

    /// The raw byte form, or `None` for the sentinel maximum.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Key::Bytes(b) => Some(b),
            Key::Max => None,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Max, Key::Max) => Ordering::Equal,
            (Key::Max, _) => Ordering::Greater,
            (_, Key::Max) => Ordering::Less,
            (Key::Bytes(a), Key::Bytes(b)) => a.as_slice().cmp(b.as_slice()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Key::Bytes(b) => {
                state.write_u8(0);
                state.write(b);
            }
            Key::Max => state.write_u8(1),
        }
    }
}
