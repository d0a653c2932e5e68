//! # ixtl - Embedded Page-Based B+Tree Storage
//!
//! ixtl is an embedded storage engine keeping sixteen independent B+Trees
//! in one page-structured file. Keys are arbitrary byte sequences under
//! lexicographic order; values of any length are stored inline or across
//! overflow page chains. The design prioritizes:
//!
//! - **Predictable layout**: fixed-size pages, little-endian fields, every
//!   structure decodable with nothing but the page bytes
//! - **Space reuse**: deleted pages return to a free list and are handed
//!   out again before the file grows
//! - **Isolated writers**: per-tree reader/writer locks and buffered write
//!   transactions with commit and rollback
//!
//! ## Quick Start
//!
//! ```ignore
//! use ixtl::{Container, Key};
//!
//! let container = Container::create_file("./data.ixtl")?;
//! let tree = container.tree(0)?;
//!
//! tree.insert(&Key::from_ascii("alice")?, b"engineering")?;
//! tree.insert(&Key::from_i32(42), b"answer")?;
//!
//! for (key, value) in tree.select(&Key::min(), &Key::max())? {
//!     println!("{key:?} = {value:?}");
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │     Tree API (insert/select/...)     │
//! ├─────────────────────────────────────┤
//! │   B+Tree Nodes (split/merge/scan)    │
//! ├─────────────────────────────────────┤
//! │ Container (locks, txns, allocation)  │
//! ├─────────────────────────────────────┤
//! │  Pages (header/free list/overflow)   │
//! ├─────────────────────────────────────┤
//! │  Paged File (mmap) + TTL Page Cache  │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! One file holds everything. Page 0 is the header: magic bytes, the free
//! list head, the page count and one root pointer per tree. Every other
//! page is a leaf, interior, overflow or free-list trunk page, typed by
//! its own contents and reachable only through those pointers.

pub mod btree;
pub mod config;
pub mod container;
pub mod storage;

pub use btree::{Key, Tree};
pub use container::Container;
