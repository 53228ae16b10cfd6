//! Disk-resident storage for Interlock.
//!
//! This crate provides:
//! - A fixed-width little-endian record codec
//! - Absolute-position file I/O for the per-tree store files
//! - A generic disk B+ tree with an LRU node cache, leaf-chain
//!   iteration, and O(1) handle-based value access

mod file;
mod node;
mod record;
mod tree;

pub use file::StoreFile;
pub use node::{Node, NO_NODE};
pub use record::{Entry, Handle, Key, Record};
pub use tree::{BPlusTree, TreeIter};
