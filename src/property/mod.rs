//! Directory entries (properties) and the tree they form
//!
//! Every storage and stream in a compound file is described by a 128-byte
//! directory entry. Storages own an ordered set of children; the directory
//! stream encodes that set as a binary tree of sibling links.

/// Entry names and sibling ordering
pub mod name;

/// The 128-byte directory record
pub mod record;

/// The directory tree
pub mod table;

pub use name::{EntryName, compare_names};
pub use record::{ClassId, NodeColor, Property, PropertyType};
pub use table::{PropertyId, PropertyTable};
