//! Sector-level structures of a compound file
//!
//! The header, the sector size classes and the block allocation table blocks
//! that chain sectors together. Nothing here knows about streams or names.

/// Sector size classes and derived constants
pub mod block_size;

/// BAT/XBAT blocks and the sector index resolver
pub mod bat_block;

/// The 512-byte header block
pub mod header;

pub use bat_block::{
    BatBlock, BatBlockAndIndex, calculate_maximum_size, get_bat_block_and_index,
    get_sbat_block_and_index,
};
pub use block_size::BigBlockSize;
pub use header::{HeaderBlock, detect_format};
