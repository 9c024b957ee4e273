//! Reading and writing whole compound files
//!
//! [`CompoundFile`] ties the header, allocation tables and directory tree
//! together over a [`DataSource`]. Streams smaller than 4096 bytes are kept in
//! the mini stream (64-byte mini sectors chained through the SBAT), larger
//! ones in regular sectors chained through the BAT.
//!
//! # Example
//!
//! ```no_run
//! use litchi_cfb::OpenOptions;
//!
//! let mut cfb = OpenOptions::new().open_path("document.doc")?;
//! for path in cfb.list_streams() {
//!     println!("{}", path.join("/"));
//! }
//! let word = cfb.open_stream(&["WordDocument"])?;
//! println!("WordDocument is {} bytes", word.len());
//! # Ok::<(), litchi_cfb::CfbError>(())
//! ```

mod allocation;
mod compound_file;
pub mod data_source;
mod entry;
pub mod loop_detector;
pub mod options;
mod persist;

#[cfg(test)]
mod tests;

pub use compound_file::CompoundFile;
pub use data_source::{ByteArrayDataSource, DataSource, FileBackedDataSource};
pub use entry::{EntryInfo, EntryType};
pub use loop_detector::ChainLoopDetector;
pub use options::OpenOptions;

use crate::consts::{MAGIC, MINIMAL_FILE_SIZE};

/// Check whether `data` looks like a compound file
pub fn is_cfb_file(data: &[u8]) -> bool {
    data.len() >= MINIMAL_FILE_SIZE && data.starts_with(MAGIC)
}
