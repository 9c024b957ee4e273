//! Litchi CFB - OLE2 compound file storage for Rust
//!
//! Reads and writes the Compound File Binary format that legacy Microsoft
//! Office documents (.doc, .xls, .ppt, .msg) are stored in: a small file
//! system of storages and streams packed into fixed-size sectors.
//!
//! # Features
//!
//! - **512 and 4096-byte sectors**: version 3 and version 4 containers
//! - **Mini stream**: streams under 4096 bytes are packed into 64-byte mini sectors
//! - **Unbounded growth**: BAT blocks beyond the 109 header slots are listed in XBAT blocks
//! - **Corruption checks**: chain loops, bad sibling links and duplicate names are reported
//! - **In-place editing**: create, overwrite, rename and delete entries, then flush
//!
//! # Example - Reading streams
//!
//! ```no_run
//! use litchi_cfb::OpenOptions;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cfb = OpenOptions::new().open_path("Book1.xls")?;
//!
//! for entry in cfb.walk() {
//!     println!("{:?} {} ({} bytes)", entry.entry_type, entry.path.join("/"), entry.size);
//! }
//!
//! let workbook = cfb.open_stream(&["Workbook"])?;
//! println!("Workbook stream: {} bytes", workbook.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Building a container
//!
//! ```
//! use litchi_cfb::CompoundFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cfb = CompoundFile::new();
//! cfb.write_stream(&["WordDocument"], &[0u8; 8192])?;
//! cfb.write_stream(&["ObjectPool", "_1234", "\u{1}Ole"], b"ole")?;
//!
//! let bytes = cfb.into_bytes()?;
//! assert!(litchi_cfb::is_cfb_file(&bytes));
//! # Ok(())
//! # }
//! ```

/// Format constants: signatures, sentinels and record offsets
pub mod consts;

/// Error types shared by every layer
pub mod error;

/// Sector-level structures: header, sector sizes and allocation tables
pub mod storage;

/// Directory entries and the directory tree
pub mod property;

/// Whole-file access on top of a data source
pub mod filesystem;

pub use error::{CfbError, Result};
pub use filesystem::{
    ByteArrayDataSource, CompoundFile, DataSource, EntryInfo, EntryType, FileBackedDataSource,
    OpenOptions, is_cfb_file,
};
pub use property::{ClassId, EntryName, Property, PropertyTable, PropertyType};
pub use storage::{BatBlock, BigBlockSize, HeaderBlock};
