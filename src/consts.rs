//! Constants for the compound file binary format
//!
//! Sector sentinels, directory entry types and the fixed offsets of the
//! header and directory entry records.

/// Magic bytes that should be at the beginning of every compound file
pub const MAGIC: &[u8; 8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// Signature used by pre-release OLE2 writers (never produced by shipping Office)
pub const OLE2_BETA_MAGIC: &[u8; 8] = b"\x0E\x11\xFC\x0D\xD0\xCF\x11\x0E";

/// Minimal size of an empty compound file with 512-byte sectors (1536 bytes)
pub const MINIMAL_FILE_SIZE: usize = 1536;

/// Size of the on-disk header structure, regardless of sector size
pub const HEADER_SIZE: usize = 512;

/// Size of a directory entry in bytes
pub const PROPERTY_SIZE: usize = 128;

/// Size of a mini sector in bytes
pub const SMALL_BLOCK_SIZE: usize = 64;

/// Streams smaller than this many bytes live in the mini stream
pub const BIG_BLOCK_MINIMUM_DOCUMENT_SIZE: u64 = 4096;

/// Number of BAT sector pointers stored directly in the header
pub const HEADER_BAT_SLOTS: usize = 109;

/// Longest name a directory entry can hold, excluding the terminator
pub const MAX_NAME_LENGTH: usize = 31;

// Sector IDs
/// Maximum regular sector ID
pub const MAXREGSECT: u32 = 0xFFFFFFFA; // -6
/// Denotes a DIFAT (XBAT) sector in a BAT
pub const DIFAT_SECTOR_BLOCK: u32 = 0xFFFFFFFC; // -4
/// Denotes a BAT sector in a BAT
pub const FAT_SECTOR_BLOCK: u32 = 0xFFFFFFFD; // -3
/// End of a sector chain
pub const END_OF_CHAIN: u32 = 0xFFFFFFFE; // -2
/// Unallocated sector
pub const UNUSED_BLOCK: u32 = 0xFFFFFFFF; // -1

// Directory entry IDs
/// Maximum directory entry ID
pub const MAXREGSID: u32 = 0xFFFFFFFA;
/// No sibling / child
pub const NOSTREAM: u32 = 0xFFFFFFFF;

// Object types in storage
/// Empty directory entry
pub const STGTY_EMPTY: u8 = 0;
/// Element is a storage object
pub const STGTY_STORAGE: u8 = 1;
/// Element is a stream object
pub const STGTY_STREAM: u8 = 2;
/// Element is a root storage
pub const STGTY_ROOT: u8 = 5;

/// Node colors of the sibling tree
pub const NODE_RED: u8 = 0;
pub const NODE_BLACK: u8 = 1;

/// Name of the root directory entry
pub const ROOT_ENTRY_NAME: &str = "Root Entry";

/// Major version for 512-byte sectors
pub const MAJOR_VERSION_3: u16 = 3;
/// Major version for 4096-byte sectors
pub const MAJOR_VERSION_4: u16 = 4;
/// Minor version written by every known producer
pub const MINOR_VERSION: u16 = 0x003E;
/// Little-endian byte order mark
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;
/// log2 of the mini sector size
pub const MINI_SECTOR_SHIFT: u16 = 6;

// Header field offsets
pub const HDR_MINOR_VERSION: usize = 0x18;
pub const HDR_MAJOR_VERSION: usize = 0x1A;
pub const HDR_BYTE_ORDER: usize = 0x1C;
pub const HDR_SECTOR_SHIFT: usize = 0x1E;
pub const HDR_BAT_COUNT: usize = 0x2C;
pub const HDR_PROPERTY_START: usize = 0x30;
pub const HDR_SBAT_START: usize = 0x3C;
pub const HDR_SBAT_COUNT: usize = 0x40;
pub const HDR_XBAT_START: usize = 0x44;
pub const HDR_XBAT_COUNT: usize = 0x48;
pub const HDR_BAT_ARRAY: usize = 0x4C;

// Directory entry field offsets
pub const PROP_NAME_SIZE: usize = 0x40;
pub const PROP_TYPE: usize = 0x42;
pub const PROP_NODE_COLOR: usize = 0x43;
pub const PROP_PREVIOUS: usize = 0x44;
pub const PROP_NEXT: usize = 0x48;
pub const PROP_CHILD: usize = 0x4C;
pub const PROP_CLSID: usize = 0x50;
pub const PROP_START_BLOCK: usize = 0x74;
pub const PROP_SIZE: usize = 0x78;

/// Leading bytes of a raw BIFF2 workbook stream
pub const BIFF2_MAGIC: &[u8; 4] = b"\x09\x00\x04\x00";
/// Leading bytes of a raw BIFF3 workbook stream
pub const BIFF3_MAGIC: &[u8; 4] = b"\x09\x02\x06\x00";
/// Leading bytes of a raw BIFF4 workbook stream
pub const BIFF4_MAGIC: &[u8; 4] = b"\x09\x04\x06\x00";
/// Leading bytes of a zip container (OOXML package)
pub const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";
/// Leading bytes of a flat XML document
pub const XML_MAGIC: &[u8; 5] = b"<?xml";
