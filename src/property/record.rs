//! The 128-byte directory entry record
//!
//! Layout (little-endian):
//!
//! | Offset | Size | Field                                   |
//! |--------|------|-----------------------------------------|
//! | 0x00   | 64   | Name, UTF-16LE, null-padded             |
//! | 0x40   | 2    | Name size in bytes, including null      |
//! | 0x42   | 1    | Entry type                              |
//! | 0x43   | 1    | Node color                              |
//! | 0x44   | 4    | Previous (left) sibling                 |
//! | 0x48   | 4    | Next (right) sibling                    |
//! | 0x4C   | 4    | Child tree root                         |
//! | 0x50   | 16   | Class ID                                |
//! | 0x60   | 4    | User flags (state bits)                 |
//! | 0x64   | 8    | Creation time (FILETIME)                |
//! | 0x6C   | 8    | Modification time (FILETIME)            |
//! | 0x74   | 4    | Start sector                            |
//! | 0x78   | 8    | Stream size (low 32 bits only for v3)   |

use super::name::EntryName;
use crate::consts::*;
use crate::error::{CfbError, Result};
use crate::storage::BigBlockSize;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use zerocopy::{FromBytes, IntoBytes, LE, U16, U32, U64};
use zerocopy_derive::{FromBytes as DeriveFromBytes, Immutable, IntoBytes as DeriveIntoBytes};

/// 100-nanosecond intervals between 1601-01-01 and 1970-01-01
const WINDOWS_EPOCH_OFFSET: i64 = 116_444_736_000_000_000;

/// Raw directory entry structure (128 bytes)
#[derive(Debug, Clone, DeriveFromBytes, DeriveIntoBytes, Immutable)]
#[repr(C)]
struct RawProperty {
    name: [u8; 64],
    name_size: U16<LE>,
    property_type: u8,
    node_color: u8,
    previous: U32<LE>,
    next: U32<LE>,
    child: U32<LE>,
    clsid: [u8; 16],
    user_flags: U32<LE>,
    created: U64<LE>,
    modified: U64<LE>,
    start_block: U32<LE>,
    size: U64<LE>,
}

/// Kind of directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PropertyType {
    /// Unallocated slot
    Unknown,
    /// Storage that owns child entries
    Directory,
    /// Stream holding document bytes
    Document,
    /// The single root storage
    Root,
}

impl PropertyType {
    /// Decode the type byte, `None` for codes the format does not define
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            STGTY_EMPTY => Some(PropertyType::Unknown),
            STGTY_STORAGE => Some(PropertyType::Directory),
            STGTY_STREAM => Some(PropertyType::Document),
            STGTY_ROOT => Some(PropertyType::Root),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            PropertyType::Unknown => STGTY_EMPTY,
            PropertyType::Directory => STGTY_STORAGE,
            PropertyType::Document => STGTY_STREAM,
            PropertyType::Root => STGTY_ROOT,
        }
    }

    /// Whether entries of this type own children
    pub fn is_directory(self) -> bool {
        matches!(self, PropertyType::Directory | PropertyType::Root)
    }
}

/// Red-black tree color of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeColor {
    Red,
    Black,
}

impl NodeColor {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            NODE_RED => Some(NodeColor::Red),
            NODE_BLACK => Some(NodeColor::Black),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            NodeColor::Red => NODE_RED,
            NodeColor::Black => NODE_BLACK,
        }
    }
}

/// 16-byte class identifier of a storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClassId([u8; 16]);

impl ClassId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Whether every byte is zero
    pub fn is_nil(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Display for ClassId {
    /// Formats as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`, with the first three
    /// groups read little-endian.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            b[8],
            b[9],
            b[10],
            b[11],
            b[12],
            b[13],
            b[14],
            b[15]
        )
    }
}

/// Convert a FILETIME value to a UTC timestamp; 0 means "not set"
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let ticks = i64::try_from(filetime).ok()? - WINDOWS_EPOCH_OFFSET;
    let secs = ticks.div_euclid(10_000_000);
    let nanos = (ticks.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Convert a UTC timestamp to a FILETIME value
pub fn datetime_to_filetime(dt: DateTime<Utc>) -> u64 {
    let ticks = dt.timestamp() * 10_000_000 + i64::from(dt.timestamp_subsec_nanos() / 100);
    (ticks + WINDOWS_EPOCH_OFFSET).max(0) as u64
}

/// A directory entry
///
/// Sibling and child links are directory indices, only meaningful once the
/// owning table has assigned indices (see `PropertyTable::pre_write`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: EntryName,
    property_type: PropertyType,
    node_color: NodeColor,
    previous: u32,
    next: u32,
    child: u32,
    clsid: ClassId,
    user_flags: u32,
    created: u64,
    modified: u64,
    start_block: u32,
    size: u64,
    index: Option<u32>,
}

impl Property {
    fn with_type(name: EntryName, property_type: PropertyType, start_block: u32) -> Self {
        Self {
            name,
            property_type,
            node_color: NodeColor::Black,
            previous: NOSTREAM,
            next: NOSTREAM,
            child: NOSTREAM,
            clsid: ClassId::default(),
            user_flags: 0,
            created: 0,
            modified: 0,
            start_block,
            size: 0,
            index: None,
        }
    }

    /// The root entry of a new container
    pub fn root() -> Self {
        Self::with_type(
            EntryName::from_disk(ROOT_ENTRY_NAME),
            PropertyType::Root,
            END_OF_CHAIN,
        )
    }

    /// A new, empty storage
    pub fn directory(name: EntryName) -> Self {
        Self::with_type(name, PropertyType::Directory, 0)
    }

    /// A new stream entry of `size` bytes with no sectors assigned yet
    pub fn document(name: EntryName, size: u64) -> Self {
        let mut property = Self::with_type(name, PropertyType::Document, END_OF_CHAIN);
        property.size = size;
        property
    }

    /// Decode a directory record.
    ///
    /// `index` is the record's position in the directory stream. With 512-byte
    /// sectors only the low 32 bits of the size field are meaningful.
    pub fn from_bytes(data: &[u8], index: u32, block_size: BigBlockSize) -> Result<Self> {
        let raw = data
            .get(..PROPERTY_SIZE)
            .and_then(|d| RawProperty::read_from_bytes(d).ok())
            .ok_or_else(|| {
                CfbError::Corrupted(format!("Directory entry {} is truncated", index))
            })?;

        let property_type = PropertyType::from_code(raw.property_type).ok_or_else(|| {
            CfbError::Corrupted(format!(
                "Directory entry {} has invalid type {}",
                index, raw.property_type
            ))
        })?;

        let name_size = raw.name_size.get() as usize;
        if name_size > raw.name.len() || name_size % 2 != 0 {
            return Err(CfbError::Corrupted(format!(
                "Directory entry {} has invalid name length {}",
                index, name_size
            )));
        }
        if name_size == 0 && property_type != PropertyType::Unknown {
            return Err(CfbError::Corrupted(format!(
                "Directory entry {} has no name",
                index
            )));
        }

        let name_bytes = &raw.name[..name_size.saturating_sub(2)];
        let (decoded, _) = encoding_rs::UTF_16LE.decode_without_bom_handling(name_bytes);
        let name = EntryName::from_disk(decoded.trim_end_matches('\0'));

        let size = if block_size == BigBlockSize::SMALLER {
            raw.size.get() & 0xFFFF_FFFF
        } else {
            raw.size.get()
        };

        Ok(Self {
            name,
            property_type,
            // Some writers leave the color byte unset; it is rebuilt on write
            node_color: NodeColor::from_code(raw.node_color).unwrap_or(NodeColor::Black),
            previous: raw.previous.get(),
            next: raw.next.get(),
            child: raw.child.get(),
            clsid: ClassId(raw.clsid),
            user_flags: raw.user_flags.get(),
            created: raw.created.get(),
            modified: raw.modified.get(),
            start_block: raw.start_block.get(),
            size,
            index: Some(index),
        })
    }

    /// Encode the record
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut name = [0u8; 64];
        let units: Vec<u16> = self
            .name
            .as_str()
            .encode_utf16()
            .take(MAX_NAME_LENGTH)
            .collect();
        for (slot, unit) in name.chunks_exact_mut(2).zip(&units) {
            slot.copy_from_slice(&unit.to_le_bytes());
        }

        let raw = RawProperty {
            name,
            name_size: U16::new(((units.len() + 1) * 2) as u16),
            property_type: self.property_type.code(),
            node_color: self.node_color.code(),
            previous: U32::new(self.previous),
            next: U32::new(self.next),
            child: U32::new(self.child),
            clsid: self.clsid.0,
            user_flags: U32::new(self.user_flags),
            created: U64::new(self.created),
            modified: U64::new(self.modified),
            start_block: U32::new(self.start_block),
            size: U64::new(self.size),
        };
        raw.as_bytes().to_vec()
    }

    /// Write the encoded record to `out`
    pub fn write_data<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// An unallocated directory slot, used to pad the last directory sector
    pub fn empty_record() -> [u8; PROPERTY_SIZE] {
        let mut data = [0u8; PROPERTY_SIZE];
        data[PROP_PREVIOUS..PROP_CLSID].fill(0xFF);
        data
    }

    pub fn name(&self) -> &EntryName {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: EntryName) {
        self.name = name;
    }

    pub fn property_type(&self) -> PropertyType {
        self.property_type
    }

    pub fn is_directory(&self) -> bool {
        self.property_type.is_directory()
    }

    pub fn node_color(&self) -> NodeColor {
        self.node_color
    }

    pub fn set_node_color(&mut self, color: NodeColor) {
        self.node_color = color;
    }

    /// Index of the previous (left) sibling
    pub fn previous(&self) -> u32 {
        self.previous
    }

    /// Index of the next (right) sibling
    pub fn next(&self) -> u32 {
        self.next
    }

    /// Index of the root of the child tree
    pub fn child(&self) -> u32 {
        self.child
    }

    pub(crate) fn set_links(&mut self, previous: u32, next: u32, child: u32) {
        self.previous = previous;
        self.next = next;
        self.child = child;
    }

    pub fn clsid(&self) -> ClassId {
        self.clsid
    }

    pub fn set_clsid(&mut self, clsid: ClassId) {
        self.clsid = clsid;
    }

    pub fn user_flags(&self) -> u32 {
        self.user_flags
    }

    pub fn set_user_flags(&mut self, flags: u32) {
        self.user_flags = flags;
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.created)
    }

    pub fn set_created(&mut self, time: Option<DateTime<Utc>>) {
        self.created = time.map_or(0, datetime_to_filetime);
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.modified)
    }

    pub fn set_modified(&mut self, time: Option<DateTime<Utc>>) {
        self.modified = time.map_or(0, datetime_to_filetime);
    }

    /// First sector (or mini sector) of the stream
    pub fn start_block(&self) -> u32 {
        self.start_block
    }

    pub fn set_start_block(&mut self, sector: u32) {
        self.start_block = sector;
    }

    /// First sector of the data chain actually owned by this entry.
    ///
    /// An empty stream owns no sectors, so this is `END_OF_CHAIN` whatever
    /// the record's start field holds. Some writers leave 0 there.
    pub fn chain_start(&self) -> u32 {
        if self.property_type == PropertyType::Document && self.size == 0 {
            END_OF_CHAIN
        } else {
            self.start_block
        }
    }

    /// Stream size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// Whether the stream lives in the mini stream
    pub fn should_use_small_blocks(&self) -> bool {
        self.property_type == PropertyType::Document && self.size < BIG_BLOCK_MINIMUM_DOCUMENT_SIZE
    }

    /// Position in the directory stream, once assigned
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: Option<u32>) {
        self.index = index;
    }
}
