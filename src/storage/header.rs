//! Compound file header
//!
//! The 512-byte header at file offset 0 holds the sector size, the BAT and
//! XBAT bookkeeping, the start of the directory chain and the first 109 BAT
//! sector pointers. With 4096-byte sectors the header still occupies the
//! whole first sector; the remaining bytes are zero.

use super::block_size::BigBlockSize;
use crate::consts::*;
use crate::error::{CfbError, Result};
use std::io::Write;
use zerocopy::{FromBytes, IntoBytes, LE, U16, U32};
use zerocopy_derive::{FromBytes as DeriveFromBytes, Immutable, IntoBytes as DeriveIntoBytes};

/// Raw header structure (512 bytes)
///
/// This represents the on-disk format of the header.
#[derive(Debug, Clone, DeriveFromBytes, DeriveIntoBytes, Immutable)]
#[repr(C)]
struct RawHeader {
    /// Magic bytes
    signature: [u8; 8],
    /// Header CLSID (always zero)
    clsid: [u8; 16],
    /// Minor version (0x003E)
    minor_version: U16<LE>,
    /// Major version (3 or 4)
    major_version: U16<LE>,
    /// Byte order mark (0xFFFE)
    byte_order: U16<LE>,
    /// log2 of the sector size
    sector_shift: U16<LE>,
    /// log2 of the mini sector size
    mini_sector_shift: U16<LE>,
    /// Reserved, must be zero
    reserved: [u8; 6],
    /// Number of directory sectors (zero for 512-byte sectors)
    num_dir_sectors: U32<LE>,
    /// Number of BAT sectors
    num_bat_sectors: U32<LE>,
    /// First sector of the directory chain
    first_dir_sector: U32<LE>,
    /// Transaction signature (unused)
    transaction_signature: U32<LE>,
    /// Mini stream cutoff size
    mini_stream_cutoff: U32<LE>,
    /// First sector of the SBAT chain
    first_sbat_sector: U32<LE>,
    /// Number of SBAT sectors
    num_sbat_sectors: U32<LE>,
    /// First XBAT sector
    first_xbat_sector: U32<LE>,
    /// Number of XBAT sectors
    num_xbat_sectors: U32<LE>,
    /// First 109 BAT sector pointers
    bat_array: [U32<LE>; HEADER_BAT_SLOTS],
}

/// Parsed compound file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    /// Sector size class
    big_block_size: BigBlockSize,
    /// Total number of BAT blocks, including those listed in XBAT blocks
    bat_count: u32,
    /// BAT sector pointers held in the header (at most 109)
    bat_array: Vec<u32>,
    /// First sector of the directory (property) chain
    property_start: u32,
    /// Number of directory sectors, only recorded for 4096-byte sectors
    property_sector_count: u32,
    /// First sector of the SBAT chain
    sbat_start: u32,
    /// Number of SBAT blocks
    sbat_count: u32,
    /// First XBAT sector
    xbat_start: u32,
    /// Number of XBAT blocks
    xbat_count: u32,
}

/// Check the leading bytes of a file for the compound file signature,
/// reporting other well-known formats distinctly.
pub fn detect_format(data: &[u8]) -> Result<()> {
    if data.starts_with(MAGIC) {
        return Ok(());
    }
    if data.starts_with(OLE2_BETA_MAGIC) {
        return Err(CfbError::UnsupportedFormat(
            "pre-release OLE2 container (version 0 signature)".to_string(),
        ));
    }
    if data.starts_with(BIFF2_MAGIC) {
        return Err(CfbError::UnsupportedFormat(
            "raw BIFF2 workbook stream (Excel 2.x), not a compound file".to_string(),
        ));
    }
    if data.starts_with(BIFF3_MAGIC) {
        return Err(CfbError::UnsupportedFormat(
            "raw BIFF3 workbook stream (Excel 3.x), not a compound file".to_string(),
        ));
    }
    if data.starts_with(BIFF4_MAGIC) {
        return Err(CfbError::UnsupportedFormat(
            "raw BIFF4 workbook stream (Excel 4.x), not a compound file".to_string(),
        ));
    }
    if data.starts_with(ZIP_MAGIC) {
        return Err(CfbError::UnsupportedFormat(
            "Office 2007+ XML package (zip), not a compound file".to_string(),
        ));
    }
    if data.starts_with(XML_MAGIC) {
        return Err(CfbError::UnsupportedFormat(
            "XML document, not a compound file".to_string(),
        ));
    }
    Err(CfbError::NotCompoundFile)
}

impl HeaderBlock {
    /// Create the header of an empty container
    pub fn new(big_block_size: BigBlockSize) -> Self {
        Self {
            big_block_size,
            bat_count: 0,
            bat_array: Vec::new(),
            property_start: END_OF_CHAIN,
            property_sector_count: 0,
            sbat_start: END_OF_CHAIN,
            sbat_count: 0,
            xbat_start: END_OF_CHAIN,
            xbat_count: 0,
        }
    }

    /// Parse the header from the first bytes of a file
    pub fn parse(data: &[u8]) -> Result<Self> {
        detect_format(data)?;

        if data.len() < HEADER_SIZE {
            return Err(CfbError::Corrupted(format!(
                "Header needs {} bytes, only {} available",
                HEADER_SIZE,
                data.len()
            )));
        }

        let raw = RawHeader::read_from_bytes(&data[..HEADER_SIZE])
            .map_err(|_| CfbError::Corrupted("Failed to parse header".to_string()))?;

        if raw.byte_order.get() != BYTE_ORDER_MARK {
            return Err(CfbError::Corrupted(format!(
                "Invalid byte order mark 0x{:04X}",
                raw.byte_order.get()
            )));
        }

        let big_block_size = BigBlockSize::from_shift(raw.sector_shift.get())?;
        let major_version = raw.major_version.get();
        if major_version != big_block_size.major_version() {
            return Err(CfbError::UnsupportedFormat(format!(
                "Major version {} with {}-byte sectors",
                major_version,
                big_block_size.sector_bytes()
            )));
        }

        let bat_count = raw.num_bat_sectors.get();
        let xbat_count = raw.num_xbat_sectors.get();
        let in_header = (bat_count as usize).min(HEADER_BAT_SLOTS);

        if bat_count as usize > HEADER_BAT_SLOTS {
            let capacity = HEADER_BAT_SLOTS as u64
                + xbat_count as u64 * big_block_size.xbat_entries_per_block() as u64;
            if (bat_count as u64) > capacity {
                return Err(CfbError::Corrupted(format!(
                    "{} BAT blocks declared but {} XBAT blocks can only list {}",
                    bat_count, xbat_count, capacity
                )));
            }
        }

        let bat_array: Vec<u32> = raw.bat_array[..in_header]
            .iter()
            .map(|v| v.get())
            .collect();

        if raw.bat_array[in_header..]
            .iter()
            .any(|v| v.get() != UNUSED_BLOCK)
        {
            log::warn!(
                "Header lists BAT pointers beyond the declared count of {}; ignoring them",
                bat_count
            );
        }

        Ok(Self {
            big_block_size,
            bat_count,
            bat_array,
            property_start: raw.first_dir_sector.get(),
            property_sector_count: raw.num_dir_sectors.get(),
            sbat_start: raw.first_sbat_sector.get(),
            sbat_count: raw.num_sbat_sectors.get(),
            xbat_start: raw.first_xbat_sector.get(),
            xbat_count,
        })
    }

    /// Sector size class of the container
    pub fn big_block_size(&self) -> BigBlockSize {
        self.big_block_size
    }

    /// Total number of BAT blocks
    pub fn bat_count(&self) -> u32 {
        self.bat_count
    }

    pub fn set_bat_count(&mut self, count: u32) {
        self.bat_count = count;
    }

    /// BAT sector pointers held in the header
    pub fn bat_array(&self) -> &[u32] {
        &self.bat_array
    }

    /// Replace the header-resident BAT pointers.
    ///
    /// Only the first 109 fit in the header; the caller keeps the rest in
    /// XBAT blocks.
    pub fn set_bat_array(&mut self, sectors: &[u32]) {
        let n = sectors.len().min(HEADER_BAT_SLOTS);
        self.bat_array = sectors[..n].to_vec();
    }

    /// Number of XBAT blocks
    pub fn xbat_count(&self) -> u32 {
        self.xbat_count
    }

    pub fn set_xbat_count(&mut self, count: u32) {
        self.xbat_count = count;
    }

    /// First XBAT sector
    pub fn xbat_start(&self) -> u32 {
        self.xbat_start
    }

    pub fn set_xbat_start(&mut self, sector: u32) {
        self.xbat_start = sector;
    }

    /// First sector of the directory chain
    pub fn property_start(&self) -> u32 {
        self.property_start
    }

    pub fn set_property_start(&mut self, sector: u32) {
        self.property_start = sector;
    }

    /// Number of directory sectors (only kept for 4096-byte sectors)
    pub fn property_sector_count(&self) -> u32 {
        self.property_sector_count
    }

    /// Set the number of directory sectors.
    /// For 512-byte sectors the field must stay 0.
    pub fn set_property_sector_count(&mut self, count: u32) {
        self.property_sector_count = if self.big_block_size == BigBlockSize::SMALLER {
            0
        } else {
            count
        };
    }

    /// First sector of the SBAT chain
    pub fn sbat_start(&self) -> u32 {
        self.sbat_start
    }

    pub fn set_sbat_start(&mut self, sector: u32) {
        self.sbat_start = sector;
    }

    /// Number of SBAT blocks
    pub fn sbat_count(&self) -> u32 {
        self.sbat_count
    }

    pub fn set_sbat_count(&mut self, count: u32) {
        self.sbat_count = count;
    }

    /// Serialize the header.
    ///
    /// The returned buffer is one sector long: 512 bytes of header data,
    /// zero-filled up to 4096 bytes for the larger sector size. BAT pointer
    /// slots beyond the header-resident pointers are filled with 0xFF.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bat_array = [U32::<LE>::new(UNUSED_BLOCK); HEADER_BAT_SLOTS];
        for (slot, &sector) in bat_array.iter_mut().zip(&self.bat_array) {
            slot.set(sector);
        }

        let raw = RawHeader {
            signature: *MAGIC,
            clsid: [0; 16],
            minor_version: U16::new(MINOR_VERSION),
            major_version: U16::new(self.big_block_size.major_version()),
            byte_order: U16::new(BYTE_ORDER_MARK),
            sector_shift: U16::new(self.big_block_size.shift()),
            mini_sector_shift: U16::new(MINI_SECTOR_SHIFT),
            reserved: [0; 6],
            num_dir_sectors: U32::new(self.property_sector_count),
            num_bat_sectors: U32::new(self.bat_count),
            first_dir_sector: U32::new(self.property_start),
            transaction_signature: U32::new(0),
            mini_stream_cutoff: U32::new(BIG_BLOCK_MINIMUM_DOCUMENT_SIZE as u32),
            first_sbat_sector: U32::new(self.sbat_start),
            num_sbat_sectors: U32::new(self.sbat_count),
            first_xbat_sector: U32::new(self.xbat_start),
            num_xbat_sectors: U32::new(self.xbat_count),
            bat_array,
        };

        let mut data = vec![0u8; self.big_block_size.sector_bytes()];
        data[..HEADER_SIZE].copy_from_slice(raw.as_bytes());
        data
    }

    /// Write the serialized header to `out`
    pub fn write_data<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(&self.to_bytes())?;
        Ok(())
    }
}
