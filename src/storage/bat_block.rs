//! Block allocation table (BAT) blocks
//!
//! A BAT block is one sector interpreted as an array of little-endian 32-bit
//! sector pointers. Each entry is either a sentinel or the index of the next
//! sector in a chain:
//! - Free sectors are marked with `UNUSED_BLOCK` (0xFFFFFFFF)
//! - The last sector of a chain holds `END_OF_CHAIN` (0xFFFFFFFE)
//! - Sectors holding the BAT itself are marked `FAT_SECTOR_BLOCK` (0xFFFFFFFD)
//! - Sectors holding XBAT blocks are marked `DIFAT_SECTOR_BLOCK` (0xFFFFFFFC)
//!
//! XBAT (extension) blocks use the same layout, except that the final slot
//! is the sector index of the next XBAT block rather than a data entry.
//! For 512-byte sectors: 127 BAT pointers + 1 next pointer (128 * 4 = 512);
//! for 4096-byte sectors: 1023 BAT pointers + 1 next pointer.
//!
//! Blocks are kept decoded; the raw form only exists while reading a sector
//! and while writing one back.

use super::block_size::BigBlockSize;
use super::header::HeaderBlock;
use crate::consts::*;
use crate::error::{CfbError, Result};
use std::io::Write;
use zerocopy::{FromBytes, LE, U32};

/// One BAT or XBAT sector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatBlock {
    /// Sector size this block was created for
    block_size: BigBlockSize,
    /// Decoded entries (always `bat_entries_per_block` long)
    values: Vec<u32>,
    /// Whether the last slot is an XBAT chain pointer
    is_xbat: bool,
    /// Sector this block lives in, once known
    our_block_index: Option<u32>,
}

/// Position of a sector's entry within the flattened BAT list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatBlockAndIndex {
    /// Position of the block in the flattened list
    block: usize,
    /// Entry index within that block
    index: usize,
}

impl BatBlockAndIndex {
    /// Position of the owning block in the flattened list
    pub fn block(&self) -> usize {
        self.block
    }

    /// Entry index within the owning block
    pub fn index(&self) -> usize {
        self.index
    }
}

impl BatBlock {
    /// Create a block whose every entry is free.
    ///
    /// For an XBAT block the chain slot starts as `END_OF_CHAIN`.
    pub fn create_empty(block_size: BigBlockSize, is_xbat: bool) -> Self {
        let mut values = vec![UNUSED_BLOCK; block_size.bat_entries_per_block()];
        if is_xbat {
            values[block_size.xbat_entries_per_block()] = END_OF_CHAIN;
        }

        Self {
            block_size,
            values,
            is_xbat,
            our_block_index: None,
        }
    }

    /// Decode a BAT block from a sector's bytes.
    pub fn create_bat_block(block_size: BigBlockSize, data: &[u8]) -> Result<Self> {
        Self::decode(block_size, data, false)
    }

    /// Decode an XBAT block from a sector's bytes.
    pub fn create_xbat_block(block_size: BigBlockSize, data: &[u8]) -> Result<Self> {
        Self::decode(block_size, data, true)
    }

    fn decode(block_size: BigBlockSize, data: &[u8], is_xbat: bool) -> Result<Self> {
        let sector_bytes = block_size.sector_bytes();
        if data.len() < sector_bytes {
            return Err(CfbError::Corrupted(format!(
                "Allocation block needs {} bytes, only {} available",
                sector_bytes,
                data.len()
            )));
        }

        let values = data[..sector_bytes]
            .chunks_exact(4)
            .map(|chunk| {
                U32::<LE>::read_from_bytes(chunk)
                    .map(|v| v.get())
                    .unwrap_or(UNUSED_BLOCK)
            })
            .collect();

        Ok(Self {
            block_size,
            values,
            is_xbat,
            our_block_index: None,
        })
    }

    /// Number of data entries (excludes the XBAT chain slot)
    #[inline]
    pub fn entry_count(&self) -> usize {
        if self.is_xbat {
            self.block_size.xbat_entries_per_block()
        } else {
            self.block_size.bat_entries_per_block()
        }
    }

    /// Read the entry at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below `bat_entries_per_block`.
    #[inline]
    pub fn value_at(&self, index: usize) -> u32 {
        self.values[index]
    }

    /// Overwrite the entry at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below `bat_entries_per_block`.
    #[inline]
    pub fn set_value_at(&mut self, index: usize, value: u32) {
        self.values[index] = value;
    }

    /// Whether any data entry is `UNUSED_BLOCK`
    pub fn has_free_sectors(&self) -> bool {
        self.data_entries().iter().any(|&v| v == UNUSED_BLOCK)
    }

    /// Index of the first free data entry
    pub fn first_free(&self) -> Option<usize> {
        self.data_entries().iter().position(|&v| v == UNUSED_BLOCK)
    }

    /// Count of data entries that are not `UNUSED_BLOCK`.
    ///
    /// With `exclude_special_blocks`, entries marking BAT or XBAT sectors are
    /// left out of the count.
    pub fn used_sectors(&self, exclude_special_blocks: bool) -> usize {
        self.data_entries()
            .iter()
            .filter(|&&v| v != UNUSED_BLOCK)
            .filter(|&&v| {
                !(exclude_special_blocks && (v == FAT_SECTOR_BLOCK || v == DIFAT_SECTOR_BLOCK))
            })
            .count()
    }

    /// High-water mark: one past the highest data entry that is in use,
    /// or 0 when the block is entirely free.
    pub fn occupied_size(&self) -> usize {
        self.data_entries()
            .iter()
            .rposition(|&v| v != UNUSED_BLOCK)
            .map_or(0, |i| i + 1)
    }

    /// Sector index of the next XBAT block (only meaningful for XBAT blocks)
    pub fn next_xbat(&self) -> u32 {
        self.values[self.block_size.xbat_entries_per_block()]
    }

    /// Set the chain pointer to the next XBAT block
    pub fn set_next_xbat(&mut self, sector: u32) {
        let slot = self.block_size.xbat_entries_per_block();
        self.values[slot] = sector;
    }

    /// Whether this block is an XBAT block
    pub fn is_xbat(&self) -> bool {
        self.is_xbat
    }

    /// Sector this block is stored in
    pub fn our_block_index(&self) -> Option<u32> {
        self.our_block_index
    }

    /// Record the sector this block is stored in
    pub fn set_our_block_index(&mut self, sector: u32) {
        self.our_block_index = Some(sector);
    }

    /// Sector size of this block
    pub fn block_size(&self) -> BigBlockSize {
        self.block_size
    }

    /// Encode the block back to a sector's bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.block_size.sector_bytes());
        for &value in &self.values {
            data.extend_from_slice(&value.to_le_bytes());
        }
        data
    }

    /// Write the encoded block to `out`
    pub fn write_data<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(&self.to_bytes())?;
        Ok(())
    }

    fn data_entries(&self) -> &[u32] {
        &self.values[..self.entry_count()]
    }
}

/// Largest file a container with `bat_count` BAT blocks can address:
/// the header sector plus every sector each BAT entry can describe.
pub fn calculate_maximum_size(block_size: BigBlockSize, bat_count: usize) -> u64 {
    let sector_bytes = block_size.sector_bytes() as u64;
    let entries = block_size.bat_entries_per_block() as u64;
    sector_bytes + (bat_count as u64) * entries * sector_bytes
}

/// Resolve a sector offset to its BAT block and the entry within it.
///
/// `bats` must already be the flattened list (header pointers followed by
/// XBAT-provided pointers); resolution is purely positional.
pub fn get_bat_block_and_index(
    offset: u32,
    header: &HeaderBlock,
    bats: &[BatBlock],
) -> Result<BatBlockAndIndex> {
    resolve(offset, header.big_block_size(), bats.len(), "BAT")
}

/// Resolve a mini sector offset to its SBAT block and the entry within it.
pub fn get_sbat_block_and_index(
    offset: u32,
    header: &HeaderBlock,
    sbats: &[BatBlock],
) -> Result<BatBlockAndIndex> {
    resolve(offset, header.big_block_size(), sbats.len(), "SBAT")
}

fn resolve(
    offset: u32,
    block_size: BigBlockSize,
    block_count: usize,
    table: &str,
) -> Result<BatBlockAndIndex> {
    let entries = block_size.bat_entries_per_block();
    let block = offset as usize / entries;
    let index = offset as usize % entries;

    if block >= block_count {
        return Err(CfbError::OutOfRange(format!(
            "Sector {} needs {} block {}, but only {} exist",
            offset, table, block, block_count
        )));
    }

    Ok(BatBlockAndIndex { block, index })
}
