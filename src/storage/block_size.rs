//! Sector size classes
//!
//! A compound file uses one of two sector sizes: 512 bytes (major version 3)
//! or 4096 bytes (major version 4). Everything that interprets raw sector
//! bytes derives its entry counts from the chosen size.

use crate::consts::*;
use crate::error::{CfbError, Result};

/// Describes a supported sector size and the constants derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BigBlockSize {
    /// log2 of the sector size (9 or 12)
    shift: u16,
}

impl BigBlockSize {
    /// 512-byte sectors
    pub const SMALLER: BigBlockSize = BigBlockSize { shift: 9 };
    /// 4096-byte sectors
    pub const LARGER: BigBlockSize = BigBlockSize { shift: 12 };

    /// Select the size class for a sector size in bytes.
    ///
    /// The format defines exactly two classes; anything else is rejected.
    pub fn new(sector_bytes: usize) -> Result<Self> {
        match sector_bytes {
            512 => Ok(Self::SMALLER),
            4096 => Ok(Self::LARGER),
            other => Err(CfbError::InvalidArgument(format!(
                "Sector size must be 512 or 4096, got {}",
                other
            ))),
        }
    }

    /// Select the size class from the header's sector shift field.
    pub fn from_shift(shift: u16) -> Result<Self> {
        match shift {
            9 => Ok(Self::SMALLER),
            12 => Ok(Self::LARGER),
            other => Err(CfbError::UnsupportedFormat(format!(
                "Unsupported block size (2^{}), expected 2^9 or 2^12",
                other
            ))),
        }
    }

    /// Sector size in bytes
    #[inline]
    pub fn sector_bytes(&self) -> usize {
        1usize << self.shift
    }

    /// log2 of the sector size, as stored in the header
    #[inline]
    pub fn shift(&self) -> u16 {
        self.shift
    }

    /// Major version that goes with this sector size
    pub fn major_version(&self) -> u16 {
        if self.shift == 9 {
            MAJOR_VERSION_3
        } else {
            MAJOR_VERSION_4
        }
    }

    /// Number of 32-bit entries in one BAT block
    #[inline]
    pub fn bat_entries_per_block(&self) -> usize {
        self.sector_bytes() / 4
    }

    /// Number of BAT pointers in one XBAT block (the last slot chains to the next)
    #[inline]
    pub fn xbat_entries_per_block(&self) -> usize {
        self.bat_entries_per_block() - 1
    }

    /// Byte offset of the next-XBAT pointer within an XBAT block
    #[inline]
    pub fn xbat_chain_offset(&self) -> usize {
        self.xbat_entries_per_block() * 4
    }

    /// Number of directory entries that fit in one sector
    #[inline]
    pub fn properties_per_block(&self) -> usize {
        self.sector_bytes() / PROPERTY_SIZE
    }

    /// Number of mini sectors that fit in one sector
    #[inline]
    pub fn small_blocks_per_block(&self) -> usize {
        self.sector_bytes() / SMALL_BLOCK_SIZE
    }
}

impl Default for BigBlockSize {
    fn default() -> Self {
        Self::SMALLER
    }
}
