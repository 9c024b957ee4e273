//! Sector allocation for big blocks (BAT) and mini blocks (SBAT)
//!
//! All chain manipulation goes through the flattened in-memory block lists.
//! New BAT blocks are placed at the first sector of the range they describe,
//! so a BAT block always covers its own sector.

use super::CompoundFile;
use super::data_source::DataSource;
use super::loop_detector::ChainLoopDetector;
use crate::consts::*;
use crate::error::{CfbError, Result};
use crate::storage::{BatBlock, get_bat_block_and_index, get_sbat_block_and_index};
use smallvec::SmallVec;

/// Sector chain of one stream
pub(crate) type Chain = SmallVec<[u32; 8]>;

/// Follow a chain from `start` until `END_OF_CHAIN`.
///
/// `capacity` is the number of sectors the table can address; any chain
/// longer than that must contain a loop.
fn walk_chain(
    start: u32,
    capacity: usize,
    detect_loops: bool,
    mut next: impl FnMut(u32) -> Result<u32>,
) -> Result<Chain> {
    let mut chain = Chain::new();
    let mut detector = detect_loops.then(|| ChainLoopDetector::new(capacity));
    let mut sector = start;

    while sector != END_OF_CHAIN {
        if sector > MAXREGSECT || sector as usize >= capacity {
            return Err(CfbError::Corrupted(format!(
                "Chain starting at sector {} reaches invalid sector 0x{:X}",
                start, sector
            )));
        }
        if let Some(detector) = detector.as_mut() {
            detector.claim(sector)?;
        } else if chain.len() >= capacity {
            return Err(CfbError::Corrupted(format!(
                "Chain starting at sector {} never ends",
                start
            )));
        }
        chain.push(sector);
        sector = next(sector)?;
    }
    Ok(chain)
}

impl<S: DataSource> CompoundFile<S> {
    pub(super) fn sector_bytes(&self) -> usize {
        self.header.big_block_size().sector_bytes()
    }

    fn sector_offset(&self, sector: u32) -> u64 {
        (sector as u64 + 1) * self.sector_bytes() as u64
    }

    pub(super) fn read_sector(&mut self, sector: u32) -> Result<Vec<u8>> {
        let offset = self.sector_offset(sector);
        let len = self.sector_bytes();
        self.source.read(offset, len)
    }

    /// Write one sector, zero-padding `data` to the sector size
    pub(super) fn write_sector(&mut self, sector: u32, data: &[u8]) -> Result<()> {
        let offset = self.sector_offset(sector);
        let len = self.sector_bytes();
        if data.len() == len {
            self.source.write(offset, data)
        } else {
            let mut padded = data.to_vec();
            padded.resize(len, 0);
            self.source.write(offset, &padded)
        }
    }

    /// Number of sectors the current BAT blocks can describe
    fn bat_capacity(&self) -> usize {
        self.bat_blocks.len() * self.header.big_block_size().bat_entries_per_block()
    }

    fn next_block(&self, sector: u32) -> Result<u32> {
        let bai = get_bat_block_and_index(sector, &self.header, &self.bat_blocks)?;
        Ok(self.bat_blocks[bai.block()].value_at(bai.index()))
    }

    pub(super) fn set_next_block(&mut self, sector: u32, value: u32) -> Result<()> {
        let bai = get_bat_block_and_index(sector, &self.header, &self.bat_blocks)?;
        self.bat_blocks[bai.block()].set_value_at(bai.index(), value);
        if value == UNUSED_BLOCK {
            self.free_hint = self.free_hint.min(bai.block());
        }
        Ok(())
    }

    /// Sectors of the chain starting at `start`
    pub(super) fn chain(&self, start: u32) -> Result<Chain> {
        walk_chain(
            start,
            self.bat_capacity(),
            self.options.detects_chain_loops(),
            |sector| self.next_block(sector),
        )
    }

    /// Read every sector of a chain
    pub(super) fn read_chain(&mut self, start: u32) -> Result<Vec<u8>> {
        let chain = self.chain(start)?;
        let mut data = Vec::with_capacity(chain.len() * self.sector_bytes());
        for sector in chain {
            data.extend_from_slice(&self.read_sector(sector)?);
        }
        Ok(data)
    }

    /// Read a stream of `size` bytes stored in big blocks
    pub(super) fn read_big_stream(&mut self, start: u32, size: u64) -> Result<Vec<u8>> {
        let chain = self.chain(start)?;
        let available = chain.len() as u64 * self.sector_bytes() as u64;
        if available < size {
            return Err(CfbError::Corrupted(format!(
                "Stream at sector {} declares {} bytes but its chain holds {}",
                start, size, available
            )));
        }

        let mut data = Vec::with_capacity(size as usize);
        for sector in chain {
            if data.len() as u64 >= size {
                break;
            }
            data.extend_from_slice(&self.read_sector(sector)?);
        }
        data.truncate(size as usize);
        Ok(data)
    }

    /// Find a free sector, growing the BAT (and the XBAT) when every
    /// addressable sector is taken.
    ///
    /// The returned sector is still marked free; the caller links it.
    pub fn get_free_block(&mut self) -> Result<u32> {
        let bs = self.header.big_block_size();
        let per_block = bs.bat_entries_per_block();

        for (block, bat) in self.bat_blocks.iter().enumerate().skip(self.free_hint) {
            if let Some(index) = bat.first_free() {
                let sector = block * per_block + index;
                if sector > MAXREGSECT as usize {
                    break;
                }
                return Ok(sector as u32);
            }
            self.free_hint = block + 1;
        }

        // Everything is in use: add a BAT block covering the next range and
        // store it in that range's first sector
        let offset = self.bat_blocks.len() * per_block;
        if offset > MAXREGSECT as usize {
            return Err(CfbError::OutOfRange(format!(
                "Cannot address more than {} sectors",
                MAXREGSECT
            )));
        }
        let mut bat = BatBlock::create_empty(bs, false);
        bat.set_value_at(0, FAT_SECTOR_BLOCK);
        bat.set_our_block_index(offset as u32);
        self.bat_blocks.push(bat);
        self.header.set_bat_count(self.bat_blocks.len() as u32);
        log::trace!(
            "Added BAT block {} at sector {}",
            self.bat_blocks.len() - 1,
            offset
        );

        let listed =
            HEADER_BAT_SLOTS + self.xbat_blocks.len() * bs.xbat_entries_per_block();
        if self.bat_blocks.len() > listed {
            let sector = self.get_free_block()?;
            self.set_next_block(sector, DIFAT_SECTOR_BLOCK)?;
            let mut xbat = BatBlock::create_empty(bs, true);
            xbat.set_our_block_index(sector);
            self.xbat_blocks.push(xbat);
            self.header.set_xbat_count(self.xbat_blocks.len() as u32);
            log::trace!("Added XBAT block at sector {}", sector);
        }

        self.get_free_block()
    }

    /// Store `data` in the chain starting at `start`, returning the new start.
    ///
    /// Existing sectors are reused in order, missing ones allocated, and
    /// surplus ones released. Empty data frees the whole chain and returns
    /// `END_OF_CHAIN`.
    pub fn update_chain(&mut self, start: u32, data: &[u8]) -> Result<u32> {
        let sector_bytes = self.sector_bytes();
        let needed = data.len().div_ceil(sector_bytes);
        let existing = if start == END_OF_CHAIN {
            Chain::new()
        } else {
            self.chain(start)?
        };

        let reused = needed.min(existing.len());
        let mut sectors: Chain = existing[..reused].iter().copied().collect();
        while sectors.len() < needed {
            let sector = self.get_free_block()?;
            // Claim it now so the next search moves on
            self.set_next_block(sector, END_OF_CHAIN)?;
            sectors.push(sector);
        }

        for pair in sectors.windows(2) {
            self.set_next_block(pair[0], pair[1])?;
        }
        if let Some(&last) = sectors.last() {
            self.set_next_block(last, END_OF_CHAIN)?;
        }
        for &surplus in &existing[reused..] {
            self.set_next_block(surplus, UNUSED_BLOCK)?;
        }

        for (&sector, chunk) in sectors.iter().zip(data.chunks(sector_bytes)) {
            self.write_sector(sector, chunk)?;
        }

        log::trace!(
            "Chain at {} now holds {} bytes in {} sectors ({} reused)",
            start,
            data.len(),
            sectors.len(),
            reused
        );
        Ok(sectors.first().copied().unwrap_or(END_OF_CHAIN))
    }

    /// Release every sector of the chain starting at `start`
    pub(super) fn free_chain(&mut self, start: u32) -> Result<()> {
        if start == END_OF_CHAIN {
            return Ok(());
        }
        for sector in self.chain(start)? {
            self.set_next_block(sector, UNUSED_BLOCK)?;
        }
        Ok(())
    }

    /// One past the highest sector in use
    pub(super) fn high_water_sector(&self) -> usize {
        let per_block = self.header.big_block_size().bat_entries_per_block();
        self.bat_blocks
            .iter()
            .enumerate()
            .rev()
            .find(|(_, bat)| bat.occupied_size() > 0)
            .map_or(0, |(block, bat)| block * per_block + bat.occupied_size())
    }

    // Mini store

    fn mini_capacity(&self) -> usize {
        self.sbat_blocks.len() * self.header.big_block_size().bat_entries_per_block()
    }

    fn next_mini_block(&self, index: u32) -> Result<u32> {
        let bai = get_sbat_block_and_index(index, &self.header, &self.sbat_blocks)?;
        Ok(self.sbat_blocks[bai.block()].value_at(bai.index()))
    }

    fn set_next_mini_block(&mut self, index: u32, value: u32) -> Result<()> {
        let bai = get_sbat_block_and_index(index, &self.header, &self.sbat_blocks)?;
        self.sbat_blocks[bai.block()].set_value_at(bai.index(), value);
        Ok(())
    }

    fn mini_chain(&self, start: u32) -> Result<Chain> {
        walk_chain(
            start,
            self.mini_capacity(),
            self.options.detects_chain_loops(),
            |index| self.next_mini_block(index),
        )
    }

    /// Load the root entry's mini stream if it is not in memory yet
    pub(super) fn ensure_mini_stream(&mut self) -> Result<()> {
        if self.mini_stream.is_some() {
            return Ok(());
        }

        let root = self.properties.root();
        let (start, size) = self
            .properties
            .get(root)
            .map(|p| (p.start_block(), p.size()))
            .unwrap_or((END_OF_CHAIN, 0));

        let data = if start == END_OF_CHAIN || size == 0 {
            Vec::new()
        } else {
            self.read_big_stream(start, size)?
        };
        log::trace!("Loaded mini stream of {} bytes", data.len());
        self.mini_stream = Some(data);
        Ok(())
    }

    /// Read a stream of `size` bytes stored in mini blocks
    pub(super) fn read_mini_stream(&mut self, start: u32, size: u64) -> Result<Vec<u8>> {
        self.ensure_mini_stream()?;
        let chain = self.mini_chain(start)?;
        let mini_stream = self.mini_stream.as_deref().unwrap_or_default();

        let mut data = Vec::with_capacity(size as usize);
        for index in chain {
            if data.len() as u64 >= size {
                break;
            }
            let offset = index as usize * SMALL_BLOCK_SIZE;
            let block = mini_stream
                .get(offset..offset + SMALL_BLOCK_SIZE)
                .ok_or_else(|| {
                    CfbError::Corrupted(format!(
                        "Mini sector {} lies outside the {}-byte mini stream",
                        index,
                        mini_stream.len()
                    ))
                })?;
            data.extend_from_slice(block);
        }

        if (data.len() as u64) < size {
            return Err(CfbError::Corrupted(format!(
                "Mini stream chain at {} holds {} of {} bytes",
                start,
                data.len(),
                size
            )));
        }
        data.truncate(size as usize);
        Ok(data)
    }

    fn get_free_mini_block(&mut self) -> Result<u32> {
        let per_block = self.header.big_block_size().bat_entries_per_block();
        for (block, sbat) in self.sbat_blocks.iter().enumerate() {
            if let Some(index) = sbat.first_free() {
                return Ok((block * per_block + index) as u32);
            }
        }

        let index = self.sbat_blocks.len() * per_block;
        if index > MAXREGSECT as usize {
            return Err(CfbError::OutOfRange(
                "Mini stream cannot grow any further".to_string(),
            ));
        }
        self.sbat_blocks
            .push(BatBlock::create_empty(self.header.big_block_size(), false));
        self.header.set_sbat_count(self.sbat_blocks.len() as u32);
        log::trace!("Added SBAT block {}", self.sbat_blocks.len() - 1);
        Ok(index as u32)
    }

    /// Mini store counterpart of [`update_chain`](Self::update_chain)
    pub(super) fn update_mini_chain(&mut self, start: u32, data: &[u8]) -> Result<u32> {
        self.ensure_mini_stream()?;
        let needed = data.len().div_ceil(SMALL_BLOCK_SIZE);
        let existing = if start == END_OF_CHAIN {
            Chain::new()
        } else {
            self.mini_chain(start)?
        };

        let reused = needed.min(existing.len());
        let mut blocks: Chain = existing[..reused].iter().copied().collect();
        while blocks.len() < needed {
            let index = self.get_free_mini_block()?;
            self.set_next_mini_block(index, END_OF_CHAIN)?;
            blocks.push(index);
        }

        for pair in blocks.windows(2) {
            self.set_next_mini_block(pair[0], pair[1])?;
        }
        if let Some(&last) = blocks.last() {
            self.set_next_mini_block(last, END_OF_CHAIN)?;
        }
        for &surplus in &existing[reused..] {
            self.set_next_mini_block(surplus, UNUSED_BLOCK)?;
        }

        let mini_stream = self.mini_stream.get_or_insert_with(Vec::new);
        for (&index, chunk) in blocks.iter().zip(data.chunks(SMALL_BLOCK_SIZE)) {
            let offset = index as usize * SMALL_BLOCK_SIZE;
            let end = offset + SMALL_BLOCK_SIZE;
            if mini_stream.len() < end {
                mini_stream.resize(end, 0);
            }
            mini_stream[offset..offset + chunk.len()].copy_from_slice(chunk);
            mini_stream[offset + chunk.len()..end].fill(0);
        }

        Ok(blocks.first().copied().unwrap_or(END_OF_CHAIN))
    }

    /// Release every mini sector of the chain starting at `start`
    pub(super) fn free_mini_chain(&mut self, start: u32) -> Result<()> {
        if start == END_OF_CHAIN {
            return Ok(());
        }
        // The SBAT is only rewritten when the mini stream is loaded
        self.ensure_mini_stream()?;
        for index in self.mini_chain(start)? {
            self.set_next_mini_block(index, UNUSED_BLOCK)?;
        }
        Ok(())
    }

    /// One past the highest mini sector in use
    pub(super) fn mini_high_water(&self) -> usize {
        let per_block = self.header.big_block_size().bat_entries_per_block();
        self.sbat_blocks
            .iter()
            .enumerate()
            .rev()
            .find(|(_, sbat)| sbat.occupied_size() > 0)
            .map_or(0, |(block, sbat)| block * per_block + sbat.occupied_size())
    }
}
