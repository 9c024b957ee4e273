//! Writing the in-memory structures back to the data source
//!
//! Flush order matters: the mini stream and SBAT are stored first because
//! they update the root entry, the directory next, and the BAT/XBAT blocks
//! last since every earlier step may have allocated sectors. The header
//! goes out at the very end.

use super::CompoundFile;
use super::data_source::{ByteArrayDataSource, DataSource};
use crate::consts::*;
use crate::error::{CfbError, Result};
use bytes::Bytes;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

impl<S: DataSource> CompoundFile<S> {
    /// Write all pending changes to the data source
    pub fn flush(&mut self) -> Result<()> {
        self.write_mini_store()?;
        self.write_directory()?;
        self.write_allocation_tables()?;

        let header = self.header.to_bytes();
        self.source.write(0, &header)?;

        let len = (self.high_water_sector() as u64 + 1) * self.sector_bytes() as u64;
        self.source.set_len(len)?;

        log::debug!(
            "Flushed compound file: {} bytes, {} BAT blocks, {} XBAT blocks, {} directory entries",
            len,
            self.header.bat_count(),
            self.header.xbat_count(),
            self.properties.len()
        );
        Ok(())
    }

    /// Store the mini stream in the root entry's chain and rewrite the SBAT.
    ///
    /// Skipped when the mini stream was never loaded, since neither can have
    /// changed then.
    fn write_mini_store(&mut self) -> Result<()> {
        let Some(mut mini_stream) = self.mini_stream.take() else {
            return Ok(());
        };

        mini_stream.resize(self.mini_high_water() * SMALL_BLOCK_SIZE, 0);
        while self
            .sbat_blocks
            .last()
            .is_some_and(|sbat| sbat.occupied_size() == 0)
        {
            self.sbat_blocks.pop();
        }

        let root = self.properties.root();
        let root_start = self
            .properties
            .get(root)
            .map_or(END_OF_CHAIN, |p| p.start_block());
        let start = self.update_chain(root_start, &mini_stream)?;
        if let Some(property) = self.properties.get_mut(root) {
            property.set_start_block(start);
            property.set_size(mini_stream.len() as u64);
        }
        self.mini_stream = Some(mini_stream);

        let sbat_data: Vec<u8> = self.sbat_blocks.iter().flat_map(|b| b.to_bytes()).collect();
        let sbat_start = self.update_chain(self.header.sbat_start(), &sbat_data)?;
        self.header.set_sbat_start(sbat_start);
        self.header.set_sbat_count(self.sbat_blocks.len() as u32);
        Ok(())
    }

    fn write_directory(&mut self) -> Result<()> {
        let data = self.properties.to_bytes();
        let start = self.update_chain(self.header.property_start(), &data)?;
        self.header.set_property_start(start);
        self.header
            .set_property_sector_count(data.len().div_ceil(self.sector_bytes()) as u32);
        Ok(())
    }

    /// Regenerate the XBAT contents and header BAT array from the sectors
    /// the BAT blocks live in, then write every BAT and XBAT block.
    fn write_allocation_tables(&mut self) -> Result<()> {
        let bat_sectors = self
            .bat_blocks
            .iter()
            .map(|bat| {
                bat.our_block_index()
                    .ok_or_else(|| CfbError::Corrupted("BAT block has no sector".to_string()))
            })
            .collect::<Result<Vec<u32>>>()?;

        self.header.set_bat_count(bat_sectors.len() as u32);
        self.header.set_bat_array(&bat_sectors);

        let overflow = bat_sectors.get(HEADER_BAT_SLOTS..).unwrap_or_default();
        let per_xbat = self.header.big_block_size().xbat_entries_per_block();
        if overflow.len().div_ceil(per_xbat) > self.xbat_blocks.len() {
            return Err(CfbError::Corrupted(format!(
                "{} BAT blocks need more than {} XBAT blocks",
                bat_sectors.len(),
                self.xbat_blocks.len()
            )));
        }

        let mut pointers = overflow.iter().copied();
        let next_sectors: Vec<u32> = self
            .xbat_blocks
            .iter()
            .skip(1)
            .map(|x| x.our_block_index().unwrap_or(END_OF_CHAIN))
            .chain(std::iter::once(END_OF_CHAIN))
            .collect();
        for (xbat, next) in self.xbat_blocks.iter_mut().zip(next_sectors) {
            for i in 0..xbat.entry_count() {
                xbat.set_value_at(i, pointers.next().unwrap_or(UNUSED_BLOCK));
            }
            xbat.set_next_xbat(next);
        }

        self.header.set_xbat_count(self.xbat_blocks.len() as u32);
        self.header.set_xbat_start(
            self.xbat_blocks
                .first()
                .and_then(|x| x.our_block_index())
                .unwrap_or(END_OF_CHAIN),
        );

        let writes: Vec<(u32, Vec<u8>)> = self
            .bat_blocks
            .iter()
            .chain(&self.xbat_blocks)
            .filter_map(|block| block.our_block_index().map(|s| (s, block.to_bytes())))
            .collect();
        for (sector, data) in writes {
            self.write_sector(sector, &data)?;
        }
        Ok(())
    }

    /// Flush, then copy the complete file to `out`
    pub fn write_to<W: Write>(&mut self, out: &mut W) -> Result<()> {
        self.flush()?;
        self.source.copy_to(out)?;
        Ok(())
    }

    /// Flush, then write the complete file to `path`
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        out.flush()?;
        Ok(())
    }

    /// Flush and hand back the data source
    pub fn into_source(mut self) -> Result<S> {
        self.flush()?;
        Ok(self.source)
    }
}

impl CompoundFile<ByteArrayDataSource> {
    /// Flush and return the file's bytes
    pub fn into_bytes(self) -> Result<Bytes> {
        Ok(self.into_source()?.into_bytes())
    }
}
