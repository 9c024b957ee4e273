//! The compound file: opening, path lookup and stream editing
//!
//! Loading follows the header's pointers: BAT blocks (from the header slots
//! and the XBAT chain), then the directory chain, then the SBAT chain.
//! Sector allocation lives in `allocation`, serialization in `persist`.

use super::data_source::{ByteArrayDataSource, DataSource};
use super::entry::EntryInfo;
use super::loop_detector::ChainLoopDetector;
use super::options::OpenOptions;
use crate::consts::*;
use crate::error::{CfbError, Result};
use crate::property::{ClassId, EntryName, Property, PropertyId, PropertyTable, PropertyType};
use crate::storage::{BatBlock, BigBlockSize, HeaderBlock, calculate_maximum_size};
use chrono::{DateTime, Utc};

/// An OLE2 compound file
///
/// Holds the header, the flattened BAT list, the XBAT and SBAT blocks and
/// the directory tree in memory. Stream contents stay in the data source and
/// are read on demand; the mini stream is loaded the first time a small
/// stream is touched.
///
/// Paths are slices of entry names from the root down, e.g.
/// `&["_VBA_PROJECT_CUR", "VBA", "dir"]`. Name lookup ignores case.
///
/// # Example
///
/// ```
/// use litchi_cfb::CompoundFile;
///
/// let mut cfb = CompoundFile::new();
/// cfb.write_stream(&["Workbook"], b"BIFF data")?;
/// let bytes = cfb.into_bytes()?;
///
/// let mut reopened = CompoundFile::open(bytes.to_vec())?;
/// assert_eq!(reopened.open_stream(&["Workbook"])?, b"BIFF data");
/// # Ok::<(), litchi_cfb::CfbError>(())
/// ```
#[derive(Debug)]
pub struct CompoundFile<S = ByteArrayDataSource> {
    pub(super) source: S,
    pub(super) options: OpenOptions,
    pub(super) header: HeaderBlock,
    /// BAT blocks in logical order (header pointers, then XBAT pointers)
    pub(super) bat_blocks: Vec<BatBlock>,
    /// No BAT block before this one has a free entry
    pub(super) free_hint: usize,
    pub(super) xbat_blocks: Vec<BatBlock>,
    pub(super) sbat_blocks: Vec<BatBlock>,
    /// Contents of the root entry's stream, once loaded
    pub(super) mini_stream: Option<Vec<u8>>,
    pub(super) properties: PropertyTable,
}

impl CompoundFile<ByteArrayDataSource> {
    /// Create an empty in-memory container with 512-byte sectors
    pub fn new() -> Self {
        Self::with_block_size(BigBlockSize::SMALLER)
    }

    /// Create an empty in-memory container with the given sector size
    pub fn with_block_size(block_size: BigBlockSize) -> Self {
        Self::create_in(ByteArrayDataSource::new(), block_size)
    }

    /// Open a container held in memory with default options
    pub fn open(data: impl Into<Vec<u8>>) -> Result<Self> {
        OpenOptions::new().open_bytes(data)
    }
}

impl Default for CompoundFile<ByteArrayDataSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DataSource> CompoundFile<S> {
    /// Create an empty container that will be written to `source`.
    ///
    /// Nothing is written until [`flush`](Self::flush).
    pub fn create_in(source: S, block_size: BigBlockSize) -> Self {
        Self {
            source,
            options: OpenOptions::default(),
            header: HeaderBlock::new(block_size),
            bat_blocks: Vec::new(),
            free_hint: 0,
            xbat_blocks: Vec::new(),
            sbat_blocks: Vec::new(),
            mini_stream: None,
            properties: PropertyTable::new(block_size),
        }
    }

    pub(super) fn open_with(mut source: S, options: OpenOptions) -> Result<Self> {
        let file_size = source.size()?;
        if file_size == 0 {
            return Err(CfbError::NotCompoundFile);
        }
        let head = source.read(0, file_size.min(HEADER_SIZE as u64) as usize)?;
        let header = HeaderBlock::parse(&head)?;
        let block_size = header.big_block_size();

        let max_size = calculate_maximum_size(block_size, header.bat_count() as usize);
        if file_size > max_size {
            if options.is_strict_file_size() {
                return Err(CfbError::Corrupted(format!(
                    "File is {} bytes but {} BAT blocks address at most {}",
                    file_size,
                    header.bat_count(),
                    max_size
                )));
            }
            log::warn!(
                "File is {} bytes but {} BAT blocks address at most {}; trailing data ignored",
                file_size,
                header.bat_count(),
                max_size
            );
        }

        log::debug!(
            "Opening compound file: {}-byte sectors, {} BAT blocks, {} XBAT blocks, directory at sector {}",
            block_size.sector_bytes(),
            header.bat_count(),
            header.xbat_count(),
            header.property_start()
        );

        let mut cfb = Self {
            source,
            options,
            header,
            bat_blocks: Vec::new(),
            free_hint: 0,
            xbat_blocks: Vec::new(),
            sbat_blocks: Vec::new(),
            mini_stream: None,
            properties: PropertyTable::new(block_size),
        };

        cfb.load_bat_blocks()?;
        let directory = cfb.read_chain(cfb.header.property_start())?;
        cfb.properties = PropertyTable::load(&directory, block_size)?;
        cfb.load_sbat_blocks()?;

        Ok(cfb)
    }

    /// Collect the BAT sector pointers from the header and the XBAT chain,
    /// then load every BAT block.
    fn load_bat_blocks(&mut self) -> Result<()> {
        let block_size = self.header.big_block_size();
        let bat_count = self.header.bat_count() as usize;
        let mut bat_sectors: Vec<u32> = self.header.bat_array().to_vec();

        // Sectors present in the file, counting a short final one
        let sector_bytes = block_size.sector_bytes() as u64;
        let file_sectors = self
            .source
            .size()?
            .saturating_sub(sector_bytes)
            .div_ceil(sector_bytes) as usize;

        let mut detector = ChainLoopDetector::new(file_sectors);
        let mut xbat_sector = self.header.xbat_start();
        for loaded in 0..self.header.xbat_count() {
            if xbat_sector > MAXREGSECT {
                return Err(CfbError::Corrupted(format!(
                    "XBAT chain ends after {} of {} blocks",
                    loaded,
                    self.header.xbat_count()
                )));
            }
            if xbat_sector as usize >= file_sectors {
                return Err(CfbError::Corrupted(format!(
                    "XBAT block stored at sector {} but the file holds {} sectors",
                    xbat_sector, file_sectors
                )));
            }
            if self.options.detects_chain_loops() {
                detector.claim(xbat_sector)?;
            }

            let data = self.read_sector(xbat_sector)?;
            let mut xbat = BatBlock::create_xbat_block(block_size, &data)?;
            xbat.set_our_block_index(xbat_sector);

            let wanted = bat_count.saturating_sub(bat_sectors.len());
            let take = wanted.min(xbat.entry_count());
            bat_sectors.extend((0..take).map(|i| xbat.value_at(i)));

            xbat_sector = xbat.next_xbat();
            self.xbat_blocks.push(xbat);
        }

        if bat_sectors.len() < bat_count {
            return Err(CfbError::Corrupted(format!(
                "Header declares {} BAT blocks but only {} are listed",
                bat_count,
                bat_sectors.len()
            )));
        }

        for sector in bat_sectors {
            if sector > MAXREGSECT || sector as usize >= file_sectors {
                return Err(CfbError::Corrupted(format!(
                    "BAT block stored at invalid sector 0x{:X}",
                    sector
                )));
            }
            let data = self.read_sector(sector)?;
            let mut bat = BatBlock::create_bat_block(block_size, &data)?;
            bat.set_our_block_index(sector);
            self.bat_blocks.push(bat);
        }
        Ok(())
    }

    fn load_sbat_blocks(&mut self) -> Result<()> {
        let start = self.header.sbat_start();
        if start == END_OF_CHAIN {
            return Ok(());
        }

        let chain = self.chain(start)?;
        if chain.len() != self.header.sbat_count() as usize {
            log::warn!(
                "Header declares {} SBAT blocks, chain has {}",
                self.header.sbat_count(),
                chain.len()
            );
        }
        for sector in chain {
            let data = self.read_sector(sector)?;
            let sbat = BatBlock::create_bat_block(self.header.big_block_size(), &data)?;
            self.sbat_blocks.push(sbat);
        }
        self.header.set_sbat_count(self.sbat_blocks.len() as u32);
        Ok(())
    }

    pub fn header(&self) -> &HeaderBlock {
        &self.header
    }

    pub fn big_block_size(&self) -> BigBlockSize {
        self.header.big_block_size()
    }

    /// BAT blocks in logical order
    pub fn bat_blocks(&self) -> &[BatBlock] {
        &self.bat_blocks
    }

    pub fn xbat_blocks(&self) -> &[BatBlock] {
        &self.xbat_blocks
    }

    pub fn properties(&self) -> &PropertyTable {
        &self.properties
    }

    pub fn options(&self) -> OpenOptions {
        self.options
    }

    // Tree navigation

    fn resolve(&self, path: &[&str]) -> Result<PropertyId> {
        let mut id = self.properties.root();
        for (depth, name) in path.iter().enumerate() {
            id = self
                .properties
                .find_child(id, name)
                .ok_or_else(|| CfbError::NotFound(path[..=depth].join("/")))?;
        }
        Ok(id)
    }

    fn path_of(&self, id: PropertyId) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = id;
        while let Some(parent) = self.properties.parent(current) {
            if let Some(property) = self.properties.get(current) {
                path.push(property.name().to_string());
            }
            current = parent;
        }
        path.reverse();
        path
    }

    fn info(&self, id: PropertyId) -> Option<EntryInfo> {
        self.properties
            .get(id)
            .map(|p| EntryInfo::from_property(p, self.path_of(id)))
    }

    fn property(&self, id: PropertyId) -> Result<&Property> {
        self.properties
            .get(id)
            .ok_or_else(|| CfbError::NotFound(format!("{:?}", id)))
    }

    fn property_mut(&mut self, id: PropertyId) -> Result<&mut Property> {
        self.properties
            .get_mut(id)
            .ok_or_else(|| CfbError::NotFound(format!("{:?}", id)))
    }

    /// Describe the entry at `path` (the root for an empty path)
    pub fn entry(&self, path: &[&str]) -> Result<EntryInfo> {
        let id = self.resolve(path)?;
        self.info(id)
            .ok_or_else(|| CfbError::NotFound(path.join("/")))
    }

    pub fn root_entry(&self) -> Result<EntryInfo> {
        self.entry(&[])
    }

    pub fn exists(&self, path: &[&str]) -> bool {
        self.resolve(path).is_ok()
    }

    /// Direct children of the storage at `path`, in directory order
    pub fn list_entries(&self, path: &[&str]) -> Result<Vec<EntryInfo>> {
        let id = self.resolve(path)?;
        if !self.property(id)?.is_directory() {
            return Err(CfbError::InvalidArgument(format!(
                "'{}' is a stream, not a storage",
                path.join("/")
            )));
        }
        Ok(self
            .properties
            .children(id)
            .filter_map(|child| self.info(child))
            .collect())
    }

    /// Paths of every stream in the container
    pub fn list_streams(&self) -> Vec<Vec<String>> {
        self.walk()
            .into_iter()
            .filter(EntryInfo::is_stream)
            .map(|entry| entry.path)
            .collect()
    }

    /// Every entry below the root, depth-first in directory order
    pub fn walk(&self) -> Vec<EntryInfo> {
        let mut entries = Vec::new();
        let mut stack: Vec<PropertyId> = self
            .properties
            .children(self.properties.root())
            .collect();
        stack.reverse();

        while let Some(id) = stack.pop() {
            if let Some(info) = self.info(id) {
                entries.push(info);
            }
            let mut children: Vec<PropertyId> = self.properties.children(id).collect();
            children.reverse();
            stack.extend(children);
        }
        entries
    }

    // Streams

    /// Read the stream at `path`
    pub fn open_stream(&mut self, path: &[&str]) -> Result<Vec<u8>> {
        let id = self.resolve(path)?;
        let property = self.property(id)?;
        if property.property_type() != PropertyType::Document {
            return Err(CfbError::InvalidArgument(format!(
                "'{}' is a storage, not a stream",
                path.join("/")
            )));
        }

        let (start, size) = (property.chain_start(), property.size());
        if size == 0 {
            return Ok(Vec::new());
        }
        if property.should_use_small_blocks() {
            self.read_mini_stream(start, size)
        } else {
            self.read_big_stream(start, size)
        }
    }

    /// Create or replace the stream at `path`, creating missing parent
    /// storages on the way.
    pub fn write_stream(&mut self, path: &[&str], data: &[u8]) -> Result<()> {
        let Some((name, parents)) = path.split_last() else {
            return Err(CfbError::InvalidArgument(
                "A stream path needs at least one name".to_string(),
            ));
        };
        if self.big_block_size() == BigBlockSize::SMALLER && data.len() as u64 > u32::MAX as u64 {
            return Err(CfbError::OutOfRange(format!(
                "{} bytes do not fit in a stream with 512-byte sectors",
                data.len()
            )));
        }

        let parent = self.ensure_storages(parents)?;
        let id = match self.properties.find_child(parent, name) {
            Some(id) => {
                if self.property(id)?.is_directory() {
                    return Err(CfbError::InvalidArgument(format!(
                        "'{}' is a storage, not a stream",
                        path.join("/")
                    )));
                }
                id
            },
            None => self
                .properties
                .add_child(parent, Property::document(EntryName::new(name)?, 0))?,
        };

        let property = self.property(id)?;
        let (old_start, old_mini) = (property.chain_start(), property.should_use_small_blocks());
        let new_mini = (data.len() as u64) < BIG_BLOCK_MINIMUM_DOCUMENT_SIZE;

        let start = match (old_mini, new_mini) {
            (true, true) => self.update_mini_chain(old_start, data)?,
            (false, false) => self.update_chain(old_start, data)?,
            (true, false) => {
                self.free_mini_chain(old_start)?;
                self.update_chain(END_OF_CHAIN, data)?
            },
            (false, true) => {
                self.free_chain(old_start)?;
                self.update_mini_chain(END_OF_CHAIN, data)?
            },
        };

        let property = self.property_mut(id)?;
        property.set_start_block(start);
        property.set_size(data.len() as u64);
        log::debug!("Wrote {} bytes to '{}'", data.len(), path.join("/"));
        Ok(())
    }

    /// Walk `path`, creating storages that do not exist yet
    fn ensure_storages(&mut self, path: &[&str]) -> Result<PropertyId> {
        let mut id = self.properties.root();
        for name in path {
            id = match self.properties.find_child(id, name) {
                Some(child)
                    if self
                        .properties
                        .get(child)
                        .is_some_and(Property::is_directory) =>
                {
                    child
                },
                Some(_) => {
                    return Err(CfbError::InvalidArgument(format!(
                        "'{}' is a stream, not a storage",
                        name
                    )));
                },
                None => self
                    .properties
                    .add_child(id, Property::directory(EntryName::new(name)?))?,
            };
        }
        Ok(id)
    }

    /// Create an empty storage at `path`; its parent must exist
    pub fn create_storage(&mut self, path: &[&str]) -> Result<()> {
        let Some((name, parents)) = path.split_last() else {
            return Err(CfbError::InvalidArgument(
                "The root storage already exists".to_string(),
            ));
        };
        let parent = self.resolve(parents)?;
        if !self.property(parent)?.is_directory() {
            return Err(CfbError::InvalidArgument(format!(
                "'{}' is a stream, not a storage",
                parents.join("/")
            )));
        }
        self.properties
            .add_child(parent, Property::directory(EntryName::new(name)?))?;
        Ok(())
    }

    /// Delete the entry at `path`, including everything stored below it
    pub fn delete(&mut self, path: &[&str]) -> Result<()> {
        if path.is_empty() {
            return Err(CfbError::InvalidArgument(
                "The root entry cannot be deleted".to_string(),
            ));
        }
        let id = self.resolve(path)?;
        let parent = self
            .properties
            .parent(id)
            .ok_or_else(|| CfbError::NotFound(path.join("/")))?;

        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let property = self.property(current)?;
            if property.property_type() == PropertyType::Document {
                let start = property.chain_start();
                if start == END_OF_CHAIN {
                    continue;
                }
                if property.should_use_small_blocks() {
                    self.free_mini_chain(start)?;
                } else {
                    self.free_chain(start)?;
                }
            } else {
                pending.extend(self.properties.children(current));
            }
        }

        self.properties.delete_child(parent, id);
        log::debug!("Deleted '{}'", path.join("/"));
        Ok(())
    }

    /// Rename the entry at `path`.
    ///
    /// Returns `Ok(false)` when a sibling already has `new_name`.
    pub fn rename(&mut self, path: &[&str], new_name: &str) -> Result<bool> {
        if path.is_empty() {
            return Err(CfbError::InvalidArgument(
                "The root entry cannot be renamed".to_string(),
            ));
        }
        let name = EntryName::new(new_name)?;
        let id = self.resolve(path)?;
        self.properties.change_name(id, name)
    }

    /// Set the class id of the storage (or root) at `path`
    pub fn set_storage_clsid(&mut self, path: &[&str], clsid: ClassId) -> Result<()> {
        let id = self.resolve(path)?;
        let property = self.property_mut(id)?;
        if !property.is_directory() {
            return Err(CfbError::InvalidArgument(format!(
                "'{}' is a stream; only storages carry a class id",
                path.join("/")
            )));
        }
        property.set_clsid(clsid);
        Ok(())
    }

    /// Set the state bits of the entry at `path`
    pub fn set_state_bits(&mut self, path: &[&str], bits: u32) -> Result<()> {
        let id = self.resolve(path)?;
        self.property_mut(id)?.set_user_flags(bits);
        Ok(())
    }

    /// Set the creation and modification times of the entry at `path`
    pub fn set_times(
        &mut self,
        path: &[&str],
        created: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let id = self.resolve(path)?;
        let property = self.property_mut(id)?;
        property.set_created(created);
        property.set_modified(modified);
        Ok(())
    }
}
