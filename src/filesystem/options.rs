//! Options for opening existing compound files

use super::CompoundFile;
use super::data_source::{ByteArrayDataSource, DataSource, FileBackedDataSource};
use crate::error::Result;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Controls how strictly an existing container is validated while opening.
///
/// ```no_run
/// use litchi_cfb::OpenOptions;
///
/// let data = std::fs::read("Book1.xls")?;
/// let cfb = OpenOptions::new().strict_file_size(true).open_bytes(data)?;
/// # Ok::<(), litchi_cfb::CfbError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    detect_chain_loops: bool,
    strict_file_size: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            detect_chain_loops: true,
            strict_file_size: false,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail when a sector chain visits the same sector twice (default: on).
    ///
    /// Off, chains are only bounded by the number of addressable sectors.
    pub fn detect_chain_loops(&mut self, enabled: bool) -> &mut Self {
        self.detect_chain_loops = enabled;
        self
    }

    /// Reject files longer than their allocation table can address
    /// (default: off, which only logs a warning).
    pub fn strict_file_size(&mut self, enabled: bool) -> &mut Self {
        self.strict_file_size = enabled;
        self
    }

    pub fn detects_chain_loops(&self) -> bool {
        self.detect_chain_loops
    }

    pub fn is_strict_file_size(&self) -> bool {
        self.strict_file_size
    }

    /// Open a container held in memory
    pub fn open_bytes(&self, data: impl Into<Vec<u8>>) -> Result<CompoundFile> {
        self.open_source(ByteArrayDataSource::from(data.into()))
    }

    /// Read the whole of `reader` into memory and open it
    pub fn open_reader<R: Read>(&self, mut reader: R) -> Result<CompoundFile> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.open_bytes(data)
    }

    /// Open a container backed by `file`; changes are written back on flush
    pub fn open_file(&self, file: File) -> Result<CompoundFile<FileBackedDataSource>> {
        self.open_source(FileBackedDataSource::new(file))
    }

    /// Open the file at `path` for reading and writing
    pub fn open_path<P: AsRef<Path>>(&self, path: P) -> Result<CompoundFile<FileBackedDataSource>> {
        let file = File::options().read(true).write(true).open(path)?;
        self.open_file(file)
    }

    /// Open a container over any data source
    pub fn open_source<S: DataSource>(&self, source: S) -> Result<CompoundFile<S>> {
        CompoundFile::open_with(source, *self)
    }
}
