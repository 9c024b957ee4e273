//! Random-access byte stores a compound file can live in

use crate::error::{CfbError, Result};
use bytes::{Bytes, BytesMut};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Byte storage backing a [`CompoundFile`](super::CompoundFile)
///
/// Offsets are absolute file offsets. Writing past the end grows the store,
/// zero-filling any gap.
pub trait DataSource {
    /// Read `len` bytes starting at `offset`.
    ///
    /// Starting at or past the end is an error. A read that runs past the end
    /// is zero-padded, since some producers truncate the final sector.
    fn read(&mut self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Write `data` at `offset`
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Current size in bytes
    fn size(&mut self) -> Result<u64>;

    /// Shrink or grow the store to exactly `len` bytes
    fn set_len(&mut self, len: u64) -> Result<()>;

    /// Copy the whole store to `out`
    fn copy_to<W: Write>(&mut self, out: &mut W) -> Result<u64>;
}

fn past_end(offset: u64, size: u64) -> CfbError {
    CfbError::Corrupted(format!(
        "Read at offset {} is beyond the end of the file ({} bytes)",
        offset, size
    ))
}

/// In-memory data source
#[derive(Debug, Clone, Default)]
pub struct ByteArrayDataSource {
    buffer: BytesMut,
}

impl ByteArrayDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freeze the buffer into immutable bytes
    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }
}

impl From<Vec<u8>> for ByteArrayDataSource {
    fn from(data: Vec<u8>) -> Self {
        Self {
            buffer: BytesMut::from(&data[..]),
        }
    }
}

impl DataSource for ByteArrayDataSource {
    fn read(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let size = self.buffer.len() as u64;
        if offset >= size {
            return Err(past_end(offset, size));
        }

        let start = offset as usize;
        let end = start.saturating_add(len).min(self.buffer.len());
        let mut data = self.buffer[start..end].to_vec();
        if data.len() < len {
            log::warn!(
                "Short read at offset {}: {} of {} bytes, zero-padding",
                offset,
                data.len(),
                len
            );
            data.resize(len, 0);
        }
        Ok(data)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| CfbError::OutOfRange(format!("Offset {} does not fit in memory", offset)))?;
        let end = start + data.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[start..end].copy_from_slice(data);
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.buffer.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| CfbError::OutOfRange(format!("Length {} does not fit in memory", len)))?;
        self.buffer.resize(len, 0);
        Ok(())
    }

    fn copy_to<W: Write>(&mut self, out: &mut W) -> Result<u64> {
        out.write_all(&self.buffer)?;
        Ok(self.buffer.len() as u64)
    }
}

/// Data source over an open file
///
/// The file must be opened for both reading and writing if the container is
/// going to be flushed.
#[derive(Debug)]
pub struct FileBackedDataSource {
    file: File,
}

impl FileBackedDataSource {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    pub fn into_inner(self) -> File {
        self.file
    }
}

impl DataSource for FileBackedDataSource {
    fn read(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let size = self.size()?;
        if offset >= size {
            return Err(past_end(offset, size));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let available = (size - offset).min(len as u64) as usize;
        let mut data = vec![0u8; len];
        self.file.read_exact(&mut data[..available])?;
        if available < len {
            log::warn!(
                "Short read at offset {}: {} of {} bytes, zero-padding",
                offset,
                available,
                len
            );
        }
        Ok(data)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn copy_to<W: Write>(&mut self, out: &mut W) -> Result<u64> {
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(std::io::copy(&mut self.file, out)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_array_read_write() {
        let mut source = ByteArrayDataSource::new();
        source.write(4, &[1, 2, 3]).unwrap();
        assert_eq!(source.size().unwrap(), 7);
        assert_eq!(source.read(0, 7).unwrap(), vec![0, 0, 0, 0, 1, 2, 3]);

        // Short reads are padded
        assert_eq!(source.read(5, 4).unwrap(), vec![2, 3, 0, 0]);
        assert!(source.read(7, 1).unwrap_err().is_corruption());

        source.set_len(2).unwrap();
        assert_eq!(source.into_bytes().as_ref(), &[0, 0]);
    }

    #[test]
    fn test_file_backed() {
        let file = tempfile::tempfile().unwrap();
        let mut source = FileBackedDataSource::new(file);
        source.write(0, b"compound").unwrap();
        source.write(10, b"!").unwrap();
        assert_eq!(source.size().unwrap(), 11);
        assert_eq!(source.read(8, 4).unwrap(), vec![0, 0, b'!', 0]);

        let mut out = Vec::new();
        assert_eq!(source.copy_to(&mut out).unwrap(), 11);
        assert_eq!(&out[..8], b"compound");

        source.set_len(4).unwrap();
        assert_eq!(source.size().unwrap(), 4);
    }
}
