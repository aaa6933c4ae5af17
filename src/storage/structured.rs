//! Structured file I/O for binary data serialization.
//!
//! Values are written little-endian. Both sides keep a running CRC32 over
//! every byte they pass through, and the writer appends that checksum as a
//! trailing `u32` so readers can detect torn or corrupted files.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{Result, SegforgeError};
use crate::storage::{StorageInput, StorageOutput};

/// A structured file writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 4;
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 8;
        Ok(())
    }

    /// Write raw bytes with a u32 length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        let length = u32::try_from(value.len())
            .map_err(|_| SegforgeError::serialization("Block larger than 4GiB"))?;
        self.write_u32(length)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.hasher.update(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get the checksum of everything written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Append the checksum, flush, sync and close the writer.
    ///
    /// Returns the total number of bytes written, checksum included.
    pub fn close(mut self) -> Result<u64> {
        let checksum = self.checksum();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(self.position + 4)
    }
}

/// A structured file reader for binary data.
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: Hasher,
    position: u64,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured file reader.
    pub fn new(reader: R) -> Result<Self> {
        let file_size = reader.size()?;
        Ok(StructReader {
            reader,
            hasher: Hasher::new(),
            position: 0,
            file_size,
        })
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<LittleEndian>()?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 4;
        Ok(value)
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let value = self.reader.read_u64::<LittleEndian>()?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 8;
        Ok(value)
    }

    /// Read bytes with a u32 length prefix.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_u32()? as u64;
        if self.position + length > self.file_size.saturating_sub(4) {
            return Err(SegforgeError::corrupted(format!(
                "Length prefix {length} at offset {} runs past end of file",
                self.position
            )));
        }
        self.read_raw(length as usize)
    }

    /// Read exact number of raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; length];
        self.reader.read_exact(&mut bytes)?;
        self.hasher.update(&bytes);
        self.position += length as u64;
        Ok(bytes)
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the trailing checksum and compare it to everything read so far.
    pub fn verify_checksum(&mut self) -> Result<bool> {
        if self.position + 4 != self.file_size {
            return Err(SegforgeError::corrupted(format!(
                "Expected checksum at offset {}, file is {} bytes",
                self.position, self.file_size
            )));
        }

        let stored = self.reader.read_u32::<LittleEndian>()?;
        Ok(stored == self.hasher.clone().finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};

    #[test]
    fn test_struct_writer_reader() {
        let storage = MemoryStorage::new_default();

        let output = storage.create_output("test.bin").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_u32(0xDEADBEEF).unwrap();
        writer.write_u64(1 << 40).unwrap();
        writer.write_bytes(b"segment").unwrap();
        writer.write_bytes(&[1, 2, 3]).unwrap();
        let written = writer.close().unwrap();

        assert_eq!(storage.file_size("test.bin").unwrap(), written);

        let input = storage.open_input("test.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_u64().unwrap(), 1 << 40);
        assert_eq!(reader.read_bytes().unwrap(), b"segment".to_vec());
        assert_eq!(reader.read_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(reader.position() + 4, written);
        assert!(reader.verify_checksum().unwrap());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let storage = MemoryStorage::new_default();

        let output = storage.create_output("test.bin").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_u64(1).unwrap();
        writer.write_u64(2).unwrap();
        writer.close().unwrap();

        // Rewrite the file with the second value flipped but the old checksum.
        let mut input = storage.open_input("test.bin").unwrap();
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut input, &mut bytes).unwrap();
        bytes[8] ^= 0xFF;
        let mut output = storage.create_output("test.bin").unwrap();
        std::io::Write::write_all(&mut output, &bytes).unwrap();
        output.close().unwrap();

        let input = storage.open_input("test.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        reader.read_u64().unwrap();
        reader.read_u64().unwrap();
        assert!(!reader.verify_checksum().unwrap());
    }

    #[test]
    fn test_length_prefix_past_end() {
        let storage = MemoryStorage::new_default();

        let output = storage.create_output("test.bin").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_u32(1000).unwrap();
        writer.close().unwrap();

        let input = storage.open_input("test.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        assert!(matches!(
            reader.read_bytes(),
            Err(SegforgeError::Corrupted(_))
        ));
    }
}
