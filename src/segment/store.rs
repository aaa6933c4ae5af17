//! Reading and writing segment files.
//!
//! Segment file layout (little-endian):
//!
//! | field        | type              |
//! |--------------|-------------------|
//! | magic        | u32 (`SGFG`)      |
//! | version      | u32               |
//! | doc_count    | u64               |
//! | documents    | doc_count × bytes |
//! | checksum     | u32 (CRC32)       |
//!
//! Each document is a u32 length prefix followed by its bincode encoding.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use log::{debug, warn};

use crate::document::Document;
use crate::error::{Result, SegforgeError};
use crate::segment::{SegmentId, SegmentMeta, segment_file_name};
use crate::storage::{Storage, StructReader, StructWriter};

const SEGMENT_MAGIC: u32 = 0x4746_4753; // "SGFG"
const SEGMENT_VERSION: u32 = 1;

/// Writes, reads and deletes segment files on a [`Storage`].
///
/// Also hands out creation sequence numbers, so every segment of an index gets
/// a unique, increasing sequence regardless of which worker wrote it.
#[derive(Debug)]
pub struct SegmentStore {
    storage: Arc<dyn Storage>,
    next_sequence: AtomicU64,
}

impl SegmentStore {
    /// Create a store whose sequence numbers start at 1.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        SegmentStore {
            storage,
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Underlying storage.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Sequence the next segment will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Acquire)
    }

    /// Make sure future sequences are at least `sequence`.
    pub fn advance_sequence_to(&self, sequence: u64) {
        self.next_sequence.fetch_max(sequence, Ordering::AcqRel);
    }

    /// Durably write `documents` as a new segment.
    ///
    /// Any failure is reported as [`SegforgeError::IoFlush`] and the partial
    /// file is removed.
    pub fn write_segment(&self, documents: &[Document]) -> Result<SegmentMeta> {
        let id = SegmentId::new();
        let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel);
        let file_name = segment_file_name(&id);

        match self.write_file(&file_name, documents) {
            Ok(size_bytes) => {
                debug!(
                    "flushed segment {id} (sequence {sequence}, {} docs, {size_bytes} bytes)",
                    documents.len()
                );
                Ok(SegmentMeta {
                    id,
                    doc_count: documents.len() as u64,
                    size_bytes,
                    sequence,
                    created_at: Utc::now(),
                })
            }
            Err(e) => {
                if let Err(cleanup) = self.storage.delete_file(&file_name) {
                    warn!("failed to remove partial segment file {file_name}: {cleanup}");
                }
                Err(SegforgeError::io_flush(format!(
                    "failed to write segment {file_name}: {e}"
                )))
            }
        }
    }

    fn write_file(&self, file_name: &str, documents: &[Document]) -> Result<u64> {
        let output = self.storage.create_output(file_name)?;
        let mut writer = StructWriter::new(output);

        writer.write_u32(SEGMENT_MAGIC)?;
        writer.write_u32(SEGMENT_VERSION)?;
        writer.write_u64(documents.len() as u64)?;
        for doc in documents {
            let encoded = bincode::serialize(doc)?;
            writer.write_bytes(&encoded)?;
        }

        writer.close()
    }

    /// Read every document of a segment, verifying the file checksum.
    pub fn read_segment(&self, meta: &SegmentMeta) -> Result<Vec<Document>> {
        let file_name = meta.file_name();
        let input = self.storage.open_input(&file_name)?;
        let mut reader = StructReader::new(input)?;

        let magic = reader.read_u32()?;
        if magic != SEGMENT_MAGIC {
            return Err(SegforgeError::corrupted(format!(
                "{file_name}: bad magic {magic:#010x}"
            )));
        }

        let version = reader.read_u32()?;
        if version != SEGMENT_VERSION {
            return Err(SegforgeError::corrupted(format!(
                "{file_name}: unsupported version {version}"
            )));
        }

        let doc_count = reader.read_u64()?;
        if doc_count != meta.doc_count {
            return Err(SegforgeError::corrupted(format!(
                "{file_name}: holds {doc_count} documents, catalog expects {}",
                meta.doc_count
            )));
        }

        let mut documents = Vec::with_capacity(doc_count as usize);
        for _ in 0..doc_count {
            let bytes = reader.read_bytes()?;
            documents.push(bincode::deserialize(&bytes)?);
        }

        if !reader.verify_checksum()? {
            return Err(SegforgeError::corrupted(format!(
                "{file_name}: checksum mismatch"
            )));
        }

        Ok(documents)
    }

    /// Delete a segment file.
    pub fn delete_segment(&self, meta: &SegmentMeta) -> Result<()> {
        self.storage.delete_file(&meta.file_name())
    }

    /// Whether the segment file exists.
    pub fn segment_exists(&self, meta: &SegmentMeta) -> bool {
        self.storage.file_exists(&meta.file_name())
    }
}
