//! One worker's unit of work: buffer documents and flush them as segments.

use std::sync::Arc;

use crossbeam_channel::Sender;
use log::{trace, warn};

use crate::document::Document;
use crate::error::{Result, SegforgeError};
use crate::memory::{BudgetStatus, MemoryBudgetTracker};
use crate::progress::WorkerProgress;
use crate::segment::{SegmentMeta, SegmentStore};

/// Statistics of a single segment builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuilderStats {
    /// Documents ingested.
    pub docs_ingested: u64,

    /// Segments flushed.
    pub segments_flushed: u64,

    /// Bytes written to storage.
    pub bytes_flushed: u64,

    /// Highest buffered byte count reached before a flush.
    pub peak_buffered_bytes: usize,
}

/// Accumulates documents and flushes them to immutable segments.
///
/// A builder is owned by exactly one worker thread. Every flushed segment is
/// sent on `output` as soon as its file is durable, so the coordinator knows
/// about it even if a later flush fails.
#[derive(Debug)]
pub struct SegmentBuilder {
    worker_id: usize,
    store: Arc<SegmentStore>,
    tracker: MemoryBudgetTracker,
    buffer: Vec<Document>,
    output: Sender<SegmentMeta>,
    progress: Option<WorkerProgress>,
    stats: BuilderStats,
}

impl SegmentBuilder {
    /// Create a builder flushing whenever `memory_budget_bytes` is reached.
    pub fn new(
        worker_id: usize,
        store: Arc<SegmentStore>,
        memory_budget_bytes: usize,
        output: Sender<SegmentMeta>,
    ) -> Self {
        SegmentBuilder {
            worker_id,
            store,
            tracker: MemoryBudgetTracker::new(memory_budget_bytes),
            buffer: Vec::new(),
            output,
            progress: None,
            stats: BuilderStats::default(),
        }
    }

    /// Count every ingested document on `progress`.
    pub fn with_progress(mut self, progress: WorkerProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Add a document, flushing synchronously if the budget is reached.
    ///
    /// The budget covers each document's heap and the buffer's whole
    /// allocation, spare capacity included.
    pub fn ingest(&mut self, document: Document) -> Result<()> {
        let heap_bytes = document.heap_bytes();
        let capacity_before = self.buffer.capacity();
        self.buffer.push(document);
        let grown = (self.buffer.capacity() - capacity_before) * size_of::<Document>();
        self.stats.docs_ingested += 1;

        if let Some(progress) = &self.progress {
            progress.increment();
        }

        if self.tracker.record(heap_bytes + grown) == BudgetStatus::FlushRequired {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush whatever is buffered, even below budget.
    ///
    /// Returns the final segment, or `None` if nothing was buffered.
    pub fn finish(&mut self) -> Result<Option<SegmentMeta>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        self.flush().map(Some)
    }

    /// Buffered bytes not yet flushed.
    pub fn buffered_bytes(&self) -> usize {
        self.tracker.used_bytes()
    }

    /// Documents buffered but not yet flushed.
    pub fn buffered_docs(&self) -> usize {
        self.buffer.len()
    }

    /// Statistics so far.
    pub fn stats(&self) -> BuilderStats {
        let mut stats = self.stats.clone();
        stats.peak_buffered_bytes = self.tracker.peak_bytes();
        stats
    }

    fn flush(&mut self) -> Result<SegmentMeta> {
        let meta = self.store.write_segment(&self.buffer)?;

        trace!(
            "worker {} flushed {} docs ({} buffered bytes) into segment {}",
            self.worker_id,
            meta.doc_count,
            self.tracker.used_bytes(),
            meta.id
        );

        // Release the allocation too; the tracker starts again from zero.
        self.buffer = Vec::new();
        self.tracker.reset();
        self.stats.segments_flushed += 1;
        self.stats.bytes_flushed += meta.size_bytes;

        if self.output.send(meta.clone()).is_err() {
            // Nobody will ever commit this segment.
            if let Err(e) = self.store.delete_segment(&meta) {
                warn!("failed to remove unclaimed segment {}: {e}", meta.id);
            }
            return Err(SegforgeError::internal(format!(
                "worker {} lost its segment channel",
                self.worker_id
            )));
        }

        Ok(meta)
    }
}
