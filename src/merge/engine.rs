//! Merge engine combining several segments into one.
//!
//! A merge reads every source, checks that every source document was read
//! exactly once, writes the union as a new segment and swaps it for the sources
//! in a single catalog update. Any failure leaves the live set untouched and
//! removes the partially produced segment.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::document::Document;
use crate::error::{Result, SegforgeError};
use crate::merge::policy::MergeCandidate;
use crate::segment::{SegmentCatalog, SegmentId, SegmentMeta};

/// Configuration for merge operations.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Check document conservation before publishing a merge.
    pub verify_conservation: bool,

    /// Order documents of the merged segment by key.
    pub sort_by_key: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            verify_conservation: true,
            sort_by_key: false,
        }
    }
}

/// Statistics about a merge operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeStats {
    /// Number of segments merged.
    pub segments_merged: usize,

    /// Number of documents carried into the merged segment.
    pub docs_merged: u64,

    /// Size of the sources (in bytes).
    pub size_before: u64,

    /// Size of the merged segment (in bytes).
    pub size_after: u64,

    /// Time taken for the merge.
    pub elapsed: Duration,
}

/// Result of a merge operation.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The merged segment, now live.
    pub merged: SegmentMeta,

    /// Segments it replaced.
    pub sources: Vec<SegmentId>,

    /// Statistics about the merge operation.
    pub stats: MergeStats,
}

/// Core merge engine.
#[derive(Debug, Default)]
pub struct MergeEngine {
    config: MergeConfig,
}

impl MergeEngine {
    /// Create a new merge engine.
    pub fn new(config: MergeConfig) -> Self {
        MergeEngine { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge the segments named by `candidate` and publish the result.
    pub fn merge(&self, catalog: &SegmentCatalog, candidate: &MergeCandidate) -> Result<MergeResult> {
        let start = Instant::now();

        if candidate.len() < 2 {
            return Err(SegforgeError::merge_failure(format!(
                "a merge needs at least two sources, got {}",
                candidate.len()
            )));
        }

        let snapshot = catalog.snapshot();
        let mut sources: Vec<Arc<SegmentMeta>> = Vec::with_capacity(candidate.len());
        for id in &candidate.segments {
            let meta = snapshot.get(id).ok_or_else(|| {
                SegforgeError::merge_failure(format!("source segment {id} is not live"))
            })?;
            sources.push(Arc::clone(meta));
        }
        sources.sort_by_key(|m| m.sequence);

        let store = catalog.store();
        let expected: u64 = sources.iter().map(|m| m.doc_count).sum();
        let mut documents: Vec<Document> = Vec::with_capacity(expected as usize);
        for meta in &sources {
            let docs = store.read_segment(meta).map_err(|e| {
                SegforgeError::merge_failure(format!("failed to read segment {}: {e}", meta.id))
            })?;
            documents.extend(docs);
        }

        if self.config.verify_conservation {
            verify_conservation(&documents, expected)?;
        }
        if self.config.sort_by_key {
            documents.sort_by_key(|d| d.key());
        }

        let merged = store.write_segment(&documents).map_err(|e| {
            SegforgeError::merge_failure(format!("failed to write merged segment: {e}"))
        })?;
        drop(documents);

        let source_ids: Vec<SegmentId> = sources.iter().map(|m| m.id).collect();
        if let Err(e) = catalog.replace(&source_ids, merged.clone()) {
            if let Err(cleanup) = store.delete_segment(&merged) {
                warn!("failed to remove unpublished merge output {}: {cleanup}", merged.id);
            }
            return Err(e);
        }

        let stats = MergeStats {
            segments_merged: sources.len(),
            docs_merged: merged.doc_count,
            size_before: sources.iter().map(|m| m.size_bytes).sum(),
            size_after: merged.size_bytes,
            elapsed: start.elapsed(),
        };

        debug!(
            "merged {} segments ({} docs) into {} in {:?}",
            stats.segments_merged, stats.docs_merged, merged.id, stats.elapsed
        );

        Ok(MergeResult {
            merged,
            sources: source_ids,
            stats,
        })
    }
}

/// Row keys are not unique across segments: a key re-indexed by a later
/// statement lives on as a second document, so only counts are compared.
fn verify_conservation(documents: &[Document], expected: u64) -> Result<()> {
    if documents.len() as u64 != expected {
        return Err(SegforgeError::merge_failure(format!(
            "sources hold {} documents but metadata records {expected}",
            documents.len()
        )));
    }
    Ok(())
}
