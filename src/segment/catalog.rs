//! The versioned live segment set of one index.
//!
//! Readers take cheap [`Arc`] snapshots of the current [`SegmentSet`]; writers
//! build a new set, persist it to the manifest (`meta.json`, replaced through
//! a temp file and rename) and only then publish it. A reader therefore never
//! observes a segment removed without its replacement, nor both at once.
//!
//! Segments replaced by a merge are retired rather than deleted: their files
//! stay on storage until no published snapshot references them any more.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::IndexOptions;
use crate::error::{Result, SegforgeError};
use crate::segment::{SEGMENT_EXTENSION, SegmentId, SegmentMeta, SegmentStore};

/// Name of the index manifest.
pub const MANIFEST_FILE: &str = "meta.json";

const MANIFEST_TMP_FILE: &str = "meta.json.tmp";
const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Immutable snapshot of the live segments, ordered by creation sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentSet {
    generation: u64,
    segments: Vec<Arc<SegmentMeta>>,
}

impl SegmentSet {
    fn new(generation: u64, mut segments: Vec<Arc<SegmentMeta>>) -> Self {
        segments.sort_by_key(|segment| segment.sequence);
        SegmentSet {
            generation,
            segments,
        }
    }

    /// Version number, bumped by every published mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Live segments, oldest first.
    pub fn segments(&self) -> &[Arc<SegmentMeta>] {
        &self.segments
    }

    /// Number of live segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether there are no live segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total documents across all live segments.
    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count).sum()
    }

    /// Total bytes across all live segments.
    pub fn size_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.size_bytes).sum()
    }

    /// Look up a live segment.
    pub fn get(&self, id: &SegmentId) -> Option<&Arc<SegmentMeta>> {
        self.segments.iter().find(|s| s.id == *id)
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &SegmentId) -> bool {
        self.get(id).is_some()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    generation: u64,
    next_sequence: u64,
    options: IndexOptions,
    segments: Vec<SegmentMeta>,
}

/// Owner of an index's segment set, options and manifest.
#[derive(Debug)]
pub struct SegmentCatalog {
    store: Arc<SegmentStore>,
    current: RwLock<Arc<SegmentSet>>,
    options: RwLock<IndexOptions>,
    /// Serializes every mutation so only one writer builds the next version.
    writer: Mutex<()>,
    retired: Mutex<Vec<Arc<SegmentMeta>>>,
}

impl SegmentCatalog {
    /// Create an empty catalog and write its first manifest.
    pub fn create(store: Arc<SegmentStore>, options: IndexOptions) -> Result<Self> {
        if store.storage().file_exists(MANIFEST_FILE) {
            return Err(SegforgeError::storage(format!(
                "an index already exists here ({MANIFEST_FILE} found)"
            )));
        }

        let options = options.resolve()?;
        let catalog = SegmentCatalog {
            store,
            current: RwLock::new(Arc::new(SegmentSet::default())),
            options: RwLock::new(options),
            writer: Mutex::new(()),
            retired: Mutex::new(Vec::new()),
        };

        catalog.write_manifest(&SegmentSet::default(), &options)?;
        Ok(catalog)
    }

    /// Load a catalog from its manifest.
    ///
    /// Segment files that the manifest does not reference are leftovers of an
    /// interrupted job or merge and are deleted.
    pub fn open(store: Arc<SegmentStore>) -> Result<Self> {
        let mut input = store.storage().open_input(MANIFEST_FILE)?;
        let manifest: Manifest = serde_json::from_reader(&mut input)?;

        if manifest.format_version != MANIFEST_FORMAT_VERSION {
            return Err(SegforgeError::corrupted(format!(
                "unsupported manifest version {}",
                manifest.format_version
            )));
        }

        let max_sequence = manifest.segments.iter().map(|s| s.sequence).max();
        store.advance_sequence_to(manifest.next_sequence);
        if let Some(max_sequence) = max_sequence {
            store.advance_sequence_to(max_sequence + 1);
        }

        let segments = manifest.segments.into_iter().map(Arc::new).collect();
        let set = SegmentSet::new(manifest.generation, segments);

        for segment in set.segments() {
            if !store.segment_exists(segment) {
                return Err(SegforgeError::corrupted(format!(
                    "manifest references missing segment {}",
                    segment.file_name()
                )));
            }
        }

        let catalog = SegmentCatalog {
            store,
            current: RwLock::new(Arc::new(set)),
            options: RwLock::new(manifest.options.resolve()?),
            writer: Mutex::new(()),
            retired: Mutex::new(Vec::new()),
        };

        catalog.remove_orphans()?;
        Ok(catalog)
    }

    /// The segment store this catalog writes through.
    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.store
    }

    /// Current live segment set.
    pub fn snapshot(&self) -> Arc<SegmentSet> {
        Arc::clone(&self.current.read())
    }

    /// Current index options.
    pub fn options(&self) -> IndexOptions {
        *self.options.read()
    }

    /// Replace the index options, resolving an unset target segment count.
    pub fn set_options(&self, options: IndexOptions) -> Result<IndexOptions> {
        let options = options.resolve()?;
        let _guard = self.writer.lock();

        let current = self.snapshot();
        self.write_manifest(&current, &options)?;
        *self.options.write() = options;

        info!(
            "index options updated: target_segment_count={}, merge_on_insert={}",
            options.target_segment_count(),
            options.merge_on_insert
        );
        Ok(options)
    }

    /// Atomically append new segments to the live set.
    pub fn append(&self, segments: Vec<SegmentMeta>) -> Result<Arc<SegmentSet>> {
        if segments.is_empty() {
            return Ok(self.snapshot());
        }

        let _guard = self.writer.lock();
        let current = self.snapshot();

        for segment in &segments {
            if current.contains(&segment.id) {
                return Err(SegforgeError::internal(format!(
                    "segment {} is already live",
                    segment.id
                )));
            }
        }

        let added = segments.len();
        let mut next = current.segments().to_vec();
        next.extend(segments.into_iter().map(Arc::new));
        let next = SegmentSet::new(current.generation() + 1, next);

        self.publish(next, added, 0)
    }

    /// Atomically replace `sources` with `merged`.
    ///
    /// Fails with [`SegforgeError::MergeFailure`] and leaves the set unchanged
    /// if any source is no longer live or listed twice.
    pub fn replace(&self, sources: &[SegmentId], merged: SegmentMeta) -> Result<Arc<SegmentSet>> {
        let _guard = self.writer.lock();
        let current = self.snapshot();

        let source_ids: HashSet<SegmentId> = sources.iter().copied().collect();
        if source_ids.len() != sources.len() {
            return Err(SegforgeError::merge_failure(
                "merge sources contain duplicates",
            ));
        }
        if let Some(missing) = sources.iter().find(|id| !current.contains(id)) {
            return Err(SegforgeError::merge_failure(format!(
                "source segment {missing} is no longer live"
            )));
        }
        if current.contains(&merged.id) {
            return Err(SegforgeError::merge_failure(format!(
                "merged segment {} is already live",
                merged.id
            )));
        }

        let (removed, mut kept): (Vec<_>, Vec<_>) = current
            .segments()
            .iter()
            .cloned()
            .partition(|segment| source_ids.contains(&segment.id));
        kept.push(Arc::new(merged));

        let next = SegmentSet::new(current.generation() + 1, kept);
        let published = self.publish(next, 1, removed.len())?;

        self.retired.lock().extend(removed);
        Ok(published)
    }

    fn publish(&self, next: SegmentSet, added: usize, removed: usize) -> Result<Arc<SegmentSet>> {
        let options = self.options();
        self.write_manifest(&next, &options)?;

        let next = Arc::new(next);
        *self.current.write() = Arc::clone(&next);

        debug!(
            "published segment set generation {} (+{added} -{removed}, {} live)",
            next.generation(),
            next.len()
        );
        Ok(next)
    }

    fn write_manifest(&self, set: &SegmentSet, options: &IndexOptions) -> Result<()> {
        let manifest = Manifest {
            format_version: MANIFEST_FORMAT_VERSION,
            generation: set.generation(),
            next_sequence: self.store.next_sequence(),
            options: *options,
            segments: set.segments().iter().map(|s| s.as_ref().clone()).collect(),
        };

        let storage = self.store.storage();
        let bytes = serde_json::to_vec_pretty(&manifest)?;

        let mut output = storage.create_output(MANIFEST_TMP_FILE)?;
        output.write_all(&bytes)?;
        output.close()?;

        storage.rename_file(MANIFEST_TMP_FILE, MANIFEST_FILE)?;
        storage.sync()
    }

    /// Number of retired segments still waiting for deletion.
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    /// Delete the files of retired segments no snapshot references any more.
    ///
    /// Returns the number of files deleted.
    pub fn garbage_collect(&self) -> Result<usize> {
        let mut retired = self.retired.lock();
        let mut still_referenced = Vec::new();
        let mut deleted = 0;

        for segment in retired.drain(..) {
            if Arc::strong_count(&segment) > 1 {
                still_referenced.push(segment);
                continue;
            }

            match self.store.delete_segment(&segment) {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!("failed to delete retired segment {}: {e}", segment.id);
                    still_referenced.push(segment);
                }
            }
        }

        *retired = still_referenced;
        if deleted > 0 {
            debug!("garbage collected {deleted} retired segment files");
        }
        Ok(deleted)
    }

    fn remove_orphans(&self) -> Result<usize> {
        let live: HashSet<String> = self
            .snapshot()
            .segments()
            .iter()
            .map(|s| s.file_name())
            .collect();

        let storage = self.store.storage();
        let suffix = format!(".{SEGMENT_EXTENSION}");
        let mut removed = 0;

        for name in storage.list_files()? {
            if name.ends_with(&suffix) && !live.contains(&name) {
                storage.delete_file(&name)?;
                removed += 1;
            }
        }
        if storage.file_exists(MANIFEST_TMP_FILE) {
            storage.delete_file(MANIFEST_TMP_FILE)?;
        }

        if removed > 0 {
            info!("removed {removed} orphaned segment files");
        }
        Ok(removed)
    }
}
