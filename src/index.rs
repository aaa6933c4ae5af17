//! The index facade.
//!
//! [`SearchIndex`] wires the catalog, the build coordinator, the statement
//! indexer and the merge scheduler together the way the host's control flow
//! drives them: one bulk build at creation, then mutation statements and
//! maintenance passes.

use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;

use crate::config::{IndexOptions, IndexingSettings, WriterResources};
use crate::coordinator::{BuildStats, ParallelBuildCoordinator};
use crate::document::Document;
use crate::error::{Result, SegforgeError};
use crate::maintenance::{self, MaintenanceWorker, VacuumOutcome};
use crate::merge::{MergeOutcome, MergeScheduler};
use crate::progress::{LogProgressSink, ProgressSink};
use crate::segment::catalog::MANIFEST_FILE;
use crate::segment::{SegmentCatalog, SegmentMeta, SegmentSet, SegmentStore};
use crate::source::RowSource;
use crate::statement::{StatementIndexer, StatementOutcome};
use crate::storage::Storage;

/// Result of building a new index.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    /// Statistics of the bulk build.
    pub build: BuildStats,

    /// The merge that closed the build.
    pub merge: MergeOutcome,
}

/// A point-in-time summary of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Generation of the live segment set.
    pub generation: u64,

    /// Live segments.
    pub segments: usize,

    /// Documents across live segments.
    pub documents: u64,

    /// Bytes across live segments.
    pub size_bytes: u64,

    /// Retired segments whose files are not deleted yet.
    pub retired_segments: usize,

    /// Resolved target segment count.
    pub target_segment_count: usize,

    /// Whether statements merge eagerly.
    pub merge_on_insert: bool,
}

/// A segmented full-text index.
#[derive(Debug)]
pub struct SearchIndex {
    catalog: Arc<SegmentCatalog>,
    scheduler: Arc<MergeScheduler>,
    statements: StatementIndexer,
    settings: IndexingSettings,
}

impl SearchIndex {
    /// Build a new index over `rows` in `storage`.
    ///
    /// The build is all-or-nothing: on failure no manifest is written and no
    /// segment file is left behind.
    pub fn create<R>(
        storage: Arc<dyn Storage>,
        settings: IndexingSettings,
        options: IndexOptions,
        rows: &R,
    ) -> Result<(Self, CreateOutcome)>
    where
        R: RowSource + ?Sized,
    {
        let sink: Option<Arc<dyn ProgressSink>> = if settings.log_create_index_progress {
            Some(Arc::new(LogProgressSink))
        } else {
            None
        };
        Self::create_with_progress(storage, settings, options, rows, sink)
    }

    /// Like [`create`](Self::create), with progress records sent to `sink`
    /// when progress logging is enabled in `settings`.
    pub fn create_with_progress<R>(
        storage: Arc<dyn Storage>,
        settings: IndexingSettings,
        options: IndexOptions,
        rows: &R,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<(Self, CreateOutcome)>
    where
        R: RowSource + ?Sized,
    {
        let options = options.resolve()?;
        let resources = WriterResources::CreateIndex.resources(&settings, &options)?;

        if storage.file_exists(MANIFEST_FILE) {
            return Err(SegforgeError::storage(format!(
                "an index already exists here ({MANIFEST_FILE} found)"
            )));
        }

        let store = Arc::new(SegmentStore::new(storage));
        let mut coordinator =
            ParallelBuildCoordinator::new(WriterResources::CreateIndex, Arc::clone(&store))
                .with_maintenance_work_mem_mb(settings.maintenance_work_mem_mb);
        if let (true, Some(sink)) = (resources.log_progress, sink) {
            coordinator = coordinator.with_progress(sink);
        }

        let output = coordinator.execute(rows, resources.build_plan()?)?;

        let catalog = match SegmentCatalog::create(Arc::clone(&store), options) {
            Ok(catalog) => catalog,
            Err(e) => {
                discard(&store, &output.segments);
                return Err(e);
            }
        };
        if let Err(e) = catalog.append(output.segments.clone()) {
            discard(&store, &output.segments);
            if let Err(cleanup) = store.storage().delete_file(MANIFEST_FILE) {
                warn!("failed to remove manifest of abandoned index: {cleanup}");
            }
            return Err(e);
        }
        let catalog = Arc::new(catalog);

        let index = Self::assemble(catalog, settings);
        let merge = if resources.do_merging {
            index
                .scheduler
                .maybe_merge(&index.catalog, resources.target_segment_count)?
        } else {
            MergeOutcome::default()
        };

        info!(
            "created index: {} rows, {} segments after merging",
            output.stats.rows,
            index.catalog.snapshot().len()
        );

        Ok((
            index,
            CreateOutcome {
                build: output.stats,
                merge,
            },
        ))
    }

    /// Open an existing index.
    pub fn open(storage: Arc<dyn Storage>, settings: IndexingSettings) -> Result<Self> {
        settings.validate()?;
        let store = Arc::new(SegmentStore::new(storage));
        let catalog = Arc::new(SegmentCatalog::open(store)?);
        Ok(Self::assemble(catalog, settings))
    }

    fn assemble(catalog: Arc<SegmentCatalog>, settings: IndexingSettings) -> Self {
        let scheduler = Arc::new(MergeScheduler::default());
        let statements = StatementIndexer::new(Arc::clone(&catalog), Arc::clone(&scheduler))
            .with_maintenance_work_mem_mb(settings.maintenance_work_mem_mb);

        SearchIndex {
            catalog,
            scheduler,
            statements,
            settings,
        }
    }

    /// Index the rows affected by one mutation statement.
    pub fn insert_statement<R>(&self, rows: &R) -> Result<StatementOutcome>
    where
        R: RowSource + ?Sized,
    {
        self.statements.index_statement(
            rows,
            self.settings.statement_parallelism,
            self.settings.statement_memory_budget_mb,
        )
    }

    /// Run a maintenance pass inline.
    pub fn vacuum(&self) -> Result<VacuumOutcome> {
        maintenance::vacuum(&self.catalog, &self.scheduler, &self.settings)
    }

    /// Start a background thread running maintenance passes on request.
    pub fn start_maintenance(&self) -> Result<MaintenanceWorker> {
        MaintenanceWorker::start(
            Arc::clone(&self.catalog),
            Arc::clone(&self.scheduler),
            self.settings.clone(),
        )
    }

    /// Replace the merge policy options; they apply from the next decision on.
    pub fn alter_options(&self, options: IndexOptions) -> Result<IndexOptions> {
        self.catalog.set_options(options)
    }

    /// Current merge policy options.
    pub fn options(&self) -> IndexOptions {
        self.catalog.options()
    }

    /// Settings this index was opened with.
    pub fn settings(&self) -> &IndexingSettings {
        &self.settings
    }

    /// Consistent view of the live segments.
    pub fn snapshot(&self) -> Arc<SegmentSet> {
        self.catalog.snapshot()
    }

    /// The merge scheduler shared by statements and maintenance.
    pub fn scheduler(&self) -> &Arc<MergeScheduler> {
        &self.scheduler
    }

    /// The segment catalog.
    pub fn catalog(&self) -> &Arc<SegmentCatalog> {
        &self.catalog
    }

    /// Summary of the current state.
    pub fn stats(&self) -> IndexStats {
        let snapshot = self.catalog.snapshot();
        let options = self.catalog.options();

        IndexStats {
            generation: snapshot.generation(),
            segments: snapshot.len(),
            documents: snapshot.doc_count(),
            size_bytes: snapshot.size_bytes(),
            retired_segments: self.catalog.retired_count(),
            target_segment_count: options.target_segment_count(),
            merge_on_insert: options.merge_on_insert,
        }
    }

    /// Every document of one consistent snapshot.
    pub fn read_all_documents(&self) -> Result<Vec<Document>> {
        let snapshot = self.catalog.snapshot();
        let store = self.catalog.store();

        let mut documents = Vec::with_capacity(snapshot.doc_count() as usize);
        for segment in snapshot.segments() {
            documents.extend(store.read_segment(segment)?);
        }
        Ok(documents)
    }
}

fn discard(store: &SegmentStore, segments: &[SegmentMeta]) {
    for segment in segments {
        if let Err(e) = store.delete_segment(segment) {
            warn!("failed to discard segment {}: {e}", segment.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::MemoryProgressSink;
    use crate::source::FnRowSource;
    use crate::storage::MemoryStorage;

    fn rows(keys: std::ops::Range<u64>) -> Vec<Document> {
        keys.map(|k| {
            Document::builder(k)
                .add_text("title", format!("document {k}"))
                .add_integer("rank", k as i64)
                .build()
        })
        .collect()
    }

    fn settings() -> IndexingSettings {
        IndexingSettings::default()
            .with_create_index_parallelism(4)
            .with_create_index_memory_budget_mb(1)
    }

    #[test]
    fn test_create_merges_to_target() {
        let storage = Arc::new(MemoryStorage::new_default());
        let options = IndexOptions::default().with_target_segment_count(2);

        let (index, outcome) =
            SearchIndex::create(storage, settings(), options, &rows(0..5_000)).unwrap();

        assert_eq!(outcome.build.rows, 5_000);
        assert_eq!(outcome.build.workers, 4);
        assert!(index.snapshot().len() <= 2);
        assert_eq!(index.stats().documents, 5_000);
        assert_eq!(index.read_all_documents().unwrap().len(), 5_000);
    }

    #[test]
    fn test_create_over_existing_index_fails() {
        let storage = Arc::new(MemoryStorage::new_default());
        SearchIndex::create(storage.clone(), settings(), IndexOptions::default(), &rows(0..10))
            .unwrap();
        let files = storage.list_files().unwrap().len();

        let err = SearchIndex::create(storage.clone(), settings(), IndexOptions::default(), &rows(0..10))
            .unwrap_err();
        assert!(matches!(err, SegforgeError::Storage(_)));
        assert_eq!(storage.list_files().unwrap().len(), files);
    }

    #[test]
    fn test_progress_sink_only_when_enabled() {
        let sink = Arc::new(MemoryProgressSink::new());
        let source = FnRowSource::new(200_000, |i| Document::new(i as u64));

        SearchIndex::create_with_progress(
            Arc::new(MemoryStorage::new_default()),
            settings(),
            IndexOptions::default(),
            &source,
            Some(sink.clone()),
        )
        .unwrap();
        assert!(sink.records().is_empty());

        SearchIndex::create_with_progress(
            Arc::new(MemoryStorage::new_default()),
            settings().with_progress_logging(true),
            IndexOptions::default(),
            &source,
            Some(sink.clone()),
        )
        .unwrap();
        let recorded: Vec<u64> = sink.records().iter().map(|r| r.rows).collect();
        assert_eq!(recorded, vec![100_000, 200_000]);
    }

    #[test]
    fn test_statements_and_vacuum() {
        let storage = Arc::new(MemoryStorage::new_default());
        let options = IndexOptions::default()
            .with_target_segment_count(1)
            .with_merge_on_insert(false);
        let (index, _) = SearchIndex::create(storage, settings(), options, &rows(0..100)).unwrap();
        assert_eq!(index.snapshot().len(), 1);

        for i in 1..6 {
            index.insert_statement(&rows(i * 100..i * 100 + 1)).unwrap();
        }
        assert_eq!(index.snapshot().len(), 6);

        let outcome = index.vacuum().unwrap();
        assert_eq!(outcome.segments_after, 1);
        assert_eq!(index.stats().retired_segments, 0);
        assert_eq!(index.stats().documents, 105);
    }

    #[test]
    fn test_alter_options_applies_to_next_statement() {
        let storage = Arc::new(MemoryStorage::new_default());
        let options = IndexOptions::default()
            .with_target_segment_count(1)
            .with_merge_on_insert(false);
        let (index, _) = SearchIndex::create(storage, settings(), options, &rows(0..10)).unwrap();

        index.insert_statement(&rows(10..11)).unwrap();
        assert_eq!(index.snapshot().len(), 2);

        let altered = index
            .alter_options(index.options().with_merge_on_insert(true))
            .unwrap();
        assert!(altered.merge_on_insert);

        index.insert_statement(&rows(11..12)).unwrap();
        assert_eq!(index.snapshot().len(), 1);
    }

    #[test]
    fn test_reopen_sees_committed_state() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let options = IndexOptions::default().with_target_segment_count(3);
        let (index, _) =
            SearchIndex::create(Arc::clone(&storage), settings(), options, &rows(0..1_000)).unwrap();
        index.insert_statement(&rows(1_000..1_010)).unwrap();
        let before = index.stats();
        drop(index);

        let reopened = SearchIndex::open(storage, settings()).unwrap();
        assert_eq!(reopened.stats().documents, before.documents);
        assert_eq!(reopened.stats().segments, before.segments);
        assert_eq!(reopened.options().target_segment_count(), 3);
    }
}
