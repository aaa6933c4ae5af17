mod common;

use std::sync::Arc;

use ahash::AHashSet;

use segforge::config::{BuildPlan, IndexOptions, IndexingSettings, WriterResources};
use segforge::coordinator::ParallelBuildCoordinator;
use segforge::document::Document;
use segforge::error::SegforgeError;
use segforge::index::SearchIndex;
use segforge::segment::SegmentStore;
use segforge::segment::catalog::MANIFEST_FILE;
use segforge::source::FnRowSource;
use segforge::storage::{MemoryStorage, Storage};

use common::{FailingStorage, memory_storage, rows, segment_files, sorted_keys};

fn read_back(store: &SegmentStore, segments: &[segforge::segment::SegmentMeta]) -> Vec<Document> {
    segments
        .iter()
        .flat_map(|meta| store.read_segment(meta).unwrap())
        .collect()
}

#[test]
fn test_build_conserves_rows_at_any_parallelism() {
    let input = rows(0..3_000);

    for parallelism in [1, 0, 3, 16] {
        let store = Arc::new(SegmentStore::new(memory_storage()));
        let coordinator = ParallelBuildCoordinator::new(WriterResources::CreateIndex, Arc::clone(&store));

        let output = coordinator.build(&input, parallelism, 1).unwrap();
        assert_eq!(output.stats.rows, 3_000, "parallelism {parallelism}");
        assert_eq!(output.stats.segments, output.segments.len());

        let documents = read_back(&store, &output.segments);
        assert_eq!(sorted_keys(&documents), (0..3_000).collect::<Vec<_>>());
    }
}

#[test]
fn test_auto_parallelism_uses_every_cpu() {
    let store = Arc::new(SegmentStore::new(memory_storage()));
    let coordinator = ParallelBuildCoordinator::new(WriterResources::CreateIndex, store);

    let input = rows(0..(num_cpus::get() as u64 * 10));
    let output = coordinator.build(&input, 0, 0).unwrap();

    assert_eq!(output.stats.parallelism, num_cpus::get());
    assert_eq!(output.stats.workers, num_cpus::get());
    assert_eq!(output.stats.segments_per_worker.len(), num_cpus::get());
}

#[test]
fn test_million_rows_four_workers_one_megabyte() {
    let storage = memory_storage();
    let store = Arc::new(SegmentStore::new(storage.clone()));
    let coordinator = ParallelBuildCoordinator::new(WriterResources::CreateIndex, Arc::clone(&store));

    let source = FnRowSource::new(1_000_000, |i| {
        Document::builder(i as u64)
            .add_text("body", format!("row number {i}"))
            .build()
    });
    let plan = BuildPlan::with_budget_bytes(4, 1024 * 1024).unwrap();
    let output = coordinator.execute(&source, plan).unwrap();

    // Each worker must have spilled several times under a 1MB budget.
    assert_eq!(output.stats.workers, 4);
    assert_eq!(output.stats.rows, 1_000_000);
    assert!(
        output.stats.segments_per_worker.iter().all(|&n| n > 1),
        "segments per worker: {:?}",
        output.stats.segments_per_worker
    );
    // At worst one buffer doubling lands on top of a nearly full budget.
    assert!(output.stats.peak_buffered_bytes < 2 * 1024 * 1024);

    let mut seen = AHashSet::with_capacity(1_000_000);
    let mut total = 0u64;
    for meta in &output.segments {
        for document in store.read_segment(meta).unwrap() {
            assert!(seen.insert(document.key()), "key {} appears twice", document.key());
            total += 1;
        }
    }
    assert_eq!(total, 1_000_000);
    assert_eq!(segment_files(storage.as_ref()).len(), output.segments.len());
}

#[test]
fn test_failed_create_leaves_nothing_behind() {
    let storage = Arc::new(FailingStorage::new(MemoryStorage::new_default(), 3));
    let settings = IndexingSettings::default()
        .with_create_index_parallelism(2)
        .with_create_index_memory_budget_mb(1);
    let source = FnRowSource::new(100_000, |i| {
        Document::builder(i as u64)
            .add_text("body", format!("row number {i}"))
            .build()
    });

    let result = SearchIndex::create(storage.clone(), settings, IndexOptions::default(), &source);

    assert!(matches!(result, Err(SegforgeError::IoFlush(_))));
    assert!(storage.failures() >= 1);
    assert!(segment_files(storage.as_ref()).is_empty());
    assert!(!storage.file_exists(MANIFEST_FILE));
}

#[test]
fn test_failed_statement_leaves_segment_set_unchanged() {
    let storage = Arc::new(FailingStorage::new(MemoryStorage::new_default(), usize::MAX));
    let settings = IndexingSettings::default().with_statement_parallelism(2);
    let (index, _) = SearchIndex::create(
        storage.clone(),
        settings,
        IndexOptions::default().with_target_segment_count(2),
        &rows(0..1_000),
    )
    .unwrap();

    let before = index.snapshot();
    let files_before = segment_files(storage.as_ref());

    storage.allow(0);
    let result = index.insert_statement(&rows(1_000..1_100));
    assert!(matches!(result, Err(SegforgeError::IoFlush(_))));

    let after = index.snapshot();
    assert_eq!(after.generation(), before.generation());
    assert_eq!(after.len(), before.len());
    assert_eq!(after.doc_count(), 1_000);
    assert_eq!(segment_files(storage.as_ref()), files_before);

    // The index keeps working once the storage recovers.
    storage.allow(usize::MAX);
    index.insert_statement(&rows(1_100..1_200)).unwrap();
    assert_eq!(index.stats().documents, 1_100);
}
