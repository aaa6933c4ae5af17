//! Maintenance passes and the background thread that runs them.
//!
//! A maintenance pass ("vacuum") merges the live set down to the index's
//! target segment count and deletes retired segment files no snapshot still
//! references. In deferred mode this is the only place merges happen; running
//! it on the [`MaintenanceWorker`] keeps it off the foreground statement path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{IndexingSettings, WriterResources};
use crate::error::{Result, SegforgeError};
use crate::merge::{MergeOutcome, MergeScheduler};
use crate::segment::SegmentCatalog;

/// Result of one maintenance pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VacuumOutcome {
    /// Merges performed.
    pub merges: usize,

    /// Merges abandoned and left for a later pass.
    pub failed_merges: usize,

    /// Live segments before the pass.
    pub segments_before: usize,

    /// Live segments after the pass.
    pub segments_after: usize,

    /// Retired segment files deleted.
    pub files_deleted: usize,

    /// Retired segments still referenced by a snapshot.
    pub files_pending: usize,
}

/// Run one maintenance pass over `catalog`.
pub fn vacuum(
    catalog: &SegmentCatalog,
    scheduler: &MergeScheduler,
    settings: &IndexingSettings,
) -> Result<VacuumOutcome> {
    let resources = WriterResources::Vacuum.resources(settings, &catalog.options())?;

    let merge = if resources.do_merging {
        scheduler.maybe_merge(catalog, resources.target_segment_count)?
    } else {
        let live = catalog.snapshot().len();
        MergeOutcome {
            segments_before: live,
            segments_after: live,
            ..MergeOutcome::default()
        }
    };

    let files_deleted = catalog.garbage_collect()?;
    let outcome = VacuumOutcome {
        merges: merge.merges,
        failed_merges: merge.failed_merges,
        segments_before: merge.segments_before,
        segments_after: merge.segments_after,
        files_deleted,
        files_pending: catalog.retired_count(),
    };

    debug!("vacuum finished: {outcome:?}");
    Ok(outcome)
}

/// Requests understood by the maintenance thread.
#[derive(Debug)]
pub enum MaintenanceRequest {
    /// Run a maintenance pass and send its result on `reply`.
    Vacuum {
        reply: Sender<Result<VacuumOutcome>>,
    },

    /// Stop the thread.
    Shutdown,
}

/// Background thread running maintenance passes on request.
#[derive(Debug)]
pub struct MaintenanceWorker {
    requests: Sender<MaintenanceRequest>,
    running: Arc<AtomicBool>,
    passes: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceWorker {
    /// Start the maintenance thread.
    pub fn start(
        catalog: Arc<SegmentCatalog>,
        scheduler: Arc<MergeScheduler>,
        settings: IndexingSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let (requests, receiver) = unbounded::<MaintenanceRequest>();
        let running = Arc::new(AtomicBool::new(true));
        let passes = Arc::new(AtomicU64::new(0));

        let thread_running = Arc::clone(&running);
        let thread_passes = Arc::clone(&passes);
        let handle = thread::Builder::new()
            .name("maintenance".to_string())
            .spawn(move || {
                run(receiver, &catalog, &scheduler, &settings, &thread_passes);
                thread_running.store(false, Ordering::Release);
            })
            .map_err(|e| SegforgeError::internal(format!("Failed to spawn maintenance thread: {e}")))?;

        info!("maintenance thread started");

        Ok(MaintenanceWorker {
            requests,
            running,
            passes,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a maintenance pass and return the channel its result arrives on.
    pub fn request_vacuum(&self) -> Result<Receiver<Result<VacuumOutcome>>> {
        let (reply, result) = bounded(1);
        self.requests
            .send(MaintenanceRequest::Vacuum { reply })
            .map_err(|_| SegforgeError::other("maintenance thread is not running"))?;
        Ok(result)
    }

    /// Queue a maintenance pass and wait for it.
    pub fn vacuum(&self) -> Result<VacuumOutcome> {
        self.request_vacuum()?
            .recv()
            .map_err(|_| SegforgeError::other("maintenance thread stopped before replying"))?
    }

    /// Whether the thread is still accepting requests.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Passes completed so far, successful or not.
    pub fn completed_passes(&self) -> u64 {
        self.passes.load(Ordering::Acquire)
    }

    /// Stop the thread after the requests already queued and wait for it.
    pub fn shutdown(&self) -> Result<()> {
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };

        let _ = self.requests.send(MaintenanceRequest::Shutdown);
        handle
            .join()
            .map_err(|_| SegforgeError::ThreadJoinError("maintenance thread panicked".to_string()))?;

        info!("maintenance thread stopped");
        Ok(())
    }
}

impl Drop for MaintenanceWorker {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("{e}");
        }
    }
}

fn run(
    receiver: Receiver<MaintenanceRequest>,
    catalog: &SegmentCatalog,
    scheduler: &MergeScheduler,
    settings: &IndexingSettings,
    passes: &AtomicU64,
) {
    while let Ok(request) = receiver.recv() {
        match request {
            MaintenanceRequest::Vacuum { reply } => {
                let result = vacuum(catalog, scheduler, settings);
                if let Err(e) = &result {
                    warn!("maintenance pass failed: {e}");
                }
                passes.fetch_add(1, Ordering::AcqRel);
                let _ = reply.send(result);
            }
            MaintenanceRequest::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexOptions;
    use crate::document::Document;
    use crate::segment::SegmentStore;
    use crate::storage::{MemoryStorage, Storage};

    fn catalog(options: IndexOptions, segments: u64) -> Arc<SegmentCatalog> {
        let store = Arc::new(SegmentStore::new(Arc::new(MemoryStorage::new_default())));
        let catalog = SegmentCatalog::create(store, options).unwrap();
        for i in 0..segments {
            let docs: Vec<Document> = (i * 10..(i + 1) * 10).map(Document::new).collect();
            let meta = catalog.store().write_segment(&docs).unwrap();
            catalog.append(vec![meta]).unwrap();
        }
        Arc::new(catalog)
    }

    #[test]
    fn test_vacuum_merges_and_collects() {
        let catalog = catalog(IndexOptions::default().with_target_segment_count(2), 8);
        let scheduler = MergeScheduler::default();

        let outcome = vacuum(&catalog, &scheduler, &IndexingSettings::default()).unwrap();

        assert_eq!(outcome.segments_before, 8);
        assert!(outcome.segments_after <= 2);
        // Every merged source is retired and nothing else references it.
        assert_eq!(
            outcome.files_deleted,
            outcome.segments_before - outcome.segments_after + outcome.merges
        );
        assert_eq!(outcome.files_pending, 0);

        let seg_files = catalog
            .store()
            .storage()
            .list_files()
            .unwrap()
            .into_iter()
            .filter(|f| f.ends_with(".seg"))
            .count();
        assert_eq!(seg_files, catalog.snapshot().len());
    }

    #[test]
    fn test_vacuum_keeps_files_of_live_snapshots() {
        let catalog = catalog(IndexOptions::default().with_target_segment_count(1), 4);
        let reader = catalog.snapshot();

        let outcome =
            vacuum(&catalog, &MergeScheduler::default(), &IndexingSettings::default()).unwrap();
        assert_eq!(outcome.files_deleted, 0);
        assert_eq!(outcome.files_pending, 4);

        for meta in reader.segments() {
            assert!(catalog.store().segment_exists(meta));
        }

        drop(reader);
        let outcome =
            vacuum(&catalog, &MergeScheduler::default(), &IndexingSettings::default()).unwrap();
        assert_eq!(outcome.files_deleted, 4);
        assert_eq!(outcome.merges, 0);
    }

    #[test]
    fn test_worker_runs_requests_and_shuts_down() {
        let catalog = catalog(IndexOptions::default().with_target_segment_count(1), 6);
        let scheduler = Arc::new(MergeScheduler::default());
        let worker = MaintenanceWorker::start(
            Arc::clone(&catalog),
            Arc::clone(&scheduler),
            IndexingSettings::default(),
        )
        .unwrap();

        let outcome = worker.vacuum().unwrap();
        assert_eq!(outcome.segments_after, 1);
        assert_eq!(worker.completed_passes(), 1);

        let pending = worker.request_vacuum().unwrap();
        assert_eq!(pending.recv().unwrap().unwrap().merges, 0);

        worker.shutdown().unwrap();
        assert!(!worker.is_running());
        assert!(worker.request_vacuum().is_err());
        worker.shutdown().unwrap();
        assert_eq!(catalog.snapshot().doc_count(), 60);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let catalog = catalog(IndexOptions::default(), 0);
        let settings = IndexingSettings::default().with_maintenance_work_mem_mb(0);

        assert!(matches!(
            MaintenanceWorker::start(catalog, Arc::new(MergeScheduler::default()), settings),
            Err(SegforgeError::Configuration(_))
        ));
    }
}
