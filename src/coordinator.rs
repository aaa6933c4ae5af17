//! Parallel build coordination.
//!
//! A build job splits its input rows by position into contiguous shards, one
//! per worker, and gives each worker its own [`SegmentBuilder`] with the full
//! per-worker memory budget. Workers share nothing but the segment store, the
//! output channel and a cancellation flag. The job is all-or-nothing: if any
//! worker fails, or the job is cancelled, every segment it produced is deleted
//! and nothing reaches the catalog.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use log::{debug, info, warn};

use crate::builder::{BuilderStats, SegmentBuilder};
use crate::config::{BuildPlan, DEFAULT_MAINTENANCE_WORK_MEM_MB, WriterResources};
use crate::document::Document;
use crate::error::{Result, SegforgeError};
use crate::pool::WorkerPool;
use crate::progress::{DEFAULT_POLL_INTERVAL, ProgressReporter, ProgressSink};
use crate::segment::{SegmentMeta, SegmentStore};
use crate::source::{RowSource, shard_ranges};

/// Shared flag telling every worker of a job to stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Statistics of one build job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildStats {
    /// Resolved parallelism.
    pub parallelism: usize,

    /// Workers actually spawned (no worker is spawned for an empty shard).
    pub workers: usize,

    /// Per-worker memory budget in bytes.
    pub memory_budget_bytes: usize,

    /// Rows ingested.
    pub rows: u64,

    /// Segments produced.
    pub segments: usize,

    /// Segments produced by each worker, indexed by worker id.
    pub segments_per_worker: Vec<u64>,

    /// Bytes written.
    pub bytes_written: u64,

    /// Largest buffer any worker held before a flush.
    pub peak_buffered_bytes: usize,

    /// Wall time of the job.
    pub elapsed: Duration,
}

/// Result of a successful build job.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Produced segments, ordered by sequence.
    pub segments: Vec<SegmentMeta>,

    /// Job statistics.
    pub stats: BuildStats,
}

/// Runs build jobs over a segment store.
#[derive(Debug)]
pub struct ParallelBuildCoordinator {
    kind: WriterResources,
    store: Arc<SegmentStore>,
    maintenance_work_mem_mb: i64,
    progress: Option<Arc<dyn ProgressSink>>,
    poll_interval: Duration,
    cancellation: CancellationToken,
}

impl ParallelBuildCoordinator {
    /// Create a coordinator for jobs of `kind` writing into `store`.
    pub fn new(kind: WriterResources, store: Arc<SegmentStore>) -> Self {
        ParallelBuildCoordinator {
            kind,
            store,
            maintenance_work_mem_mb: DEFAULT_MAINTENANCE_WORK_MEM_MB,
            progress: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancellation: CancellationToken::new(),
        }
    }

    /// Global memory setting used to derive a budget when none is given.
    pub fn with_maintenance_work_mem_mb(mut self, mem_mb: i64) -> Self {
        self.maintenance_work_mem_mb = mem_mb;
        self
    }

    /// Emit progress records to `sink`.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Sampling interval of the progress reporter.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Token that cancels jobs run by this coordinator.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Resolve `parallelism` and `memory_budget_mb` and build `rows`.
    ///
    /// `parallelism == 0` selects the host's available parallelism and
    /// `memory_budget_mb == 0` derives the per-worker budget from the global
    /// maintenance memory setting.
    pub fn build<R>(&self, rows: &R, parallelism: i64, memory_budget_mb: i64) -> Result<BuildOutput>
    where
        R: RowSource + ?Sized,
    {
        let plan = BuildPlan::resolve(parallelism, memory_budget_mb, self.maintenance_work_mem_mb)?;
        self.execute(rows, plan)
    }

    /// Build `rows` with an already resolved plan.
    pub fn execute<R>(&self, rows: &R, plan: BuildPlan) -> Result<BuildOutput>
    where
        R: RowSource + ?Sized,
    {
        if plan.parallelism == 0 || plan.memory_budget_bytes == 0 {
            return Err(SegforgeError::configuration(format!(
                "invalid build plan: {plan:?}"
            )));
        }
        if self.cancellation.is_cancelled() {
            return Err(SegforgeError::cancelled(format!("{} job cancelled", self.kind)));
        }

        let start = Instant::now();
        let row_count = rows.row_count();
        let shards = shard_ranges(row_count, plan.parallelism);

        let mut stats = BuildStats {
            parallelism: plan.parallelism,
            workers: shards.len(),
            memory_budget_bytes: plan.memory_budget_bytes,
            segments_per_worker: vec![0; shards.len()],
            ..BuildStats::default()
        };

        if shards.is_empty() {
            debug!("{} job has no rows, nothing to build", self.kind);
            stats.elapsed = start.elapsed();
            return Ok(BuildOutput {
                segments: Vec::new(),
                stats,
            });
        }

        info!(
            "{} job: {row_count} rows across {} workers, {} bytes per worker",
            self.kind,
            shards.len(),
            plan.memory_budget_bytes
        );

        let reporter = match &self.progress {
            Some(sink) => Some(ProgressReporter::start(
                shards.len(),
                Arc::clone(sink),
                self.poll_interval,
            )?),
            None => None,
        };

        let pool = WorkerPool::new(self.kind, shards.len())?;
        let (segment_tx, segment_rx) = unbounded::<SegmentMeta>();
        let (result_tx, result_rx) = unbounded::<(usize, Result<BuilderStats>)>();

        pool.scope(|scope| {
            for (worker_id, range) in shards.into_iter().enumerate() {
                let segment_tx = segment_tx.clone();
                let result_tx = result_tx.clone();
                let store = Arc::clone(&self.store);
                let cancellation = self.cancellation.clone();
                let progress = reporter.as_ref().map(|r| r.worker(worker_id));
                let budget = plan.memory_budget_bytes;

                scope.spawn(move |_| {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        let mut builder = SegmentBuilder::new(worker_id, store, budget, segment_tx);
                        if let Some(progress) = progress {
                            builder = builder.with_progress(progress);
                        }
                        run_worker(&mut builder, rows.rows(range), &cancellation)
                    }))
                    .unwrap_or_else(|_| {
                        Err(SegforgeError::ThreadJoinError(format!(
                            "worker {worker_id} panicked"
                        )))
                    });

                    if outcome.is_err() {
                        cancellation.cancel();
                    }
                    let _ = result_tx.send((worker_id, outcome));
                });
            }
        });

        drop(segment_tx);
        drop(result_tx);

        let mut segments: Vec<SegmentMeta> = segment_rx.iter().collect();
        segments.sort_by_key(|s| s.sequence);

        if let Some(reporter) = reporter {
            reporter.finish()?;
        }

        let mut first_error: Option<SegforgeError> = None;
        let mut cancellation_error: Option<SegforgeError> = None;
        for (worker_id, outcome) in result_rx.iter() {
            match outcome {
                Ok(worker_stats) => {
                    stats.segments_per_worker[worker_id] = worker_stats.segments_flushed;
                    stats.rows += worker_stats.docs_ingested;
                    stats.bytes_written += worker_stats.bytes_flushed;
                    stats.peak_buffered_bytes =
                        stats.peak_buffered_bytes.max(worker_stats.peak_buffered_bytes);
                }
                Err(e) if e.is_cancellation() => {
                    cancellation_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!("{} worker {worker_id} failed: {e}", self.kind);
                    first_error.get_or_insert(e);
                }
            }
        }

        // A cancel that lands after every worker finished still voids the job.
        if first_error.is_none() && cancellation_error.is_none() && self.cancellation.is_cancelled()
        {
            cancellation_error = Some(SegforgeError::cancelled(format!(
                "{} job cancelled",
                self.kind
            )));
        }

        if let Some(error) = first_error.or(cancellation_error) {
            self.discard(&segments);
            return Err(error);
        }

        stats.segments = segments.len();
        stats.elapsed = start.elapsed();

        info!(
            "{} job built {} rows into {} segments in {:.2}s",
            self.kind,
            stats.rows,
            stats.segments,
            stats.elapsed.as_secs_f64()
        );

        Ok(BuildOutput { segments, stats })
    }

    fn discard(&self, segments: &[SegmentMeta]) {
        for segment in segments {
            if let Err(e) = self.store.delete_segment(segment) {
                warn!("failed to discard segment {}: {e}", segment.id);
            }
        }
        debug!("{} job discarded {} segments", self.kind, segments.len());
    }
}

fn run_worker(
    builder: &mut SegmentBuilder,
    rows: impl Iterator<Item = Document>,
    cancellation: &CancellationToken,
) -> Result<BuilderStats> {
    for document in rows {
        if cancellation.is_cancelled() {
            return Err(SegforgeError::cancelled("worker stopped by cancellation"));
        }
        builder.ingest(document)?;
    }

    builder.finish()?;
    Ok(builder.stats())
}
