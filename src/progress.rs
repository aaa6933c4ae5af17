//! Row-count progress reporting for bulk builds.
//!
//! Every worker owns one cache-line padded counter and bumps it with a relaxed
//! atomic add after each ingested document. A single reporter thread sums the
//! counters periodically and emits one [`ProgressRecord`] per 100,000-row
//! boundary crossed. When reporting is disabled no counters exist and workers
//! skip the increment entirely.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, bounded};
use log::info;
use parking_lot::Mutex;

use crate::error::{Result, SegforgeError};

/// Rows between two progress records.
pub const PROGRESS_INTERVAL_ROWS: u64 = 100_000;

/// How often the reporter thread samples the counters.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One progress observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    /// Rows processed when the boundary was observed.
    pub rows: u64,

    /// Time since the job started.
    pub elapsed: Duration,
}

impl ProgressRecord {
    /// Throughput in rows per second.
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for ProgressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {} rows in {:.2} seconds ({:.2} per second)",
            self.rows,
            self.elapsed.as_secs_f64(),
            self.rows_per_second()
        )
    }
}

/// Destination of progress records.
pub trait ProgressSink: Send + Sync + fmt::Debug {
    /// Receive one record.
    fn report(&self, record: &ProgressRecord);
}

/// Sink that writes records to the `log` facade at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn report(&self, record: &ProgressRecord) {
        info!("{record}");
    }
}

/// Sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryProgressSink {
    records: Mutex<Vec<ProgressRecord>>,
}

impl MemoryProgressSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records received so far.
    pub fn records(&self) -> Vec<ProgressRecord> {
        self.records.lock().clone()
    }
}

impl ProgressSink for MemoryProgressSink {
    fn report(&self, record: &ProgressRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Turns a growing row total into one record per boundary crossed.
#[derive(Debug, Clone)]
pub struct BoundaryTracker {
    interval: u64,
    next_boundary: u64,
}

impl BoundaryTracker {
    /// Track boundaries every `interval` rows.
    pub fn new(interval: u64) -> Self {
        let interval = interval.max(1);
        BoundaryTracker {
            interval,
            next_boundary: interval,
        }
    }

    /// Emit a record for every boundary at or below `total`.
    pub fn advance(&mut self, total: u64, elapsed: Duration, sink: &dyn ProgressSink) {
        while total >= self.next_boundary {
            sink.report(&ProgressRecord {
                rows: self.next_boundary,
                elapsed,
            });
            self.next_boundary += self.interval;
        }
    }
}

#[repr(align(64))]
#[derive(Debug, Default)]
struct PaddedCounter(AtomicU64);

/// Per-worker row counters of one job.
#[derive(Debug)]
pub struct ProgressCounters {
    slots: Box<[PaddedCounter]>,
}

impl ProgressCounters {
    /// Create one counter per worker.
    pub fn new(workers: usize) -> Self {
        ProgressCounters {
            slots: (0..workers.max(1)).map(|_| PaddedCounter::default()).collect(),
        }
    }

    /// Sum of all worker counters.
    pub fn total(&self) -> u64 {
        self.slots.iter().map(|c| c.0.load(Ordering::Relaxed)).sum()
    }
}

/// A worker's handle on its own counter.
#[derive(Debug, Clone)]
pub struct WorkerProgress {
    counters: Arc<ProgressCounters>,
    index: usize,
}

impl WorkerProgress {
    /// Count one ingested row.
    #[inline]
    pub fn increment(&self) {
        self.counters.slots[self.index]
            .0
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Background thread draining per-worker counters into a sink.
#[derive(Debug)]
pub struct ProgressReporter {
    counters: Arc<ProgressCounters>,
    stop: Sender<()>,
    handle: JoinHandle<u64>,
}

impl ProgressReporter {
    /// Start a reporter for `workers` workers.
    pub fn start(
        workers: usize,
        sink: Arc<dyn ProgressSink>,
        poll_interval: Duration,
    ) -> Result<Self> {
        Self::start_with_interval(workers, sink, poll_interval, PROGRESS_INTERVAL_ROWS)
    }

    /// Start a reporter with a custom row interval.
    pub fn start_with_interval(
        workers: usize,
        sink: Arc<dyn ProgressSink>,
        poll_interval: Duration,
        interval_rows: u64,
    ) -> Result<Self> {
        let counters = Arc::new(ProgressCounters::new(workers));
        let (stop, stopped) = bounded::<()>(1);
        let thread_counters = Arc::clone(&counters);
        let start = Instant::now();

        let handle = thread::Builder::new()
            .name("progress-reporter".to_string())
            .spawn(move || {
                let mut tracker = BoundaryTracker::new(interval_rows);
                loop {
                    // Disconnection and an explicit stop both end the loop.
                    let done = !matches!(
                        stopped.recv_timeout(poll_interval),
                        Err(crossbeam_channel::RecvTimeoutError::Timeout)
                    );
                    let total = thread_counters.total();
                    tracker.advance(total, start.elapsed(), sink.as_ref());
                    if done {
                        return total;
                    }
                }
            })
            .map_err(|e| SegforgeError::internal(format!("Failed to spawn progress reporter: {e}")))?;

        Ok(ProgressReporter {
            counters,
            stop,
            handle,
        })
    }

    /// Counter handle for worker `index`.
    pub fn worker(&self, index: usize) -> WorkerProgress {
        WorkerProgress {
            counters: Arc::clone(&self.counters),
            index: index.min(self.counters.slots.len() - 1),
        }
    }

    /// Rows counted so far.
    pub fn total(&self) -> u64 {
        self.counters.total()
    }

    /// Stop the reporter after a final drain and return the total row count.
    pub fn finish(self) -> Result<u64> {
        let _ = self.stop.send(());
        self.handle
            .join()
            .map_err(|_| SegforgeError::ThreadJoinError("progress reporter panicked".to_string()))
    }
}
