//! Merge scheduling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ahash::AHashSet;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::error::{Result, SegforgeError};
use crate::merge::engine::{MergeConfig, MergeEngine};
use crate::merge::policy::{MergePolicy, SmallestFirstMergePolicy};
use crate::segment::{SegmentCatalog, SegmentId, SegmentMeta};

/// What one scheduler invocation did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Merges performed.
    pub merges: usize,

    /// Live segments when the invocation started.
    pub segments_before: usize,

    /// Live segments when it returned.
    pub segments_after: usize,

    /// Documents rewritten by all merges.
    pub docs_merged: u64,

    /// Merges abandoned with a [`SegforgeError::MergeFailure`].
    pub failed_merges: usize,

    /// Message of the last abandoned merge.
    pub last_failure: Option<String>,

    /// Time spent merging.
    pub elapsed: Duration,
}

/// Decides when to merge and drives the merge engine.
///
/// Invocations are serialized: two concurrent callers never select
/// overlapping segments, the second one simply sees the result of the first.
#[derive(Debug)]
pub struct MergeScheduler {
    policy: Box<dyn MergePolicy>,
    engine: MergeEngine,
    invocations: AtomicU64,
    merging: Mutex<()>,
}

impl Default for MergeScheduler {
    fn default() -> Self {
        Self::new(Box::new(SmallestFirstMergePolicy::default()))
    }
}

impl MergeScheduler {
    /// Create a scheduler using `policy`.
    pub fn new(policy: Box<dyn MergePolicy>) -> Self {
        MergeScheduler {
            policy,
            engine: MergeEngine::new(MergeConfig::default()),
            invocations: AtomicU64::new(0),
            merging: Mutex::new(()),
        }
    }

    /// Replace the merge engine configuration.
    pub fn with_merge_config(mut self, config: MergeConfig) -> Self {
        self.engine = MergeEngine::new(config);
        self
    }

    /// The active policy.
    pub fn policy(&self) -> &dyn MergePolicy {
        self.policy.as_ref()
    }

    /// Number of times [`maybe_merge`](Self::maybe_merge) was called.
    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Merge until the live set is at or below `target_segment_count`, or the
    /// policy selects nothing more.
    ///
    /// A merge that fails with [`SegforgeError::MergeFailure`] is abandoned:
    /// its sources stay live, are left out of this invocation's remaining
    /// selections and are retried by the next one. Any other error stops the
    /// invocation and is returned; merges published before it stay published.
    pub fn maybe_merge(
        &self,
        catalog: &SegmentCatalog,
        target_segment_count: usize,
    ) -> Result<MergeOutcome> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let _guard = self.merging.lock();
        let start = Instant::now();

        let mut outcome = MergeOutcome {
            segments_before: catalog.snapshot().len(),
            ..MergeOutcome::default()
        };
        let mut abandoned: AHashSet<SegmentId> = AHashSet::new();

        loop {
            let snapshot = catalog.snapshot();
            let eligible: Vec<Arc<SegmentMeta>> = snapshot
                .segments()
                .iter()
                .filter(|s| !abandoned.contains(&s.id))
                .cloned()
                .collect();
            // Abandoned segments still occupy slots of the target.
            let target = target_segment_count.saturating_sub(abandoned.len()).max(1);

            let Some(candidate) = self.policy.select_merge(&eligible, target) else {
                outcome.segments_after = snapshot.len();
                break;
            };
            drop(eligible);

            debug!(
                "merging {} segments ({} docs, {} bytes) toward target {target_segment_count}",
                candidate.len(),
                candidate.doc_count,
                candidate.estimated_size
            );

            match self.engine.merge(catalog, &candidate) {
                Ok(result) => {
                    outcome.merges += 1;
                    outcome.docs_merged += result.stats.docs_merged;
                }
                Err(SegforgeError::MergeFailure(message)) => {
                    warn!("abandoned merge of {} segments: {message}", candidate.len());
                    outcome.failed_merges += 1;
                    outcome.last_failure = Some(message);
                    abandoned.extend(candidate.segments);
                }
                Err(e) => return Err(e),
            }
        }

        outcome.elapsed = start.elapsed();
        if outcome.merges > 0 {
            info!(
                "merged {} -> {} segments in {} merges ({:.2}s)",
                outcome.segments_before,
                outcome.segments_after,
                outcome.merges,
                outcome.elapsed.as_secs_f64()
            );
        }
        Ok(outcome)
    }
}
