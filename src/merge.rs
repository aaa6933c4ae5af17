//! Segment merging.
//!
//! Merging reduces the number of live segments toward a target count without
//! changing the documents the index holds. The [`MergeScheduler`] asks a
//! [`MergePolicy`] which segments to combine and the [`MergeEngine`] performs
//! each merge, swapping the sources for the merged segment in one atomic
//! catalog update.

pub mod engine;
pub mod policy;
pub mod scheduler;

pub use engine::{MergeConfig, MergeEngine, MergeResult, MergeStats};
pub use policy::{
    DEFAULT_MAX_MERGE_FACTOR, MergeCandidate, MergePolicy, NoMergePolicy,
    SmallestFirstMergePolicy,
};
pub use scheduler::{MergeOutcome, MergeScheduler};
