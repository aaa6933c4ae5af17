//! # segforge
//!
//! Parallel, memory-bounded segment construction and merging for full-text
//! indexes.
//!
//! ## Features
//!
//! - Bulk builds sharded across a per-job worker pool
//! - Per-worker memory budgets with flush-on-budget segment builders
//! - Statement-level incremental indexing with its own pool and budget
//! - Smallest-first merging toward a target segment count
//! - Atomic, copy-on-write segment set publication
//! - Lock-free progress reporting
//! - Pluggable storage backends

pub mod builder;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod index;
pub mod maintenance;
pub mod memory;
pub mod merge;
pub mod pool;
pub mod progress;
pub mod segment;
pub mod source;
pub mod statement;
pub mod storage;

pub mod prelude {
    pub use crate::config::{IndexOptions, IndexingSettings, WriterResources};
    pub use crate::coordinator::{BuildOutput, CancellationToken, ParallelBuildCoordinator};
    pub use crate::document::{Document, FieldValue};
    pub use crate::error::{Result, SegforgeError};
    pub use crate::index::SearchIndex;
    pub use crate::merge::MergeScheduler;
    pub use crate::source::{FnRowSource, RowSource};
    pub use crate::storage::{FileStorage, MemoryStorage, Storage};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
