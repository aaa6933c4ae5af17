//! Statement-level incremental indexing.
//!
//! Every mutation statement runs its own small build job with the statement
//! settings, appends the resulting segments to the live set in one step and,
//! when the index merges on insert, runs the merge scheduler before returning.

use std::sync::Arc;

use log::{debug, warn};

use crate::config::{BuildPlan, DEFAULT_MAINTENANCE_WORK_MEM_MB, WriterResources};
use crate::coordinator::{BuildStats, ParallelBuildCoordinator};
use crate::error::Result;
use crate::merge::{MergeOutcome, MergeScheduler};
use crate::segment::{SegmentCatalog, SegmentId};
use crate::source::RowSource;

/// What one statement did to the index.
#[derive(Debug, Clone)]
pub struct StatementOutcome {
    /// Segments appended by the statement.
    pub appended: Vec<SegmentId>,

    /// Statistics of the statement's build job.
    pub build: BuildStats,

    /// Result of the eager merge, if one ran.
    pub merge: Option<MergeOutcome>,

    /// Error that stopped the eager merge. The statement's rows are
    /// committed regardless.
    pub merge_error: Option<String>,

    /// Generation of the segment set the statement left behind.
    pub generation: u64,
}

/// Indexes the rows affected by mutation statements.
#[derive(Debug)]
pub struct StatementIndexer {
    catalog: Arc<SegmentCatalog>,
    scheduler: Arc<MergeScheduler>,
    maintenance_work_mem_mb: i64,
}

impl StatementIndexer {
    /// Create an indexer appending into `catalog`.
    pub fn new(catalog: Arc<SegmentCatalog>, scheduler: Arc<MergeScheduler>) -> Self {
        StatementIndexer {
            catalog,
            scheduler,
            maintenance_work_mem_mb: DEFAULT_MAINTENANCE_WORK_MEM_MB,
        }
    }

    /// Global memory setting used to derive a budget when none is given.
    pub fn with_maintenance_work_mem_mb(mut self, mem_mb: i64) -> Self {
        self.maintenance_work_mem_mb = mem_mb;
        self
    }

    /// Index `affected_rows` of one statement.
    ///
    /// Nothing is appended if the build fails. Once the append is published
    /// the statement succeeds: a failing eager merge is reported in the
    /// outcome and left for the next trigger. The merge policy options are
    /// read when the statement starts.
    pub fn index_statement<R>(
        &self,
        affected_rows: &R,
        parallelism: i64,
        memory_budget_mb: i64,
    ) -> Result<StatementOutcome>
    where
        R: RowSource + ?Sized,
    {
        let plan = BuildPlan::resolve(parallelism, memory_budget_mb, self.maintenance_work_mem_mb)?;
        let options = self.catalog.options();

        let coordinator =
            ParallelBuildCoordinator::new(WriterResources::Statement, Arc::clone(self.catalog.store()));
        let output = coordinator.execute(affected_rows, plan)?;

        let appended: Vec<SegmentId> = output.segments.iter().map(|s| s.id).collect();
        let mut generation = match self.catalog.append(output.segments.clone()) {
            Ok(set) => set.generation(),
            Err(e) => {
                for segment in &output.segments {
                    let _ = self.catalog.store().delete_segment(segment);
                }
                return Err(e);
            }
        };

        debug!(
            "statement appended {} segments ({} rows)",
            appended.len(),
            output.stats.rows
        );

        let mut merge = None;
        let mut merge_error = None;
        if options.merge_on_insert {
            match self
                .scheduler
                .maybe_merge(&self.catalog, options.target_segment_count())
            {
                Ok(outcome) => merge = Some(outcome),
                Err(e) => {
                    warn!("eager merge after statement failed, segments stay unmerged: {e}");
                    merge_error = Some(e.to_string());
                }
            }
            generation = self.catalog.snapshot().generation();
        }

        Ok(StatementOutcome {
            appended,
            build: output.stats,
            merge,
            merge_error,
            generation,
        })
    }
}
