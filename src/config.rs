//! Configuration surface consumed by the engine.
//!
//! Two layers of settings exist:
//!
//! - [`IndexingSettings`]: process-wide knobs for bulk builds and statement
//!   indexing (parallelism, memory budgets, progress logging). Values arrive
//!   as raw signed integers from the settings collaborator and are validated
//!   here.
//! - [`IndexOptions`]: per-index merge policy (`target_segment_count`,
//!   `merge_on_insert`), persisted in the index manifest and alterable at any
//!   time.
//!
//! A build job turns both into a fixed [`JobResources`] at job start through
//! [`WriterResources::resources`]. Nothing in a running job re-reads settings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegforgeError};

const MB: usize = 1024 * 1024;

/// Default `maintenance_work_mem` in megabytes.
pub const DEFAULT_MAINTENANCE_WORK_MEM_MB: i64 = 64;

/// Smallest per-worker budget a derived memory budget is allowed to reach.
pub const MIN_MEMORY_BUDGET_MB: usize = 1;

/// Process-wide indexing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingSettings {
    /// Workers used by `CREATE INDEX`. 0 means one per available CPU.
    pub create_index_parallelism: i64,

    /// Per-worker memory budget (MB) for `CREATE INDEX`. 0 means derived.
    pub create_index_memory_budget_mb: i64,

    /// Workers used per mutation statement. 0 means one per available CPU.
    pub statement_parallelism: i64,

    /// Per-worker memory budget (MB) per statement. 0 means derived.
    pub statement_memory_budget_mb: i64,

    /// Memory (MB) shared by the workers of a job when no explicit budget is set.
    pub maintenance_work_mem_mb: i64,

    /// Emit a progress record every 100,000 rows during `CREATE INDEX`.
    pub log_create_index_progress: bool,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        IndexingSettings {
            create_index_parallelism: 0,
            create_index_memory_budget_mb: 0,
            statement_parallelism: 1,
            statement_memory_budget_mb: 0,
            maintenance_work_mem_mb: DEFAULT_MAINTENANCE_WORK_MEM_MB,
            log_create_index_progress: false,
        }
    }
}

impl IndexingSettings {
    /// Set `CREATE INDEX` parallelism.
    pub fn with_create_index_parallelism(mut self, parallelism: i64) -> Self {
        self.create_index_parallelism = parallelism;
        self
    }

    /// Set `CREATE INDEX` per-worker memory budget.
    pub fn with_create_index_memory_budget_mb(mut self, budget_mb: i64) -> Self {
        self.create_index_memory_budget_mb = budget_mb;
        self
    }

    /// Set statement parallelism.
    pub fn with_statement_parallelism(mut self, parallelism: i64) -> Self {
        self.statement_parallelism = parallelism;
        self
    }

    /// Set statement per-worker memory budget.
    pub fn with_statement_memory_budget_mb(mut self, budget_mb: i64) -> Self {
        self.statement_memory_budget_mb = budget_mb;
        self
    }

    /// Set `maintenance_work_mem`.
    pub fn with_maintenance_work_mem_mb(mut self, mem_mb: i64) -> Self {
        self.maintenance_work_mem_mb = mem_mb;
        self
    }

    /// Toggle progress logging.
    pub fn with_progress_logging(mut self, enabled: bool) -> Self {
        self.log_create_index_progress = enabled;
        self
    }

    /// Check every value without resolving anything.
    pub fn validate(&self) -> Result<()> {
        check_non_negative("create_index_parallelism", self.create_index_parallelism)?;
        check_non_negative(
            "create_index_memory_budget_mb",
            self.create_index_memory_budget_mb,
        )?;
        check_non_negative("statement_parallelism", self.statement_parallelism)?;
        check_non_negative("statement_memory_budget_mb", self.statement_memory_budget_mb)?;
        if self.maintenance_work_mem_mb <= 0 {
            return Err(SegforgeError::configuration(format!(
                "maintenance_work_mem_mb must be > 0, got {}",
                self.maintenance_work_mem_mb
            )));
        }
        Ok(())
    }
}

/// Per-index merge policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Desired steady-state number of live segments. `None` until resolved.
    pub target_segment_count: Option<i64>,

    /// Merge synchronously at the end of every mutation statement.
    pub merge_on_insert: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            target_segment_count: None,
            merge_on_insert: true,
        }
    }
}

impl IndexOptions {
    /// Set the target segment count.
    pub fn with_target_segment_count(mut self, count: i64) -> Self {
        self.target_segment_count = Some(count);
        self
    }

    /// Toggle merge-on-insert.
    pub fn with_merge_on_insert(mut self, merge_on_insert: bool) -> Self {
        self.merge_on_insert = merge_on_insert;
        self
    }

    /// Validate and fill in defaults.
    ///
    /// Called when an index is created or altered: an unset target becomes the
    /// number of CPUs available right now and is stored that way.
    pub fn resolve(self) -> Result<Self> {
        let count = match self.target_segment_count {
            Some(count) if count <= 0 => {
                return Err(SegforgeError::configuration(format!(
                    "target_segment_count must be > 0, got {count}"
                )));
            }
            Some(count) => count,
            None => num_cpus::get() as i64,
        };

        Ok(IndexOptions {
            target_segment_count: Some(count),
            merge_on_insert: self.merge_on_insert,
        })
    }

    /// Resolved target segment count.
    pub fn target_segment_count(&self) -> usize {
        match self.target_segment_count {
            Some(count) if count > 0 => count as usize,
            _ => num_cpus::get(),
        }
    }
}

/// Worker count and per-worker budget of one build job, fixed at job start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildPlan {
    /// Number of workers.
    pub parallelism: usize,

    /// Per-worker memory budget in bytes.
    pub memory_budget_bytes: usize,
}

impl BuildPlan {
    /// Resolve raw settings into a plan.
    ///
    /// `parallelism == 0` selects the host's available parallelism.
    /// `memory_budget_mb == 0` derives `maintenance_work_mem_mb / parallelism`,
    /// never less than [`MIN_MEMORY_BUDGET_MB`].
    pub fn resolve(
        parallelism: i64,
        memory_budget_mb: i64,
        maintenance_work_mem_mb: i64,
    ) -> Result<Self> {
        check_non_negative("parallelism", parallelism)?;
        check_non_negative("memory_budget_mb", memory_budget_mb)?;

        let parallelism = if parallelism == 0 {
            num_cpus::get()
        } else {
            parallelism as usize
        };

        let budget_mb = if memory_budget_mb == 0 {
            if maintenance_work_mem_mb <= 0 {
                return Err(SegforgeError::configuration(format!(
                    "maintenance_work_mem_mb must be > 0 to derive a memory budget, got {maintenance_work_mem_mb}"
                )));
            }
            (maintenance_work_mem_mb as usize / parallelism.max(1)).max(MIN_MEMORY_BUDGET_MB)
        } else {
            memory_budget_mb as usize
        };

        Ok(BuildPlan {
            parallelism,
            memory_budget_bytes: budget_mb.saturating_mul(MB),
        })
    }

    /// Plan with an explicit budget in bytes, for callers that already resolved
    /// their parallelism.
    pub fn with_budget_bytes(parallelism: usize, memory_budget_bytes: usize) -> Result<Self> {
        if parallelism == 0 {
            return Err(SegforgeError::configuration("parallelism must be > 0"));
        }
        if memory_budget_bytes == 0 {
            return Err(SegforgeError::configuration("memory budget must be > 0"));
        }
        Ok(BuildPlan {
            parallelism,
            memory_budget_bytes,
        })
    }
}

/// The kind of job requesting writer resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriterResources {
    /// Bulk build of a new index.
    CreateIndex,
    /// One mutation statement.
    Statement,
    /// A maintenance pass.
    Vacuum,
}

impl WriterResources {
    /// Short name used for worker threads and log records.
    pub fn name(&self) -> &'static str {
        match self {
            WriterResources::CreateIndex => "create-index",
            WriterResources::Statement => "statement",
            WriterResources::Vacuum => "vacuum",
        }
    }

    /// Resolve the resources of one job.
    pub fn resources(
        &self,
        settings: &IndexingSettings,
        options: &IndexOptions,
    ) -> Result<JobResources> {
        settings.validate()?;

        // Vacuum only merges, inline on the calling thread, so it gets no
        // build plan.
        let (plan, do_merging) = match self {
            // A freshly built index is always merged down to its target.
            WriterResources::CreateIndex => (
                Some(BuildPlan::resolve(
                    settings.create_index_parallelism,
                    settings.create_index_memory_budget_mb,
                    settings.maintenance_work_mem_mb,
                )?),
                true,
            ),
            WriterResources::Statement => (
                Some(BuildPlan::resolve(
                    settings.statement_parallelism,
                    settings.statement_memory_budget_mb,
                    settings.maintenance_work_mem_mb,
                )?),
                options.merge_on_insert,
            ),
            WriterResources::Vacuum => (None, true),
        };

        Ok(JobResources {
            kind: *self,
            plan,
            target_segment_count: options.target_segment_count(),
            do_merging,
            log_progress: *self == WriterResources::CreateIndex
                && settings.log_create_index_progress,
        })
    }
}

impl fmt::Display for WriterResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resources of one job, computed once at job start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobResources {
    /// What kind of job these resources belong to.
    pub kind: WriterResources,

    /// Worker count and per-worker budget of jobs that build segments.
    pub plan: Option<BuildPlan>,

    /// Target segment count read at job start.
    pub target_segment_count: usize,

    /// Whether the job ends with a merge pass.
    pub do_merging: bool,

    /// Whether progress records are emitted.
    pub log_progress: bool,
}

impl JobResources {
    /// Plan of a segment-building job.
    pub fn build_plan(&self) -> Result<BuildPlan> {
        self.plan.ok_or_else(|| {
            SegforgeError::configuration(format!("{} jobs do not build segments", self.kind))
        })
    }
}

fn check_non_negative(name: &str, value: i64) -> Result<()> {
    if value < 0 {
        return Err(SegforgeError::configuration(format!(
            "{name} must be a non-negative integer, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = IndexingSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.statement_parallelism, 1);
        assert!(!settings.log_create_index_progress);
    }

    #[test]
    fn test_negative_values_rejected() {
        let settings = IndexingSettings::default().with_create_index_parallelism(-1);
        assert!(matches!(
            settings.validate(),
            Err(SegforgeError::Configuration(_))
        ));

        let settings = IndexingSettings::default().with_statement_memory_budget_mb(-5);
        assert!(matches!(
            settings.validate(),
            Err(SegforgeError::Configuration(_))
        ));

        let settings = IndexingSettings::default().with_maintenance_work_mem_mb(0);
        assert!(settings.validate().is_err());

        assert!(BuildPlan::resolve(-2, 0, 64).is_err());
        assert!(BuildPlan::resolve(2, -1, 64).is_err());
    }

    #[test]
    fn test_auto_parallelism_uses_host_cpus() {
        let plan = BuildPlan::resolve(0, 16, 64).unwrap();
        assert_eq!(plan.parallelism, num_cpus::get());
        assert_eq!(plan.memory_budget_bytes, 16 * MB);
    }

    #[test]
    fn test_derived_memory_budget() {
        let plan = BuildPlan::resolve(4, 0, 64).unwrap();
        assert_eq!(plan.parallelism, 4);
        assert_eq!(plan.memory_budget_bytes, 16 * MB);

        // Never below the floor, even with many workers.
        let plan = BuildPlan::resolve(128, 0, 64).unwrap();
        assert_eq!(plan.memory_budget_bytes, MIN_MEMORY_BUDGET_MB * MB);
    }

    #[test]
    fn test_index_options_resolution() {
        let options = IndexOptions::default().resolve().unwrap();
        assert_eq!(options.target_segment_count, Some(num_cpus::get() as i64));
        assert!(options.merge_on_insert);

        let options = IndexOptions::default()
            .with_target_segment_count(4)
            .resolve()
            .unwrap();
        assert_eq!(options.target_segment_count(), 4);

        let invalid = IndexOptions::default().with_target_segment_count(0);
        assert!(matches!(
            invalid.resolve(),
            Err(SegforgeError::Configuration(_))
        ));
    }

    #[test]
    fn test_writer_resources() {
        let settings = IndexingSettings::default()
            .with_create_index_parallelism(8)
            .with_create_index_memory_budget_mb(32)
            .with_statement_parallelism(2)
            .with_progress_logging(true);
        let options = IndexOptions::default()
            .with_target_segment_count(3)
            .with_merge_on_insert(false);

        let create = WriterResources::CreateIndex
            .resources(&settings, &options)
            .unwrap();
        let plan = create.build_plan().unwrap();
        assert_eq!(plan.parallelism, 8);
        assert_eq!(plan.memory_budget_bytes, 32 * MB);
        assert_eq!(create.target_segment_count, 3);
        assert!(create.do_merging);
        assert!(create.log_progress);

        let statement = WriterResources::Statement
            .resources(&settings, &options)
            .unwrap();
        let plan = statement.build_plan().unwrap();
        assert_eq!(plan.parallelism, 2);
        assert_eq!(plan.memory_budget_bytes, 32 * MB);
        assert!(!statement.do_merging);
        assert!(!statement.log_progress);

        let vacuum = WriterResources::Vacuum
            .resources(&settings, &options)
            .unwrap();
        assert_eq!(vacuum.plan, None);
        assert!(vacuum.build_plan().is_err());
        assert!(vacuum.do_merging);
        assert_eq!(vacuum.target_segment_count, 3);
    }

    #[test]
    fn test_settings_from_json() {
        let settings: IndexingSettings =
            serde_json::from_str(r#"{"statement_parallelism": 4}"#).unwrap();
        assert_eq!(settings.statement_parallelism, 4);
        assert_eq!(settings.maintenance_work_mem_mb, DEFAULT_MAINTENANCE_WORK_MEM_MB);
    }
}
