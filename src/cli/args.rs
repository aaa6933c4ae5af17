//! Command line argument parsing for the segforge CLI using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// segforge - parallel segment builder and merger for full-text indexes
#[derive(Parser, Debug, Clone)]
#[command(name = "segforge")]
#[command(about = "Build, extend and compact segmented full-text indexes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct SegforgeArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human", global = true)]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl SegforgeArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build a new index from a JSONL file
    #[command(name = "create-index")]
    CreateIndex(CreateIndexArgs),

    /// Index the rows of one statement into an existing index
    Insert(InsertArgs),

    /// Merge down to the target segment count and delete retired files
    Vacuum(VacuumArgs),

    /// Change the merge policy options of an index
    Alter(AlterArgs),

    /// Show index statistics
    Stats(StatsArgs),
}

/// Indexing settings shared by the commands that build segments.
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// Settings file (JSON); flags override its values
    #[arg(long, value_name = "SETTINGS_FILE")]
    pub settings: Option<PathBuf>,

    /// Memory (MB) shared by the workers of a job without an explicit budget
    #[arg(long, env = "SEGFORGE_MAINTENANCE_WORK_MEM_MB")]
    pub maintenance_work_mem_mb: Option<i64>,
}

/// Arguments for building an index
#[derive(Parser, Debug, Clone)]
pub struct CreateIndexArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Input rows, one JSON object per line
    #[arg(value_name = "INPUT_FILE")]
    pub input: PathBuf,

    /// Field holding the integer row key
    #[arg(short, long, default_value = "id")]
    pub key_field: String,

    /// Worker count (0 = one per CPU)
    #[arg(short, long)]
    pub parallelism: Option<i64>,

    /// Per-worker memory budget in MB (0 = derived)
    #[arg(short, long)]
    pub memory_budget_mb: Option<i64>,

    /// Desired number of live segments (default: CPU count)
    #[arg(short, long)]
    pub target_segment_count: Option<i64>,

    /// Leave merging to maintenance passes instead of every insert
    #[arg(long)]
    pub no_merge_on_insert: bool,

    /// Log progress every 100,000 rows
    #[arg(long)]
    pub progress: bool,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

/// Arguments for indexing one statement
#[derive(Parser, Debug, Clone)]
pub struct InsertArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Affected rows, one JSON object per line
    #[arg(value_name = "INPUT_FILE")]
    pub input: PathBuf,

    /// Field holding the integer row key
    #[arg(short, long, default_value = "id")]
    pub key_field: String,

    /// Worker count for this statement (0 = one per CPU)
    #[arg(short, long)]
    pub parallelism: Option<i64>,

    /// Per-worker memory budget in MB (0 = derived)
    #[arg(short, long)]
    pub memory_budget_mb: Option<i64>,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

/// Arguments for a maintenance pass
#[derive(Parser, Debug, Clone)]
pub struct VacuumArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

/// Arguments for altering index options
#[derive(Parser, Debug, Clone)]
pub struct AlterArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Desired number of live segments
    #[arg(short, long)]
    pub target_segment_count: Option<i64>,

    /// Merge synchronously after every insert
    #[arg(long)]
    pub merge_on_insert: Option<bool>,
}

/// Arguments for showing statistics
#[derive(Parser, Debug, Clone)]
pub struct StatsArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// List every live segment
    #[arg(long)]
    pub segments: bool,
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
