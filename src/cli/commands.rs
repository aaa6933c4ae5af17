//! Command implementations for the segforge CLI.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use log::{debug, info};

use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::{IndexOptions, IndexingSettings};
use crate::document::Document;
use crate::index::SearchIndex;
use crate::storage::{FileStorage, Storage, StorageConfig};

/// Execute a CLI command.
pub fn execute_command(args: SegforgeArgs) -> Result<()> {
    match &args.command {
        Command::CreateIndex(create_args) => create_index(create_args, &args),
        Command::Insert(insert_args) => insert(insert_args, &args),
        Command::Vacuum(vacuum_args) => vacuum(vacuum_args, &args),
        Command::Alter(alter_args) => alter(alter_args, &args),
        Command::Stats(stats_args) => show_stats(stats_args, &args),
    }
}

/// Build a new index.
fn create_index(args: &CreateIndexArgs, cli_args: &SegforgeArgs) -> Result<()> {
    let mut settings = load_settings(&args.settings)?;
    if let Some(parallelism) = args.parallelism {
        settings.create_index_parallelism = parallelism;
    }
    if let Some(budget) = args.memory_budget_mb {
        settings.create_index_memory_budget_mb = budget;
    }
    if args.progress {
        settings.log_create_index_progress = true;
    }

    let mut options = IndexOptions::default().with_merge_on_insert(!args.no_merge_on_insert);
    if let Some(count) = args.target_segment_count {
        options = options.with_target_segment_count(count);
    }

    let rows = read_documents(&args.input, &args.key_field)?;
    info!(
        "building index at {} from {} rows",
        args.index_path.display(),
        rows.len()
    );

    let start = Instant::now();
    let (index, outcome) = SearchIndex::create(open_storage(&args.index_path)?, settings, options, &rows)
        .with_context(|| format!("failed to create index at {}", args.index_path.display()))?;
    let elapsed = start.elapsed();

    output_result(
        "Index created successfully",
        &IndexCreationResult {
            path: args.index_path.to_string_lossy().to_string(),
            rows: outcome.build.rows,
            workers: outcome.build.workers,
            memory_budget_bytes: outcome.build.memory_budget_bytes,
            segments_built: outcome.build.segments,
            segments_live: index.snapshot().len(),
            merges: outcome.merge.merges,
            duration_ms: elapsed.as_millis() as u64,
            rows_per_second: per_second(outcome.build.rows, elapsed.as_secs_f64()),
        },
        cli_args,
    )?;

    Ok(())
}

/// Index the rows of one statement.
fn insert(args: &InsertArgs, cli_args: &SegforgeArgs) -> Result<()> {
    let mut settings = load_settings(&args.settings)?;
    if let Some(parallelism) = args.parallelism {
        settings.statement_parallelism = parallelism;
    }
    if let Some(budget) = args.memory_budget_mb {
        settings.statement_memory_budget_mb = budget;
    }

    let index = open_index(&args.index_path, settings)?;
    let rows = read_documents(&args.input, &args.key_field)?;

    let start = Instant::now();
    let outcome = index
        .insert_statement(&rows)
        .context("statement failed, nothing was appended")?;

    output_result(
        "Statement indexed",
        &StatementResult {
            rows: outcome.build.rows,
            segments_appended: outcome.appended.len(),
            merges: outcome.merge.as_ref().map(|m| m.merges),
            failed_merges: outcome.merge.as_ref().map(|m| m.failed_merges),
            merge_error: outcome.merge_error.clone(),
            segments_live: index.snapshot().len(),
            generation: outcome.generation,
            duration_ms: start.elapsed().as_millis() as u64,
        },
        cli_args,
    )?;

    Ok(())
}

/// Run a maintenance pass.
fn vacuum(args: &VacuumArgs, cli_args: &SegforgeArgs) -> Result<()> {
    let settings = load_settings(&args.settings)?;
    let index = open_index(&args.index_path, settings)?;

    let outcome = index.vacuum().context("maintenance pass failed")?;
    output_result("Vacuum complete", &outcome, cli_args)?;
    Ok(())
}

/// Change merge policy options.
fn alter(args: &AlterArgs, cli_args: &SegforgeArgs) -> Result<()> {
    if args.target_segment_count.is_none() && args.merge_on_insert.is_none() {
        bail!("nothing to alter: pass --target-segment-count and/or --merge-on-insert");
    }

    let index = open_index(&args.index_path, IndexingSettings::default())?;
    let mut options = index.options();
    if let Some(count) = args.target_segment_count {
        options = options.with_target_segment_count(count);
    }
    if let Some(merge_on_insert) = args.merge_on_insert {
        options = options.with_merge_on_insert(merge_on_insert);
    }

    let options = index.alter_options(options)?;
    output_result(
        "Index options updated",
        &AlterResult {
            target_segment_count: options.target_segment_count(),
            merge_on_insert: options.merge_on_insert,
        },
        cli_args,
    )?;
    Ok(())
}

/// Show index statistics.
fn show_stats(args: &StatsArgs, cli_args: &SegforgeArgs) -> Result<()> {
    let index = open_index(&args.index_path, IndexingSettings::default())?;
    output_result("Index statistics", &index.stats(), cli_args)?;

    if args.segments {
        let segments: Vec<SegmentSummary> = index
            .snapshot()
            .segments()
            .iter()
            .map(|meta| SegmentSummary {
                id: meta.id.to_string(),
                sequence: meta.sequence,
                doc_count: meta.doc_count,
                size_bytes: meta.size_bytes,
                created_at: meta.created_at.to_rfc3339(),
            })
            .collect();
        output_result("Live segments", &segments, cli_args)?;
    }
    Ok(())
}

fn open_storage(path: &Path) -> Result<Arc<dyn Storage>> {
    let storage = FileStorage::new(path, StorageConfig::default())
        .with_context(|| format!("cannot use {} as index directory", path.display()))?;
    Ok(Arc::new(storage))
}

fn open_index(path: &Path, settings: IndexingSettings) -> Result<SearchIndex> {
    if !path.is_dir() {
        bail!("no index directory at {}", path.display());
    }
    SearchIndex::open(open_storage(path)?, settings)
        .with_context(|| format!("failed to open index at {}", path.display()))
}

/// Load settings from the optional file, then apply flag overrides.
fn load_settings(args: &SettingsArgs) -> Result<IndexingSettings> {
    let mut settings = match &args.settings {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("cannot open settings file {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("invalid settings file {}", path.display()))?
        }
        None => IndexingSettings::default(),
    };

    if let Some(mem_mb) = args.maintenance_work_mem_mb {
        settings.maintenance_work_mem_mb = mem_mb;
    }

    settings.validate()?;
    debug!("effective settings: {settings:?}");
    Ok(settings)
}

/// Read one document per non-empty JSONL line.
fn read_documents(path: &Path, key_field: &str) -> Result<Vec<Document>> {
    let file =
        File::open(path).with_context(|| format!("cannot open input file {}", path.display()))?;

    let mut documents = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid JSON", path.display(), line_num + 1))?;
        let document = Document::from_json(&value, key_field)
            .with_context(|| format!("{}:{}", path.display(), line_num + 1))?;
        documents.push(document);
    }

    Ok(documents)
}

fn per_second(count: u64, secs: f64) -> f64 {
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}
