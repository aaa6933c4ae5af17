//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::cli::args::{OutputFormat, SegforgeArgs};
use crate::error::Result;

/// Result structure for index creation.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexCreationResult {
    pub path: String,
    pub rows: u64,
    pub workers: usize,
    pub memory_budget_bytes: usize,
    pub segments_built: usize,
    pub segments_live: usize,
    pub merges: usize,
    pub duration_ms: u64,
    pub rows_per_second: f64,
}

/// Result structure for one indexed statement.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatementResult {
    pub rows: u64,
    pub segments_appended: usize,
    pub merges: Option<usize>,
    pub failed_merges: Option<usize>,
    pub merge_error: Option<String>,
    pub segments_live: usize,
    pub generation: u64,
    pub duration_ms: u64,
}

/// Result structure for altering index options.
#[derive(Debug, Serialize, Deserialize)]
pub struct AlterResult {
    pub target_segment_count: usize,
    pub merge_on_insert: bool,
}

/// Summary of one live segment.
#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub id: String,
    pub sequence: u64,
    pub doc_count: u64,
    pub size_bytes: u64,
    pub created_at: String,
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &SegforgeArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &SegforgeArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;
    for line in human_lines(&value) {
        println!("{line}");
    }
    Ok(())
}

fn human_lines(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Object(obj) => obj
            .iter()
            .map(|(key, val)| {
                let formatted = match val.as_u64() {
                    Some(bytes) if key.ends_with("_bytes") => format_bytes(bytes),
                    _ => format_value(val),
                };
                format!("{key}: {formatted}")
            })
            .collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .enumerate()
            .flat_map(|(i, item)| {
                let mut lines = vec![format!("[{i}]")];
                lines.extend(human_lines(item).into_iter().map(|l| format!("  {l}")));
                lines
            })
            .collect(),
        _ => vec![format_value(value)],
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &SegforgeArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

/// Format a JSON value for display.
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(arr) => {
            let formatted_values = arr.iter().map(format_value).collect::<Vec<_>>().join(", ");
            format!("[{formatted_values}]")
        }
        serde_json::Value::Object(_) => "[object]".to_string(),
        serde_json::Value::Null => "-".to_string(),
    }
}

/// Format bytes into human-readable format.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS[unit_index];
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1048576), "1.0 MB");
        assert_eq!(format_bytes(1073741824), "1.0 GB");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!("test")), "test");
        assert_eq!(format_value(&json!(42)), "42");
        assert_eq!(format_value(&json!(false)), "false");
        assert_eq!(format_value(&json!([1, 2])), "[1, 2]");
        assert_eq!(format_value(&serde_json::Value::Null), "-");
    }

    #[test]
    fn test_human_lines_format_byte_fields() {
        let lines = human_lines(&json!({
            "segments": 3,
            "size_bytes": 2048,
            "merges": null,
        }));

        assert!(lines.contains(&"segments: 3".to_string()));
        assert!(lines.contains(&"size_bytes: 2.0 KB".to_string()));
        assert!(lines.contains(&"merges: -".to_string()));
    }

    #[test]
    fn test_human_lines_for_lists() {
        let lines = human_lines(&json!([{ "id": "a" }, { "id": "b" }]));
        assert_eq!(lines, vec!["[0]", "  id: a", "[1]", "  id: b"]);
    }
}
