//! Worker output protocol.
//!
//! The worker logs freely on stdout and, on success, prints one JSON line
//! `{"success": true, "output_path": "..."}`. Only the last stdout line
//! containing `{` is considered, wherever it appears among the log lines.
//! On failure the worker exits non-zero with a traceback on stderr and may
//! print `{"success": false, "error": "..."}` there.

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::types::ExecutionRecord;
use crate::error::BridgeError;

/// Characters of raw stdout kept in [`BridgeError::InvalidOutput`].
pub const DIAGNOSTIC_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct WorkerRecord {
    success: bool,
    #[serde(default)]
    output_path: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Classify a finished worker run into its output path or a typed failure.
pub fn parse_execution(record: &ExecutionRecord) -> Result<PathBuf, BridgeError> {
    match record.exit_code {
        Some(0) => parse_success_record(&record.stdout),
        _ => Err(BridgeError::GenerationFailed(record.failure_detail())),
    }
}

/// Scan stdout backward for the last `{` line and read the success record from it.
pub fn parse_success_record(stdout: &str) -> Result<PathBuf, BridgeError> {
    let record = stdout
        .lines()
        .rev()
        .find(|line| line.contains('{'))
        .and_then(|line| serde_json::from_str::<WorkerRecord>(line.trim()).ok());

    match record {
        Some(WorkerRecord {
            success: true,
            output_path: Some(path),
            ..
        }) => Ok(PathBuf::from(path)),
        _ => Err(BridgeError::InvalidOutput(preview(stdout))),
    }
}

/// The `error` field of a `{"success": false, ...}` line on stderr, if any.
pub fn worker_reported_error(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .filter(|line| line.contains('{'))
        .filter_map(|line| serde_json::from_str::<WorkerRecord>(line.trim()).ok())
        .find(|record| !record.success)
        .and_then(|record| record.error)
}

fn preview(output: &str) -> String {
    output.chars().take(DIAGNOSTIC_PREVIEW_CHARS).collect()
}
