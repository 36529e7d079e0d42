//! JSON output helpers for `--json` code paths.

use anyhow::{Context, Result};

use crate::application::services::deploy_run::RunReport;

/// Format a JSON error object.
///
/// Output (pretty-printed):
/// ```json
/// {
///   "error": true,
///   "message": "...",
///   "code": "..."
/// }
/// ```
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_error(message: &str, code: &str) -> Result<String> {
    let obj = serde_json::json!({
        "error": true,
        "message": message,
        "code": code,
    });
    serde_json::to_string_pretty(&obj).context("JSON serialization failed")
}

/// Format a run report with an overall `ok` flag.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_report(report: &RunReport) -> Result<String> {
    let obj = serde_json::json!({
        "ok": report.succeeded(),
        "environments": report.environments,
    });
    serde_json::to_string_pretty(&obj).context("JSON serialization failed")
}
