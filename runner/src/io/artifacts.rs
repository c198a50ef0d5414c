//! Run artifacts written under the destination directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::aggregate::{AggregateReport, CoverageMap, Verdict};
use crate::core::events::RunTotals;

pub const RESULT_FILE: &str = "result.xml";
pub const SUMMARY_FILE: &str = "summary.json";
pub const COVERAGE_DIR: &str = "coverage";
pub const COVERAGE_FILE: &str = "coverage.json";

/// Paths of the artifacts of one run.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub dest: PathBuf,
    pub result: PathBuf,
    pub summary: PathBuf,
    pub coverage_dir: PathBuf,
    pub coverage: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dest: &Path) -> Self {
        let coverage_dir = dest.join(COVERAGE_DIR);
        Self {
            dest: dest.to_path_buf(),
            result: dest.join(RESULT_FILE),
            summary: dest.join(SUMMARY_FILE),
            coverage: coverage_dir.join(COVERAGE_FILE),
            coverage_dir,
        }
    }
}

/// Remove and recreate the destination directory.
pub fn prepare_destination(dest: &Path, coverage: bool) -> Result<ArtifactPaths> {
    if dest.exists() {
        fs::remove_dir_all(dest).with_context(|| format!("remove {}", dest.display()))?;
    }
    let paths = ArtifactPaths::new(dest);
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    if coverage {
        fs::create_dir_all(&paths.coverage_dir)
            .with_context(|| format!("create {}", paths.coverage_dir.display()))?;
    }
    Ok(paths)
}

/// Summary persisted to `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub target: String,
    pub source: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub runs: usize,
    pub totals: RunTotals,
    pub verdict: Verdict,
    pub failures: usize,
    pub discovery_errors: usize,
    /// Queued items that aborted before completing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aborted: Vec<String>,
}

pub struct SummaryInput<'a> {
    pub target: &'a str,
    pub source: &'a Path,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub report: &'a AggregateReport,
    pub discovery_errors: usize,
    pub aborted: &'a [String],
}

impl RunSummary {
    pub fn new(input: &SummaryInput<'_>) -> Self {
        let duration = input.finished_at - input.started_at;
        Self {
            target: input.target.to_string(),
            source: input.source.display().to_string(),
            start_time: input.started_at.to_rfc3339(),
            end_time: input.finished_at.to_rfc3339(),
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            runs: input.report.runs,
            totals: input.report.totals,
            verdict: input.report.verdict(),
            failures: input.report.failures.len(),
            discovery_errors: input.discovery_errors,
            aborted: input.aborted.to_vec(),
        }
    }
}

pub fn write_report(paths: &ArtifactPaths, report: &str) -> Result<()> {
    write_text(&paths.result, report)
}

pub fn write_summary(paths: &ArtifactPaths, summary: &RunSummary) -> Result<()> {
    write_json(&paths.summary, summary)
}

pub fn write_coverage(paths: &ArtifactPaths, coverage: &CoverageMap) -> Result<()> {
    fs::create_dir_all(&paths.coverage_dir)
        .with_context(|| format!("create {}", paths.coverage_dir.display()))?;
    write_json(&paths.coverage, coverage)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
