//! Error taxonomy for the test pipeline.
//!
//! Fatal categories are variants of [`PipelineError`]; they propagate to the
//! caller and end the pipeline. A [`DiscoveryError`] only describes one file
//! that failed to evaluate and is collected rather than returned. Failing test
//! cases are not errors at all: they are counted in the aggregate report.

use std::path::PathBuf;

/// Fatal pipeline error.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Malformed filter rules or configuration values.
    #[error("config error: {0}")]
    Config(String),
    /// Missing or invalid source/destination path.
    #[error("io error: {0}")]
    Io(String),
    /// No modules matched the requested filter.
    #[error("{0}")]
    Selection(String),
    /// External instrumentation/report tool exited non-zero.
    #[error("subprocess error: {0}")]
    Subprocess(String),
    /// The test engine failed to load or run a batch.
    #[error("engine error: {0}")]
    Engine(String),
    /// One or more queued items could not be run.
    #[error("{} batch(es) aborted: {}", .0.len(), .0.join("; "))]
    BatchAborted(Vec<String>),
}

/// A single script that failed to evaluate during discovery.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} in file: {}", .path.display())]
pub struct DiscoveryError {
    pub path: PathBuf,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_error_names_file() {
        let err = DiscoveryError {
            path: PathBuf::from("/app/bad.js"),
            message: "unterminated string".to_string(),
        };
        assert_eq!(err.to_string(), "unterminated string in file: /app/bad.js");
    }

    #[test]
    fn batch_aborted_lists_items() {
        let err = PipelineError::BatchAborted(vec!["a-tests: boom".to_string()]);
        assert_eq!(err.to_string(), "1 batch(es) aborted: a-tests: boom");
    }
}
