//! Isolated evaluation of script files for their registrations.
//!
//! A sandbox is created once per discovery pass and reused for every file.
//! The only capability it exposes to a script is the registration call; each
//! evaluation returns exactly the registrations of that file, so nothing one
//! file declares can leak into the next.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::core::declaration::{Registration, ScanError, Scanner};

/// Evaluates one script at a time and reports its registrations.
pub trait Sandbox {
    fn evaluate(&mut self, path: &Path) -> Result<Vec<Registration>, String>;
}

/// Sandbox that reads registrations statically instead of executing code.
///
/// Each file is bounded by a size limit and a wall-clock budget.
#[derive(Debug)]
pub struct DeclarationSandbox {
    scanner: Scanner,
    max_file_bytes: u64,
    per_file_timeout: Duration,
}

impl DeclarationSandbox {
    pub fn new(registration_call: &str, max_file_bytes: u64, per_file_timeout: Duration) -> Self {
        Self {
            scanner: Scanner::new(registration_call),
            max_file_bytes,
            per_file_timeout,
        }
    }
}

impl Sandbox for DeclarationSandbox {
    fn evaluate(&mut self, path: &Path) -> Result<Vec<Registration>, String> {
        let len = fs::metadata(path).map_err(|err| err.to_string())?.len();
        if len > self.max_file_bytes {
            return Err(format!(
                "file is {len} bytes, larger than the {} byte limit",
                self.max_file_bytes
            ));
        }
        let source = fs::read_to_string(path).map_err(|err| err.to_string())?;
        let deadline = Instant::now() + self.per_file_timeout;
        self.scanner
            .scan(&source, &mut || Instant::now() >= deadline)
            .map_err(|err| match err {
                ScanError::Interrupted { .. } => {
                    format!("evaluation timed out after {:?}", self.per_file_timeout)
                }
                other => other.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_files_independently() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = temp.path().join("a.js");
        let second = temp.path().join("b.js");
        fs::write(&first, "YUI.add('a', function () {}, '1', {requires: ['x']});").expect("write");
        fs::write(&second, "console.log('no registration');").expect("write");

        let mut sandbox = DeclarationSandbox::new("YUI.add", 1_000, Duration::from_secs(1));
        assert_eq!(sandbox.evaluate(&first).expect("first").len(), 1);
        assert!(sandbox.evaluate(&second).expect("second").is_empty());
    }

    #[test]
    fn oversized_files_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("big.js");
        fs::write(&path, "x".repeat(64)).expect("write");
        let mut sandbox = DeclarationSandbox::new("YUI.add", 10, Duration::from_secs(1));
        let err = sandbox.evaluate(&path).unwrap_err();
        assert!(err.contains("byte limit"));
    }

    #[test]
    fn expired_budget_reports_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("long.js");
        fs::write(&path, "a ".repeat(10_000)).expect("write");
        let mut sandbox = DeclarationSandbox::new("YUI.add", 1_000_000, Duration::ZERO);
        let err = sandbox.evaluate(&path).unwrap_err();
        assert!(err.contains("timed out"));
    }
}
