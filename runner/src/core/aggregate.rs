//! Merging of per-run results into one report and verdict.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::events::{RunTotals, TestOutcome};

/// Per-file coverage records keyed by file path.
pub type CoverageMap = BTreeMap<String, serde_json::Value>;

/// Opening of the shared report envelope.
pub const ENVELOPE_OPEN: &str = r#"<?xml version="1.0" encoding="UTF-8"?><testsuites>"#;
/// Closing of the shared report envelope.
pub const ENVELOPE_CLOSE: &str = "</testsuites>";

static ENVELOPE_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:<\?xml[^>]*\?>)?\s*<testsuites(?:\s[^>]*)?>").expect("valid regex")
});
static ENVELOPE_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</testsuites>\s*$").expect("valid regex"));
static ENVELOPE_EMPTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:<\?xml[^>]*\?>)?\s*<testsuites(?:\s[^>]*)?/>\s*$").expect("valid regex")
});

/// A failing test case, recorded in the order failures occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    pub suite_name: String,
    pub case_name: String,
    pub test_name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Output of one engine run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    /// Module names the run was started with.
    pub entries: Vec<String>,
    pub totals: RunTotals,
    pub failures: Vec<FailureDetail>,
    /// Individual tests, when the engine lists them.
    pub tests: Vec<TestOutcome>,
    pub report_fragment: String,
    pub coverage_fragment: CoverageMap,
}

/// Final pass/fail decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Failed,
}

/// Everything accumulated across runs, in completion order.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateReport {
    pub runs: usize,
    pub totals: RunTotals,
    pub failures: Vec<FailureDetail>,
    pub tests: Vec<TestOutcome>,
    pub report: String,
    pub coverage: CoverageMap,
}

impl AggregateReport {
    /// Success iff no test case failed in any run.
    pub fn verdict(&self) -> Verdict {
        if self.totals.failed == 0 {
            Verdict::Passed
        } else {
            Verdict::Failed
        }
    }
}

/// Accumulates run results strictly in the order they are handed in.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    runs: usize,
    totals: RunTotals,
    failures: Vec<FailureDetail>,
    tests: Vec<TestOutcome>,
    bodies: Vec<String>,
    coverage: CoverageMap,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: RunResult) {
        self.runs += 1;
        self.totals.add(&result.totals);
        self.failures.extend(result.failures);
        self.tests.extend(result.tests);
        self.bodies.push(fragment_body(&result.report_fragment).to_string());
        // Later runs overwrite earlier records for the same file.
        self.coverage.extend(result.coverage_fragment);
    }

    pub fn runs(&self) -> usize {
        self.runs
    }

    pub fn totals(&self) -> &RunTotals {
        &self.totals
    }

    pub fn failures(&self) -> &[FailureDetail] {
        &self.failures
    }

    /// One well-formed document wrapping every run's suites.
    pub fn merged_report(&self) -> String {
        let mut merged = String::from(ENVELOPE_OPEN);
        for body in &self.bodies {
            merged.push_str(body);
        }
        merged.push_str(ENVELOPE_CLOSE);
        merged
    }

    pub fn finish(self) -> AggregateReport {
        let report = self.merged_report();
        AggregateReport {
            runs: self.runs,
            totals: self.totals,
            failures: self.failures,
            tests: self.tests,
            report,
            coverage: self.coverage,
        }
    }
}

/// Strip the envelope markers from a report fragment.
pub fn fragment_body(fragment: &str) -> &str {
    if ENVELOPE_EMPTY.is_match(fragment) {
        return "";
    }
    let start = ENVELOPE_HEAD.find(fragment).map_or(0, |m| m.end());
    let rest = &fragment[start..];
    let end = ENVELOPE_TAIL.find(rest).map_or(rest.len(), |m| m.start());
    &rest[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(suite: &str) -> String {
        format!(r#"{ENVELOPE_OPEN}<testsuite name="{suite}"></testsuite>{ENVELOPE_CLOSE}"#)
    }

    fn result(passed: u64, failed: u64, suite: &str) -> RunResult {
        RunResult {
            entries: vec![suite.to_string()],
            totals: RunTotals {
                passed,
                failed,
                ..RunTotals::default()
            },
            failures: (0..failed)
                .map(|n| FailureDetail {
                    suite_name: suite.to_string(),
                    case_name: "case".to_string(),
                    test_name: format!("test{n}"),
                    message: "boom".to_string(),
                    stack: None,
                })
                .collect(),
            tests: Vec::new(),
            report_fragment: fragment(suite),
            coverage_fragment: CoverageMap::new(),
        }
    }

    #[test]
    fn merged_report_has_one_envelope_in_completion_order() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add(result(1, 0, "first"));
        aggregator.add(result(1, 0, "second"));
        let report = aggregator.merged_report();
        assert_eq!(report.matches("<testsuites>").count(), 1);
        assert_eq!(report.matches("</testsuites>").count(), 1);
        assert_eq!(report.matches("<?xml").count(), 1);
        let first = report.find(r#"name="first""#).expect("first suite");
        let second = report.find(r#"name="second""#).expect("second suite");
        assert!(first < second);
    }

    #[test]
    fn fragment_body_handles_variants() {
        assert_eq!(fragment_body("<testsuites><a/></testsuites>\n"), "<a/>");
        assert_eq!(
            fragment_body("<?xml version=\"1.0\"?>\n<testsuites name=\"x\">\n<a/>\n</testsuites>"),
            "\n<a/>\n"
        );
        assert_eq!(fragment_body(r#"<?xml version="1.0"?><testsuites/>"#), "");
        assert_eq!(fragment_body(""), "");
        assert_eq!(fragment_body("<testsuite/>"), "<testsuite/>");
    }

    #[test]
    fn coverage_later_run_wins_per_file() {
        let mut aggregator = ResultAggregator::new();
        let mut first = result(1, 0, "a");
        first
            .coverage_fragment
            .insert("/a.js".to_string(), serde_json::json!({"lines": 1}));
        first
            .coverage_fragment
            .insert("/b.js".to_string(), serde_json::json!({"lines": 1}));
        let mut second = result(1, 0, "b");
        second
            .coverage_fragment
            .insert("/a.js".to_string(), serde_json::json!({"lines": 2}));
        aggregator.add(first);
        aggregator.add(second);
        let report = aggregator.finish();
        assert_eq!(report.coverage["/a.js"], serde_json::json!({"lines": 2}));
        assert_eq!(report.coverage.len(), 2);
    }

    #[test]
    fn verdict_depends_only_on_failed_count() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add(result(3, 0, "a"));
        let mut skipped = result(0, 0, "b");
        skipped.totals.skipped = 2;
        skipped.totals.errored = 1;
        aggregator.add(skipped);
        assert_eq!(aggregator.finish().verdict(), Verdict::Passed);

        let mut aggregator = ResultAggregator::new();
        aggregator.add(result(3, 0, "a"));
        aggregator.add(result(0, 1, "b"));
        let report = aggregator.finish();
        assert_eq!(report.verdict(), Verdict::Failed);
        assert_eq!(report.totals.passed, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.runs, 2);
    }
}
