//! Plain-text test report for the terminal.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::aggregate::{AggregateReport, FailureDetail};
use crate::core::events::{RunTotals, TestOutcome, TestStatus};

/// Test names that mark a placeholder rather than a real test.
static DEFERRED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(todo|skip|ignore)\b").expect("valid regex"));

fn status_label(test: &TestOutcome) -> &'static str {
    if test.result == TestStatus::Ignore || DEFERRED_NAME.is_match(&test.name) {
        "deferred"
    } else if test.result == TestStatus::Pass {
        "passed"
    } else {
        "FAILED"
    }
}

/// One line per test, in the order the engine listed them.
pub fn render_tests(tests: &[TestOutcome]) -> String {
    let mut out = String::new();
    for test in tests {
        let _ = writeln!(
            out,
            "{:<8}  {} :: {} :: {}",
            status_label(test),
            test.suite,
            test.case,
            test.name
        );
    }
    out
}

/// Failure details, one block per failed test, in occurrence order.
pub fn render_failures(failures: &[FailureDetail]) -> String {
    let mut out = String::new();
    for failure in failures {
        let _ = writeln!(
            out,
            "{} :: {} :: {}",
            failure.suite_name, failure.case_name, failure.test_name
        );
        let detail = failure.stack.as_deref().unwrap_or(&failure.message);
        for line in detail.lines() {
            let _ = writeln!(out, "    {line}");
        }
        out.push('\n');
    }
    out
}

/// Pass rate in percent; zero when nothing ran.
pub fn pass_rate(totals: &RunTotals) -> f64 {
    let total = totals.total();
    if total == 0 {
        return 0.0;
    }
    totals.passed as f64 * 100.0 / total as f64
}

pub fn render_totals(totals: &RunTotals) -> String {
    format!(
        "Total tests: {}  Passed: {}  Deferred: {}  Failed: {}  Errored: {}  Pass rate: {:.2}%",
        totals.total(),
        totals.passed,
        totals.skipped,
        totals.failed,
        totals.errored,
        pass_rate(totals)
    )
}

pub fn render(report: &AggregateReport) -> String {
    let mut out = String::new();
    if !report.tests.is_empty() {
        out.push_str(&render_tests(&report.tests));
        out.push('\n');
    }
    if !report.failures.is_empty() {
        out.push_str("FAILURE DETAILS:\n================\n");
        out.push_str(&render_failures(&report.failures));
    }
    out.push_str(&render_totals(&report.totals));
    out
}

pub fn print_report(report: &AggregateReport) {
    println!("{}", render(report));
}
