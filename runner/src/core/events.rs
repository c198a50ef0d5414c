//! Lifecycle events dispatched by the test engine.

use serde::{Deserialize, Serialize};

/// Event kinds a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Begin,
    SuiteBegin,
    CaseFailure,
    Complete,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Begin,
        EventKind::SuiteBegin,
        EventKind::CaseFailure,
        EventKind::Complete,
    ];
}

/// Pass/fail counts reported by one engine run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunTotals {
    pub passed: u64,
    pub failed: u64,
    #[serde(alias = "errors")]
    pub errored: u64,
    #[serde(alias = "ignored")]
    pub skipped: u64,
}

impl RunTotals {
    pub fn total(&self) -> u64 {
        self.passed + self.failed + self.errored + self.skipped
    }

    pub fn add(&mut self, other: &RunTotals) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.errored += other.errored;
        self.skipped += other.skipped;
    }
}

/// Outcome of a single test as listed in the completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Ignore,
}

/// One test of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub suite: String,
    pub case: String,
    pub name: String,
    pub result: TestStatus,
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RunEvent {
    Begin,
    SuiteBegin {
        suite: String,
    },
    CaseFailure {
        case: String,
        test: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    Complete {
        #[serde(default)]
        results: RunTotals,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tests: Vec<TestOutcome>,
    },
}

impl RunEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RunEvent::Begin => EventKind::Begin,
            RunEvent::SuiteBegin { .. } => EventKind::SuiteBegin,
            RunEvent::CaseFailure { .. } => EventKind::CaseFailure,
            RunEvent::Complete { .. } => EventKind::Complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_accepts_engine_count_names() {
        let event: RunEvent = serde_json::from_str(
            r#"{"event":"complete","results":{"passed":3,"failed":1,"errors":2,"ignored":4}}"#,
        )
        .expect("parse");
        assert_eq!(
            event,
            RunEvent::Complete {
                results: RunTotals {
                    passed: 3,
                    failed: 1,
                    errored: 2,
                    skipped: 4,
                },
                tests: Vec::new(),
            }
        );
        assert_eq!(event.kind(), EventKind::Complete);
    }

    #[test]
    fn case_failure_stack_is_optional() {
        let event: RunEvent = serde_json::from_str(
            r#"{"event":"case-failure","case":"c","test":"t","message":"boom"}"#,
        )
        .expect("parse");
        assert!(matches!(event, RunEvent::CaseFailure { stack: None, .. }));
    }

    #[test]
    fn complete_lists_individual_tests() {
        let event: RunEvent = serde_json::from_str(
            r#"{"event":"complete","results":{"passed":1},"tests":[{"suite":"s","case":"c","name":"renders","result":"pass"}]}"#,
        )
        .expect("parse");
        let RunEvent::Complete { tests, .. } = event else {
            panic!("expected complete");
        };
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].result, TestStatus::Pass);
    }
}
