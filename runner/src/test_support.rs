//! Test-only helpers: a scripted engine backend and fixture writers.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use crate::core::aggregate::{CoverageMap, ENVELOPE_CLOSE, ENVELOPE_OPEN};
use crate::core::events::{RunEvent, RunTotals, TestOutcome, TestStatus};
use crate::io::config::FrameworkConfig;
use crate::io::engine::{EngineBackend, EngineError, ExecutionContext};

/// One scripted engine run.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRun {
    pub load_error: Option<String>,
    pub events: Vec<RunEvent>,
    pub report: String,
    pub coverage: CoverageMap,
}

impl ScriptedRun {
    /// A run of one suite with `passed` passing cases and one failing case
    /// per entry of `failing`.
    pub fn suite(suite: &str, passed: u64, failing: &[&str]) -> Self {
        let mut events = vec![
            RunEvent::Begin,
            RunEvent::SuiteBegin {
                suite: suite.to_string(),
            },
        ];
        events.extend(failing.iter().map(|test| RunEvent::CaseFailure {
            case: format!("{suite} case"),
            test: test.to_string(),
            message: format!("{test} failed"),
            stack: None,
        }));
        let outcome = |name: String, result| TestOutcome {
            suite: suite.to_string(),
            case: format!("{suite} case"),
            name,
            result,
        };
        let tests = (0..passed)
            .map(|n| outcome(format!("test {n}"), TestStatus::Pass))
            .chain(
                failing
                    .iter()
                    .map(|test| outcome(test.to_string(), TestStatus::Fail)),
            )
            .collect();
        events.push(RunEvent::Complete {
            results: RunTotals {
                passed,
                failed: failing.len() as u64,
                ..RunTotals::default()
            },
            tests,
        });
        Self {
            events,
            report: report_fragment(suite),
            ..Self::default()
        }
    }

    pub fn load_error(message: &str) -> Self {
        Self {
            load_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// A run that starts but never reports completion.
    pub fn hung(suite: &str) -> Self {
        Self {
            events: vec![
                RunEvent::Begin,
                RunEvent::SuiteBegin {
                    suite: suite.to_string(),
                },
            ],
            ..Self::default()
        }
    }

    pub fn with_coverage(mut self, file: &str, record: serde_json::Value) -> Self {
        self.coverage.insert(file.to_string(), record);
        self
    }
}

/// Backend that replays scripted runs in order and records what was loaded.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    pending: VecDeque<ScriptedRun>,
    current: Option<ScriptedRun>,
    loaded: Vec<ExecutionContext>,
    clears: usize,
}

impl ScriptedBackend {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            pending: runs.into(),
            ..Self::default()
        }
    }

    pub fn loaded(&self) -> &[ExecutionContext] {
        &self.loaded
    }

    pub fn clears(&self) -> usize {
        self.clears
    }
}

impl EngineBackend for ScriptedBackend {
    fn clear(&mut self) {
        self.current = None;
        self.clears += 1;
    }

    fn load(&mut self, context: &ExecutionContext) -> Result<(), EngineError> {
        self.loaded.push(context.clone());
        let run = self
            .pending
            .pop_front()
            .ok_or_else(|| EngineError::Backend("no scripted run left".to_string()))?;
        if let Some(message) = &run.load_error {
            return Err(EngineError::Load(message.clone()));
        }
        self.current = Some(run);
        Ok(())
    }

    fn run(&mut self, emit: &mut dyn FnMut(RunEvent)) -> Result<(), EngineError> {
        let run = self
            .current
            .as_ref()
            .ok_or_else(|| EngineError::Backend("nothing loaded".to_string()))?;
        for event in run.events.clone() {
            emit(event);
        }
        Ok(())
    }

    fn report_fragment(&self) -> Result<String, EngineError> {
        Ok(self
            .current
            .as_ref()
            .map(|run| run.report.clone())
            .unwrap_or_default())
    }

    fn coverage_fragment(&self) -> Result<CoverageMap, EngineError> {
        Ok(self
            .current
            .as_ref()
            .map(|run| run.coverage.clone())
            .unwrap_or_default())
    }
}

/// A single-suite report document.
pub fn report_fragment(suite: &str) -> String {
    format!(r#"{ENVELOPE_OPEN}<testsuite name="{suite}"></testsuite>{ENVELOPE_CLOSE}"#)
}

/// Write a script registering `name` with `requires`.
pub fn write_module(path: &Path, name: &str, requires: &[&str]) {
    let requires = requires
        .iter()
        .map(|req| format!("'{req}'"))
        .collect::<Vec<_>>()
        .join(", ");
    let source = format!(
        "YUI.add('{name}', function (Y, NAME) {{\n    Y.namespace('{name}');\n}}, '0.0.1', {{requires: [{requires}]}});\n"
    );
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create module dir");
    }
    fs::write(path, source).expect("write module");
}

/// Write the founding modules of the default framework layout under `root`.
pub fn write_framework(root: &Path) {
    for module in FrameworkConfig::default().modules {
        let requires: Vec<&str> = module.requires.iter().map(String::as_str).collect();
        write_module(&root.join(&module.path), &module.name, &requires);
    }
}
