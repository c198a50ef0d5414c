//! Batch orchestration against one engine session.
//!
//! Every run follows the same sequence: clear the session, load a fresh
//! execution context, subscribe a [`RunCollector`] to all lifecycle events,
//! run, and hand the finished [`RunResult`] to the aggregator. The next run
//! starts only after the previous one has reported completion.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::aggregate::{
    AggregateReport, CoverageMap, FailureDetail, ResultAggregator, RunResult,
};
use crate::core::events::{EventKind, RunEvent, RunTotals, TestOutcome};
use crate::core::registry::ModuleRegistry;
use crate::core::selector::Batch;
use crate::error::PipelineError;
use crate::io::engine::{
    EngineBackend, EngineError, EngineSession, ExecutionContext, ListenerFlow, RunListener,
};

/// How a batch is split into engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// The whole batch in a single run.
    Monolithic,
    /// One run per selected module, each paired with the founding set.
    Queued,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Monolithic => "monolithic",
            Strategy::Queued => "queued",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "monolithic" => Ok(Strategy::Monolithic),
            "queued" => Ok(Strategy::Queued),
            other => Err(PipelineError::Config(format!(
                "unknown strategy [{other}], expected monolithic or queued"
            ))),
        }
    }
}

/// Listener that records one run's suite, failures and totals.
#[derive(Debug, Default)]
pub struct RunCollector {
    suite: String,
    failures: Vec<FailureDetail>,
    tests: Vec<TestOutcome>,
    totals: Option<RunTotals>,
}

impl RunCollector {
    pub fn completed(&self) -> bool {
        self.totals.is_some()
    }
}

impl RunListener for RunCollector {
    fn on_event(&mut self, event: &RunEvent) -> ListenerFlow {
        match event {
            RunEvent::Begin => {}
            RunEvent::SuiteBegin { suite } => self.suite.clone_from(suite),
            RunEvent::CaseFailure {
                case,
                test,
                message,
                stack,
            } => self.failures.push(FailureDetail {
                suite_name: self.suite.clone(),
                case_name: case.clone(),
                test_name: test.clone(),
                message: message.clone(),
                stack: stack.clone(),
            }),
            RunEvent::Complete { results, tests } => {
                self.totals = Some(*results);
                self.tests.clone_from(tests);
                return ListenerFlow::Detach;
            }
        }
        ListenerFlow::Continue
    }
}

/// What a batch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestrationOutcome {
    pub report: AggregateReport,
    /// Queued items that could not be run, as `name: reason`.
    pub aborted: Vec<String>,
}

/// Owns the engine session and the aggregator for one pipeline.
pub struct BatchOrchestrator<B: EngineBackend> {
    session: EngineSession<B>,
    aggregator: ResultAggregator,
    coverage: bool,
}

impl<B: EngineBackend> BatchOrchestrator<B> {
    pub fn new(backend: B, coverage: bool) -> Self {
        Self {
            session: EngineSession::new(backend),
            aggregator: ResultAggregator::new(),
            coverage,
        }
    }

    pub fn session(&self) -> &EngineSession<B> {
        &self.session
    }

    /// Run `batch` and call `on_complete` after each finished run.
    ///
    /// A monolithic run that fails to load or complete is fatal. A queued
    /// item that does so is recorded in [`OrchestrationOutcome::aborted`]
    /// and the queue moves on.
    #[instrument(skip_all, fields(%strategy, modules = batch.len()))]
    pub fn run(
        &mut self,
        batch: &Batch,
        registry: &ModuleRegistry,
        strategy: Strategy,
        on_complete: &mut dyn FnMut(&RunResult),
    ) -> Result<OrchestrationOutcome, PipelineError> {
        let mut aborted = Vec::new();
        match strategy {
            Strategy::Monolithic => {
                let entries = batch.names().to_vec();
                let result = self
                    .run_once(entries, registry)
                    .map_err(|err| PipelineError::Engine(err.to_string()))?;
                self.complete(result, on_complete);
            }
            Strategy::Queued => {
                let mut queue: VecDeque<&String> = batch.selected().collect();
                while let Some(name) = queue.pop_front() {
                    let mut entries = batch.founding().to_vec();
                    entries.push(name.clone());
                    match self.run_once(entries, registry) {
                        Ok(result) => self.complete(result, on_complete),
                        Err(err) => {
                            warn!(module = %name, %err, "queued run aborted");
                            aborted.push(format!("{name}: {err}"));
                        }
                    }
                    debug!(remaining = queue.len(), "queue advanced");
                }
            }
        }
        Ok(OrchestrationOutcome {
            report: mem::take(&mut self.aggregator).finish(),
            aborted,
        })
    }

    fn complete(&mut self, result: RunResult, on_complete: &mut dyn FnMut(&RunResult)) {
        info!(
            entries = ?result.entries,
            passed = result.totals.passed,
            failed = result.totals.failed,
            "run complete"
        );
        on_complete(&result);
        self.aggregator.add(result);
    }

    fn run_once(
        &mut self,
        entries: Vec<String>,
        registry: &ModuleRegistry,
    ) -> Result<RunResult, EngineError> {
        self.session.clear();
        let context = ExecutionContext::resolve(registry, &entries, self.coverage);
        if !context.external.is_empty() {
            debug!(external = ?context.external, "names left for the engine to resolve");
        }
        self.session.load(&context)?;

        let collector = Rc::new(RefCell::new(RunCollector::default()));
        let subscriptions: Vec<_> = EventKind::ALL
            .into_iter()
            .map(|kind| (kind, self.session.subscribe(kind, collector.clone())))
            .collect();
        let outcome = self.session.run();
        // No-ops once the collector detached itself on completion.
        for (kind, id) in subscriptions {
            self.session.unsubscribe(kind, id);
        }
        outcome?;

        let mut collected = collector.borrow_mut();
        let totals = collected.totals.ok_or_else(|| {
            EngineError::Incomplete("engine finished without reporting results".to_string())
        })?;
        let coverage_fragment = if self.coverage {
            self.session.coverage_fragment()?
        } else {
            CoverageMap::new()
        };
        Ok(RunResult {
            entries,
            totals,
            failures: mem::take(&mut collected.failures),
            tests: mem::take(&mut collected.tests),
            report_fragment: self.session.report_fragment()?,
            coverage_fragment,
        })
    }
}
