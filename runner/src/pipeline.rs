//! The `test` command end to end.
//!
//! Resolve the target, prepare the destination, optionally instrument a
//! copy for coverage, build the module registry, select the batch, run it,
//! and write the merged artifacts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::console;
use crate::core::aggregate::{AggregateReport, Verdict};
use crate::core::filter::{PathFilter, RuleSpec};
use crate::core::registry::{ModuleRecord, ModuleRegistry};
use crate::core::selector::select;
use crate::error::PipelineError;
use crate::io::artifacts::{
    self, ArtifactPaths, RunSummary, SummaryInput, prepare_destination,
};
use crate::io::config::RunnerConfig;
use crate::io::discovery::{Discovery, ModuleDiscoverer};
use crate::io::engine::{EngineBackend, ProcessBackend};
use crate::io::instrument::{CoverageTools, CoverageWorkspace};
use crate::io::store::{StoreRequest, store_from_config};
use crate::orchestrate::{BatchOrchestrator, Strategy};

/// Directories searched for a mojit named on the command line.
const MOJIT_SEARCH_DIRS: [&str; 2] = ["mojits", "."];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A whole application.
    App,
    /// A single component directory.
    Mojit,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::App => "app",
            TargetKind::Mojit => "mojit",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "app" => Ok(TargetKind::App),
            "mojit" => Ok(TargetKind::Mojit),
            _ => Err(PipelineError::Config("Invalid test type".to_string())),
        }
    }
}

/// Options of one `test` invocation.
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub kind: TargetKind,
    /// Target path; defaults to the working directory for apps.
    pub path: Option<PathBuf>,
    /// Directory relative paths are resolved against.
    pub cwd: PathBuf,
    pub dest: PathBuf,
    pub coverage: bool,
    /// Parent of the coverage workspace; the system temp dir when unset.
    pub tmpdir: Option<PathBuf>,
    /// Allow-list of module names; empty selects every test module.
    pub test_names: Vec<String>,
    /// Overrides the configured strategy for the target kind.
    pub strategy: Option<Strategy>,
}

impl TestOptions {
    pub fn new(kind: TargetKind, cwd: &Path) -> Self {
        Self {
            kind,
            path: None,
            cwd: cwd.to_path_buf(),
            dest: PathBuf::from("artifacts/test"),
            coverage: false,
            tmpdir: None,
            test_names: Vec::new(),
            strategy: None,
        }
    }
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub source: PathBuf,
    pub strategy: Strategy,
    pub report: AggregateReport,
    pub paths: ArtifactPaths,
    pub discovery_errors: usize,
}

impl PipelineOutcome {
    pub fn verdict(&self) -> Verdict {
        self.report.verdict()
    }

    pub fn message(&self) -> &'static str {
        match self.verdict() {
            Verdict::Passed => "Passed.",
            Verdict::Failed => "Failed.",
        }
    }
}

/// Run the `test` command with the configured engine command.
pub fn run_test(config: &RunnerConfig, options: &TestOptions) -> Result<PipelineOutcome> {
    let backend = ProcessBackend::new(&config.engine, options.tmpdir.clone());
    run_test_with(config, options, backend)
}

/// Run the `test` command against `backend`.
#[instrument(skip_all, fields(kind = %options.kind, coverage = options.coverage))]
pub fn run_test_with<B: EngineBackend>(
    config: &RunnerConfig,
    options: &TestOptions,
    backend: B,
) -> Result<PipelineOutcome> {
    let started_at = Utc::now();
    let source = resolve_source(options)?;
    let framework_root = resolve_framework_root(config, options, &source)?;
    let strategy = options.strategy.unwrap_or(match options.kind {
        TargetKind::App => config.selection.strategy_app,
        TargetKind::Mojit => config.selection.strategy_mojit,
    });
    info!(source = %source.display(), %strategy, "starting test run");

    let paths = prepare_destination(&options.cwd.join(&options.dest), options.coverage)?;

    let tools = CoverageTools::new(config.coverage.clone());
    let workspace = if options.coverage {
        Some(CoverageWorkspace::create(options.tmpdir.as_deref())?)
    } else {
        None
    };
    let instrumented = match &workspace {
        Some(workspace) => {
            Some(tools.instrument(&source, workspace, options.kind == TargetKind::App)?)
        }
        None => None,
    };

    let mut discovery = match options.kind {
        TargetKind::Mojit => discover_mojit(config, &source, instrumented.as_deref())?,
        TargetKind::App => {
            let request = StoreRequest {
                app_root: instrumented.clone().unwrap_or_else(|| source.clone()),
                framework_root: framework_root.clone(),
                env: config.store.env().to_string(),
            };
            store_from_config(&config.store, &config.discovery).load(&request)?
        }
    };
    overlay_founding(config, &framework_root, &mut discovery.registry);
    let discovery_errors = discovery.errors.len();

    let founding = config.framework.founding_names();
    let batch = select(&discovery.registry, &options.test_names, &founding).map_err(|err| {
        debug!(%err, "selection failed");
        PipelineError::Selection(format!("No {} tests found", options.kind))
    })?;
    info!(modules = batch.len(), "selected batch");

    let mut orchestrator = BatchOrchestrator::new(backend, options.coverage);
    let outcome = orchestrator.run(&batch, &discovery.registry, strategy, &mut |result| {
        debug!(entries = ?result.entries, failures = result.failures.len(), "run finished");
    })?;
    let report = outcome.report;

    artifacts::write_report(&paths, &report.report)?;
    let summary = RunSummary::new(&SummaryInput {
        target: options.kind.as_str(),
        source: &source,
        started_at,
        finished_at: Utc::now(),
        report: &report,
        discovery_errors,
        aborted: &outcome.aborted,
    });
    artifacts::write_summary(&paths, &summary)?;
    println!("Test result written to {}", paths.result.display());
    console::print_report(&report);

    if options.coverage {
        artifacts::write_coverage(&paths, &report.coverage)?;
        tools.report(&paths.coverage, &paths.coverage_dir)?;
        println!("Coverage report written to {}", paths.coverage_dir.display());
    }
    drop(workspace);

    if !outcome.aborted.is_empty() {
        return Err(PipelineError::BatchAborted(outcome.aborted).into());
    }
    Ok(PipelineOutcome {
        source,
        strategy,
        report,
        paths,
        discovery_errors,
    })
}

fn resolve_source(options: &TestOptions) -> Result<PathBuf, PipelineError> {
    let source = match (options.kind, &options.path) {
        (TargetKind::App, None) => options.cwd.clone(),
        (TargetKind::App, Some(path)) => options.cwd.join(path),
        (TargetKind::Mojit, None) => {
            return Err(PipelineError::Io("Please specify a mojit.".to_string()));
        }
        (TargetKind::Mojit, Some(path)) => MOJIT_SEARCH_DIRS
            .iter()
            .map(|dir| options.cwd.join(dir).join(path))
            .find(|candidate| candidate.is_dir())
            .ok_or_else(|| PipelineError::Io("Could not find mojit.".to_string()))?,
    };
    if !source.is_dir() {
        return Err(PipelineError::Io("Invalid source directory.".to_string()));
    }
    Ok(source)
}

/// Framework checkout of the target: next to the application for apps, in
/// the working directory for mojits.
fn resolve_framework_root(
    config: &RunnerConfig,
    options: &TestOptions,
    source: &Path,
) -> Result<PathBuf, PipelineError> {
    let base = match options.kind {
        TargetKind::App => source,
        TargetKind::Mojit => options.cwd.as_path(),
    };
    let root = config.framework_root(base);
    if !root.is_dir() {
        return Err(PipelineError::Io(format!(
            "framework must be installed locally (looked in {})",
            root.display()
        )));
    }
    Ok(root)
}

fn discover_mojit(
    config: &RunnerConfig,
    source: &Path,
    instrumented: Option<&Path>,
) -> Result<Discovery, PipelineError> {
    let mut discoverer = ModuleDiscoverer::from_config(&config.discovery);
    let filter = PathFilter::compile(&config.discovery.exclude, false)?;
    let mut discovery = discoverer.discover(&[source.to_path_buf()], &filter)?;

    if let Some(instrumented) = instrumented {
        let mut rules = config.discovery.exclude.clone();
        rules.push(RuleSpec::exclude(r"-tests\.js$"));
        let filter = PathFilter::compile(&rules, false)?;
        let covered = discoverer.discover(&[instrumented.to_path_buf()], &filter)?;
        debug!(modules = covered.registry.len(), "instrumented modules override sources");
        discovery.errors.extend(covered.errors);
        // Instrumented copies replace their sources.
        let replaced = discovery.registry.merge(covered.registry);
        debug!(replaced = replaced.len(), "merged instrumented registry");
    }
    Ok(discovery)
}

fn overlay_founding(config: &RunnerConfig, framework_root: &Path, registry: &mut ModuleRegistry) {
    for module in &config.framework.modules {
        let record = ModuleRecord {
            name: module.name.clone(),
            fullpath: framework_root.join(&module.path),
            requires: module.requires.clone(),
        };
        if !record.fullpath.is_file() {
            warn!(
                name = %record.name,
                path = %record.fullpath.display(),
                "founding module file is missing"
            );
        }
        registry.insert(record);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::{ScriptedBackend, ScriptedRun, write_framework, write_module};

    #[test]
    fn target_kind_parses() {
        assert_eq!("mojit".parse::<TargetKind>().expect("kind"), TargetKind::Mojit);
        let err = "widget".parse::<TargetKind>().unwrap_err();
        assert!(err.to_string().contains("Invalid test type"));
    }

    #[test]
    fn mojit_is_found_under_mojits_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("mojits/Foo")).expect("mkdir");
        let mut options = TestOptions::new(TargetKind::Mojit, temp.path());
        options.path = Some(PathBuf::from("Foo"));
        assert_eq!(
            resolve_source(&options).expect("source"),
            temp.path().join("mojits/Foo")
        );

        options.path = Some(PathBuf::from("Bar"));
        let err = resolve_source(&options).unwrap_err();
        assert!(err.to_string().contains("Could not find mojit."));
    }

    #[test]
    fn app_source_must_be_a_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut options = TestOptions::new(TargetKind::App, temp.path());
        options.path = Some(PathBuf::from("missing"));
        let err = resolve_source(&options).unwrap_err();
        assert!(err.to_string().contains("Invalid source directory."));
    }

    #[test]
    fn mojit_pipeline_writes_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cwd = temp.path();
        write_framework(&cwd.join("node_modules/mojito"));
        write_module(&cwd.join("mojits/Foo/controller.common.js"), "Foo", &[]);
        write_module(
            &cwd.join("mojits/Foo/tests/controller.common-tests.js"),
            "Foo-tests",
            &["Foo", "mojito-test"],
        );

        let mut options = TestOptions::new(TargetKind::Mojit, cwd);
        options.path = Some(PathBuf::from("Foo"));
        let backend = ScriptedBackend::new(vec![ScriptedRun::suite("Foo", 2, &[])]);
        let outcome = run_test_with(&RunnerConfig::default(), &options, backend).expect("run");

        assert_eq!(outcome.strategy, Strategy::Monolithic);
        assert_eq!(outcome.message(), "Passed.");
        let xml = fs::read_to_string(cwd.join("artifacts/test/result.xml")).expect("result");
        assert!(xml.contains(r#"<testsuite name="Foo">"#));
        assert!(cwd.join("artifacts/test/summary.json").is_file());
    }

    #[test]
    fn mojit_without_tests_is_a_selection_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cwd = temp.path();
        write_framework(&cwd.join("node_modules/mojito"));
        write_module(&cwd.join("mojits/Foo/controller.common.js"), "Foo", &[]);

        let mut options = TestOptions::new(TargetKind::Mojit, cwd);
        options.path = Some(PathBuf::from("Foo"));
        let err = run_test_with(&RunnerConfig::default(), &options, ScriptedBackend::default())
            .unwrap_err();
        let err = err.downcast_ref::<PipelineError>().expect("pipeline error");
        assert!(matches!(err, PipelineError::Selection(msg) if msg == "No mojit tests found"));
    }

    #[test]
    fn missing_framework_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("mojits/Foo")).expect("mkdir");
        let mut options = TestOptions::new(TargetKind::Mojit, temp.path());
        options.path = Some(PathBuf::from("Foo"));
        let err = run_test_with(&RunnerConfig::default(), &options, ScriptedBackend::default())
            .unwrap_err();
        assert!(err.to_string().contains("framework must be installed locally"));
    }
}
