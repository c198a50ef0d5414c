//! Coverage instrumentation and report generation.
//!
//! Instrumentation works in a fresh temporary workspace: an application is
//! first mirrored whole into the instrumented directory, then the
//! instrumentable subset is staged and rewritten into the same directory by
//! the external tool. The workspace is removed when it is dropped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, instrument};

use crate::core::filter::{PathFilter, RuleSpec};
use crate::error::PipelineError;
use crate::io::config::CoverageConfig;
use crate::io::process::{command_from_argv, run_tool};
use crate::io::sync::sync;

/// Rules for mirroring a whole application before instrumentation.
pub fn application_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::exclude(r"/node_modules$"),
        RuleSpec::exclude(r"/\.git$"),
        RuleSpec::exclude(r"/\.svn$"),
        RuleSpec::include(".*"),
    ]
}

/// Rules selecting the files the instrumentation tool rewrites.
pub fn instrumentable_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::exclude(r"\barchetypes$"),
        RuleSpec::exclude(r"\bassets$"),
        RuleSpec::exclude(r"\.svn"),
        RuleSpec::exclude(r"-tests\.js$"),
        RuleSpec::exclude(r"\btests/harness$"),
        RuleSpec::exclude(r"\byuidoc$"),
        RuleSpec::exclude(r"\btests$"),
        RuleSpec::exclude(r"server/management$"),
        RuleSpec::include(r"\.js$"),
        RuleSpec::include(r"\.json$"),
        RuleSpec::exclude(r"/node_modules$"),
        RuleSpec::typed(".*", "dir", true),
    ]
}

/// Temporary directories used by a coverage run.
#[derive(Debug)]
pub struct CoverageWorkspace {
    root: tempfile::TempDir,
}

impl CoverageWorkspace {
    pub fn create(tmp_root: Option<&Path>) -> Result<Self, PipelineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("modrunner-cov-");
        let root = match tmp_root {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(|err| PipelineError::Io(format!("create coverage workspace: {err}")))?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Staging copy handed to the instrumentation tool.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.path().join("staging")
    }

    /// Tree the engine runs against.
    pub fn instrumented_dir(&self) -> PathBuf {
        self.root.path().join("instrumented")
    }

    /// Prepend a rule excluding the workspace itself, which may live inside
    /// the tree being mirrored. The directory name is unique, so it is matched
    /// regardless of how the parent path is spelled.
    pub fn excluding(&self, rules: Vec<RuleSpec>) -> Vec<RuleSpec> {
        let name = self
            .root
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut all = Vec::with_capacity(rules.len() + 1);
        all.push(RuleSpec::typed(
            &format!("/{}$", regex::escape(&name)),
            "dir",
            false,
        ));
        all.extend(rules);
        all
    }
}

/// Runs the configured instrumentation and report tools.
pub struct CoverageTools {
    config: CoverageConfig,
}

impl CoverageTools {
    pub fn new(config: CoverageConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Produce the instrumented tree for `source` and return its path.
    ///
    /// With `whole_tree` set every file of `source` is mirrored first, so
    /// non-instrumentable files sit next to the instrumented ones.
    #[instrument(skip_all, fields(source = %source.display(), whole_tree))]
    pub fn instrument(
        &self,
        source: &Path,
        workspace: &CoverageWorkspace,
        whole_tree: bool,
    ) -> Result<PathBuf, PipelineError> {
        let instrumented = workspace.instrumented_dir();
        if whole_tree {
            let all = PathFilter::compile(&workspace.excluding(application_rules()), false)?;
            sync(source, &instrumented, &all)?;
        }
        let staging = workspace.staging_dir();
        let subset = PathFilter::compile(&workspace.excluding(instrumentable_rules()), true)?;
        let stats = sync(source, &staging, &subset)?;
        info!(files = stats.files_copied, "staged instrumentable files");

        let cmd = command_from_argv(
            &self.config.instrument,
            &[("src", staging.as_path()), ("out", instrumented.as_path())],
        )
        .map_err(|err| PipelineError::Config(format!("coverage.instrument: {err:#}")))?;
        run_tool(
            "instrumentation",
            cmd,
            self.timeout(),
            self.config.output_limit_bytes,
        )?;
        Ok(instrumented)
    }

    /// Render the coverage report for `coverage_file` into `out_dir`.
    #[instrument(skip_all, fields(coverage_file = %coverage_file.display()))]
    pub fn report(&self, coverage_file: &Path, out_dir: &Path) -> Result<(), PipelineError> {
        let cmd = command_from_argv(
            &self.config.report,
            &[("src", coverage_file), ("out", out_dir)],
        )
        .map_err(|err| PipelineError::Config(format!("coverage.report: {err:#}")))?;
        run_tool(
            "coverage report",
            cmd,
            self.timeout(),
            self.config.output_limit_bytes,
        )?;
        Ok(())
    }
}
