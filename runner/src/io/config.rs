//! Runner configuration stored in `modrunner.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::filter::{PathFilter, RuleSpec};
use crate::orchestrate::Strategy;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "modrunner.toml";

/// Runner configuration (TOML).
///
/// Missing fields default to values that work for a locally installed
/// framework checkout with a node-based engine shim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    pub engine: EngineConfig,
    pub coverage: CoverageConfig,
    pub framework: FrameworkConfig,
    pub discovery: DiscoveryConfig,
    pub store: StoreConfig,
    pub selection: SelectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine argv. `{context}` is replaced with the context file and `{out}`
    /// with the run directory.
    pub command: Vec<String>,
    /// Truncate engine stdout/stderr kept in memory beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "node".to_string(),
                "node_modules/.bin/modrunner-engine".to_string(),
                "{context}".to_string(),
                "{out}".to_string(),
            ],
            output_limit_bytes: 16_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoverageConfig {
    /// Instrumentation tool argv with `{src}` and `{out}` placeholders.
    pub instrument: Vec<String>,
    /// Report generation tool argv with `{src}` and `{out}` placeholders.
    pub report: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        let argv = |parts: &[&str]| parts.iter().map(|part| part.to_string()).collect();
        Self {
            instrument: argv(&[
                "java",
                "-jar",
                "node_modules/yuitest-coverage/jar/yuitest-coverage.jar",
                "-d",
                "-o",
                "{out}",
                "{src}",
            ]),
            report: argv(&[
                "java",
                "-jar",
                "node_modules/yuitest-coverage/jar/yuitest-coverage-report.jar",
                "--format",
                "LCOV",
                "-o",
                "{out}",
                "{src}",
            ]),
            timeout_secs: 60 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

/// A founding module provided by the framework checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FoundingModule {
    pub name: String,
    /// Path relative to the framework root.
    pub path: PathBuf,
    #[serde(default)]
    pub requires: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FrameworkConfig {
    pub root: PathBuf,
    pub modules: Vec<FoundingModule>,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("node_modules/mojito"),
            modules: vec![
                FoundingModule {
                    name: "mojito".to_string(),
                    path: PathBuf::from("lib/app/autoload/mojito.common.js"),
                    requires: Vec::new(),
                },
                FoundingModule {
                    name: "mojito-test".to_string(),
                    path: PathBuf::from("lib/app/autoload/mojito-test.common.js"),
                    requires: vec!["mojito".to_string()],
                },
            ],
        }
    }
}

impl FrameworkConfig {
    pub fn founding_names(&self) -> Vec<String> {
        self.modules.iter().map(|module| module.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Script extensions evaluated during discovery (without the dot).
    pub extensions: Vec<String>,
    /// Dotted registration call recognised in scripts.
    pub registration_call: String,
    /// Files larger than this are reported as discovery errors.
    pub max_file_bytes: u64,
    pub per_file_timeout_ms: u64,
    /// Rules applied to every discovery walk.
    pub exclude: Vec<RuleSpec>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["js".to_string()],
            registration_call: "YUI.add".to_string(),
            max_file_bytes: 4_000_000,
            per_file_timeout_ms: 2_000,
            exclude: vec![
                RuleSpec::exclude(r"/node_modules$"),
                RuleSpec::exclude(r"/\.git$"),
                RuleSpec::exclude(r"/\.svn$"),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Optional external store argv with `{root}` and `{env}` placeholders.
    pub command: Vec<String>,
    pub env: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl StoreConfig {
    pub fn env(&self) -> &str {
        self.env.as_deref().unwrap_or("test")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelectionConfig {
    pub strategy_app: Strategy,
    pub strategy_mojit: Strategy,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            strategy_app: Strategy::Queued,
            strategy_mojit: Strategy::Monolithic,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            coverage: CoverageConfig::default(),
            framework: FrameworkConfig::default(),
            discovery: DiscoveryConfig::default(),
            store: StoreConfig::default(),
            selection: SelectionConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.engine.command.is_empty() || self.engine.command[0].trim().is_empty() {
            return Err(anyhow!("engine.command must be a non-empty array"));
        }
        if self.engine.output_limit_bytes == 0 {
            return Err(anyhow!("engine.output_limit_bytes must be > 0"));
        }
        if self.coverage.instrument.is_empty() || self.coverage.report.is_empty() {
            return Err(anyhow!(
                "coverage.instrument and coverage.report must be non-empty arrays"
            ));
        }
        if self.coverage.timeout_secs == 0 {
            return Err(anyhow!("coverage.timeout_secs must be > 0"));
        }
        if self.framework.modules.is_empty() {
            return Err(anyhow!("framework.modules must name at least one module"));
        }
        if self.discovery.extensions.is_empty() {
            return Err(anyhow!("discovery.extensions must be a non-empty array"));
        }
        if self.discovery.registration_call.split('.').any(str::is_empty) {
            return Err(anyhow!(
                "discovery.registration_call must be a dotted identifier path"
            ));
        }
        if self.discovery.per_file_timeout_ms == 0 {
            return Err(anyhow!("discovery.per_file_timeout_ms must be > 0"));
        }
        PathFilter::compile(&self.discovery.exclude, false).context("discovery.exclude")?;
        Ok(())
    }

    /// Framework root resolved against `base` when relative.
    pub fn framework_root(&self, base: &Path) -> PathBuf {
        base.join(&self.framework.root)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
