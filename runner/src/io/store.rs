//! Module store for application targets.
//!
//! The [`ModuleStore`] trait hides where an application's module registry
//! comes from. [`CommandStore`] asks an external tool for it; the
//! [`DiscoveryStore`] fallback scans the application and framework trees.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::core::filter::PathFilter;
use crate::core::registry::ModuleRecord;
use crate::error::PipelineError;
use crate::io::config::{DiscoveryConfig, StoreConfig};
use crate::io::discovery::{Discovery, ModuleDiscoverer};
use crate::io::process::{command_from_argv, run_tool};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const STORE_OUTPUT_LIMIT_BYTES: usize = 64_000_000;

/// Where to look for an application's modules.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub app_root: PathBuf,
    pub framework_root: PathBuf,
    /// Runtime environment name handed to external stores.
    pub env: String,
}

pub trait ModuleStore {
    fn load(&mut self, request: &StoreRequest) -> Result<Discovery, PipelineError>;
}

/// Store that runs a configured command printing `{name: {fullpath, requires}}`.
pub struct CommandStore {
    argv: Vec<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct StoreEntry {
    fullpath: PathBuf,
    #[serde(default)]
    requires: Vec<String>,
}

impl CommandStore {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }
}

impl ModuleStore for CommandStore {
    #[instrument(skip_all, fields(app_root = %request.app_root.display()))]
    fn load(&mut self, request: &StoreRequest) -> Result<Discovery, PipelineError> {
        let env = PathBuf::from(&request.env);
        let mut cmd = command_from_argv(
            &self.argv,
            &[("root", request.app_root.as_path()), ("env", env.as_path())],
        )
        .map_err(|err| PipelineError::Config(format!("store.command: {err:#}")))?;
        cmd.current_dir(&request.app_root);
        let output = run_tool("module store", cmd, self.timeout, STORE_OUTPUT_LIMIT_BYTES)?;
        if output.stdout_truncated > 0 {
            return Err(PipelineError::Subprocess(format!(
                "module store output exceeded {STORE_OUTPUT_LIMIT_BYTES} bytes"
            )));
        }
        let discovery = parse_store_output(&output.stdout, &request.app_root)?;
        info!(modules = discovery.registry.len(), "loaded module store");
        Ok(discovery)
    }
}

/// Parse store JSON; relative paths are resolved against `app_root`.
pub fn parse_store_output(stdout: &[u8], app_root: &Path) -> Result<Discovery, PipelineError> {
    let entries: BTreeMap<String, StoreEntry> = serde_json::from_slice(stdout)
        .map_err(|err| PipelineError::Subprocess(format!("module store output: {err}")))?;
    let mut discovery = Discovery::default();
    for (name, entry) in entries {
        let fullpath = if entry.fullpath.is_absolute() {
            entry.fullpath
        } else {
            app_root.join(entry.fullpath)
        };
        // Keys are unique, so nothing can collide here.
        discovery.registry.insert(ModuleRecord {
            name,
            fullpath,
            requires: entry.requires,
        });
    }
    Ok(discovery)
}

/// Store that discovers the framework library and then the application.
///
/// Application modules are discovered last so they win name collisions.
pub struct DiscoveryStore {
    config: DiscoveryConfig,
}

impl DiscoveryStore {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }
}

impl ModuleStore for DiscoveryStore {
    #[instrument(skip_all, fields(app_root = %request.app_root.display()))]
    fn load(&mut self, request: &StoreRequest) -> Result<Discovery, PipelineError> {
        let filter = PathFilter::compile(&self.config.exclude, false)?;
        let mut roots = Vec::new();
        let lib = request.framework_root.join("lib");
        if lib.is_dir() {
            roots.push(lib);
        } else {
            debug!(lib = %lib.display(), "framework lib directory missing, skipping");
        }
        roots.push(request.app_root.clone());
        ModuleDiscoverer::from_config(&self.config).discover(&roots, &filter)
    }
}

/// Pick the store configured for this run.
pub fn store_from_config(store: &StoreConfig, discovery: &DiscoveryConfig) -> Box<dyn ModuleStore> {
    if store.command.is_empty() {
        Box::new(DiscoveryStore::new(discovery.clone()))
    } else {
        let timeout = store
            .timeout_secs
            .map_or(DEFAULT_STORE_TIMEOUT, Duration::from_secs);
        Box::new(CommandStore::new(store.command.clone(), timeout))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    fn request(temp: &Path) -> StoreRequest {
        StoreRequest {
            app_root: temp.join("app"),
            framework_root: temp.join("app/node_modules/mojito"),
            env: "test".to_string(),
        }
    }

    #[test]
    fn parse_resolves_relative_paths() {
        let json = br#"{
            "a": {"fullpath": "autoload/a.js", "requires": ["b"]},
            "b": {"fullpath": "/abs/b.js"}
        }"#;
        let discovery = parse_store_output(json, Path::new("/app")).expect("parse");
        let a = discovery.registry.get("a").expect("a");
        assert_eq!(a.fullpath, PathBuf::from("/app/autoload/a.js"));
        assert_eq!(a.requires, vec!["b".to_string()]);
        assert!(discovery.registry.get("b").expect("b").requires.is_empty());
    }

    #[test]
    fn parse_rejects_malformed_output() {
        let err = parse_store_output(b"not json", Path::new("/app")).unwrap_err();
        assert!(matches!(err, PipelineError::Subprocess(_)));
    }

    #[test]
    fn discovery_store_prefers_application_modules() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = request(temp.path());
        write(
            &req.framework_root.join("lib/app/autoload/shared.js"),
            "YUI.add('shared', f);",
        );
        write(&req.app_root.join("autoload/shared.js"), "YUI.add('shared', f);");
        write(
            &req.app_root.join("autoload/shared-tests.js"),
            "YUI.add('shared-tests', f, '1', {requires: ['shared']});",
        );

        let discovery = DiscoveryStore::new(DiscoveryConfig::default())
            .load(&req)
            .expect("load");

        let shared = discovery.registry.get("shared").expect("shared");
        assert_eq!(shared.fullpath, req.app_root.join("autoload/shared.js"));
        assert!(discovery.registry.contains("shared-tests"));
        assert_eq!(discovery.collisions.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn command_store_reads_tool_stdout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = request(temp.path());
        fs::create_dir_all(&req.app_root).expect("mkdir");
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"printf '{"%s-tests": {"fullpath": "t.js", "requires": []}}' "$1""#.to_string(),
            "store".to_string(),
            "{env}".to_string(),
        ];
        let discovery = CommandStore::new(argv, Duration::from_secs(10))
            .load(&req)
            .expect("load");
        let record = discovery.registry.get("test-tests").expect("record");
        assert_eq!(record.fullpath, req.app_root.join("t.js"));
    }
}
