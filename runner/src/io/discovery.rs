//! Module discovery over one or more source roots.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::filter::{EntryKind, PathFilter};
use crate::core::registry::{Collision, ModuleRecord, ModuleRegistry};
use crate::error::{DiscoveryError, PipelineError};
use crate::io::config::DiscoveryConfig;
use crate::io::sandbox::{DeclarationSandbox, Sandbox};
use crate::io::sync::walk_filtered;

/// Result of a discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    pub registry: ModuleRegistry,
    /// Files that failed to evaluate; the scan continued past each of them.
    pub errors: Vec<DiscoveryError>,
    /// Names registered more than once during this pass.
    pub collisions: Vec<Collision>,
    pub files_evaluated: usize,
}

/// Walks roots and evaluates scripts in a reused sandbox.
pub struct ModuleDiscoverer<S: Sandbox> {
    sandbox: S,
    extensions: Vec<String>,
}

impl ModuleDiscoverer<DeclarationSandbox> {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(
            DeclarationSandbox::new(
                &config.registration_call,
                config.max_file_bytes,
                Duration::from_millis(config.per_file_timeout_ms),
            ),
            config.extensions.clone(),
        )
    }
}

impl<S: Sandbox> ModuleDiscoverer<S> {
    pub fn new(sandbox: S, extensions: Vec<String>) -> Self {
        Self {
            sandbox,
            extensions,
        }
    }

    /// Discover every module under `roots`, in root order.
    ///
    /// Registrations overwrite earlier ones with the same name. Directory
    /// listing failures are fatal; a script that fails to evaluate is
    /// recorded and skipped.
    #[instrument(skip_all, fields(roots = roots.len()))]
    pub fn discover(
        &mut self,
        roots: &[PathBuf],
        filter: &PathFilter,
    ) -> Result<Discovery, PipelineError> {
        let mut discovery = Discovery::default();
        for root in roots {
            if !root.is_dir() {
                return Err(PipelineError::Io(format!(
                    "{} must be a directory",
                    root.display()
                )));
            }
            self.walk(root, filter, &mut discovery)?;
        }
        if !discovery.errors.is_empty() {
            warn!(
                errors = discovery.errors.len(),
                "some files failed to evaluate during discovery"
            );
        }
        info!(
            modules = discovery.registry.len(),
            files = discovery.files_evaluated,
            "discovery finished"
        );
        Ok(discovery)
    }

    fn walk(
        &mut self,
        root: &Path,
        filter: &PathFilter,
        discovery: &mut Discovery,
    ) -> Result<(), PipelineError> {
        let mut skipped = 0;
        for entry in walk_filtered(root, filter, &mut skipped) {
            let (path, kind) = entry?;
            if kind == EntryKind::File && self.is_script(&path) {
                self.evaluate(path, discovery);
            }
        }
        debug!(root = %root.display(), skipped, "walked root");
        Ok(())
    }

    fn is_script(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|known| known == ext))
    }

    fn evaluate(&mut self, path: PathBuf, discovery: &mut Discovery) {
        discovery.files_evaluated += 1;
        let registrations = match self.sandbox.evaluate(&path) {
            Ok(registrations) => registrations,
            Err(message) => {
                let err = DiscoveryError { path, message };
                warn!(%err, "discovery error");
                discovery.errors.push(err);
                return;
            }
        };
        for registration in registrations {
            debug!(name = %registration.name, path = %path.display(), "registered module");
            let record = ModuleRecord {
                name: registration.name,
                fullpath: path.clone(),
                requires: registration.requires,
            };
            if let Some(collision) = discovery.registry.insert(record) {
                warn!(
                    name = %collision.name,
                    previous = %collision.previous.display(),
                    current = %collision.current.display(),
                    "module registered twice, keeping the later record"
                );
                discovery.collisions.push(collision);
            }
        }
    }
}
