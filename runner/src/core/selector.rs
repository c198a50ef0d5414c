//! Deterministic selection of the modules to execute.

use std::collections::BTreeSet;

use crate::core::registry::ModuleRegistry;
use crate::error::PipelineError;

/// Harness modules included in every batch.
pub const FOUNDING_SET: [&str; 2] = ["mojito", "mojito-test"];

/// Suffixes that mark a module as a test module.
const TEST_SUFFIXES: [&str; 2] = ["-tests", "-test"];

/// Ordered, deduplicated module names to run against one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    names: Vec<String>,
    founding: Vec<String>,
}

impl Batch {
    /// All names, founding set included, in lexicographic order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Founding names, in lexicographic order.
    pub fn founding(&self) -> &[String] {
        &self.founding
    }

    /// Names that are not part of the founding set.
    pub fn selected(&self) -> impl Iterator<Item = &String> {
        self.names
            .iter()
            .filter(|name| !self.founding.contains(name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// True if `name` ends with a test suffix (`-tests` or `-test`).
pub fn is_test_module(name: &str) -> bool {
    TEST_SUFFIXES
        .iter()
        .any(|suffix| name.len() > suffix.len() && name.ends_with(suffix))
}

fn allowed(name: &str, allow_list: &[String]) -> bool {
    allow_list.iter().any(|wanted| {
        name == wanted
            || TEST_SUFFIXES
                .iter()
                .any(|suffix| name.strip_suffix(suffix) == Some(wanted.as_str()))
    })
}

/// Select the batch for `registry`.
///
/// With a non-empty `allow_list`, registry names equal to an allowed name (or
/// to an allowed name plus a test suffix) are selected; otherwise every test
/// module is. The founding set is always added. Fails when nothing outside
/// the founding set was selected.
pub fn select(
    registry: &ModuleRegistry,
    allow_list: &[String],
    founding: &[String],
) -> Result<Batch, PipelineError> {
    let selected: BTreeSet<&str> = registry
        .names()
        .filter(|name| {
            if allow_list.is_empty() {
                is_test_module(name)
            } else {
                allowed(name, allow_list)
            }
        })
        .collect();

    if selected
        .iter()
        .all(|name| founding.iter().any(|f| f == name))
    {
        return Err(PipelineError::Selection("no tests found".to_string()));
    }

    let founding_set: BTreeSet<&str> = founding.iter().map(String::as_str).collect();
    let names = selected
        .union(&founding_set)
        .map(|name| name.to_string())
        .collect();
    Ok(Batch {
        names,
        founding: founding_set.into_iter().map(str::to_string).collect(),
    })
}

/// The default founding set as owned names.
pub fn default_founding() -> Vec<String> {
    FOUNDING_SET.iter().map(|name| name.to_string()).collect()
}
