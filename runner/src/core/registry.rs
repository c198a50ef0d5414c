//! Module registry built by discovery passes.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A named module with its declared dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub name: String,
    pub fullpath: PathBuf,
    #[serde(default)]
    pub requires: Vec<String>,
}

/// Two records registered under the same name; `current` replaced `previous`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub name: String,
    pub previous: PathBuf,
    pub current: PathBuf,
}

/// Name → record mapping. Later writes for a name replace earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, ModuleRecord>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `record`, returning the collision if a record with the same
    /// name was already present.
    pub fn insert(&mut self, record: ModuleRecord) -> Option<Collision> {
        let name = record.name.clone();
        let current = record.fullpath.clone();
        self.modules.insert(name.clone(), record).map(|previous| Collision {
            name,
            previous: previous.fullpath,
            current,
        })
    }

    /// Merge `other` into `self` in name order, last write wins.
    pub fn merge(&mut self, other: ModuleRegistry) -> Vec<Collision> {
        other
            .modules
            .into_values()
            .filter_map(|record| self.insert(record))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ModuleRecord> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn records(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Records reachable from `entries` through `requires`, plus the names
    /// that are not in the registry. Both are returned in first-visit order.
    pub fn closure(&self, entries: &[String]) -> (Vec<&ModuleRecord>, Vec<String>) {
        let mut seen = std::collections::HashSet::new();
        let mut records = Vec::new();
        let mut unresolved = Vec::new();
        let mut stack: Vec<&str> = entries.iter().rev().map(String::as_str).collect();
        while let Some(name) = stack.pop() {
            if !seen.insert(name) {
                continue;
            }
            match self.modules.get(name) {
                Some(record) => {
                    records.push(record);
                    stack.extend(record.requires.iter().rev().map(String::as_str));
                }
                None => unresolved.push(name.to_string()),
            }
        }
        (records, unresolved)
    }
}

impl IntoIterator for ModuleRegistry {
    type Item = (String, ModuleRecord);
    type IntoIter = btree_map::IntoIter<String, ModuleRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.modules.into_iter()
    }
}

impl FromIterator<ModuleRecord> for ModuleRegistry {
    fn from_iter<I: IntoIterator<Item = ModuleRecord>>(iter: I) -> Self {
        let mut registry = ModuleRegistry::new();
        for record in iter {
            registry.insert(record);
        }
        registry
    }
}
