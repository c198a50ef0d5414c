//! Firewall-style path filter.
//!
//! A filter is an ordered list of rules compiled once and consulted for every
//! path of a walk. The first rule whose pattern matches the path and whose
//! type admits the entry kind decides the outcome; paths no rule matches
//! resolve to the filter's default.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Kind of filesystem entry being classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Dir,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "file" => Ok(EntryKind::File),
            "dir" => Ok(EntryKind::Dir),
            other => Err(PipelineError::Config(format!(
                "file type was not provided, was [{other}]"
            ))),
        }
    }
}

/// Which entry kinds a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    File,
    Dir,
    Any,
}

impl RuleType {
    fn admits(self, kind: EntryKind) -> bool {
        match self {
            RuleType::Any => true,
            RuleType::File => kind == EntryKind::File,
            RuleType::Dir => kind == EntryKind::Dir,
        }
    }
}

impl FromStr for RuleType {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "file" => Ok(RuleType::File),
            "dir" => Ok(RuleType::Dir),
            "any" => Ok(RuleType::Any),
            other => Err(PipelineError::Config(format!(
                "invalid type for match [{other}]"
            ))),
        }
    }
}

/// Uncompiled rule as written in configuration.
///
/// A bare string is shorthand for `{ pattern, include = false, type = "any" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleSpec {
    Pattern(String),
    Full {
        pattern: String,
        #[serde(default)]
        include: bool,
        #[serde(default = "default_rule_type", rename = "type")]
        kind: String,
    },
}

fn default_rule_type() -> String {
    "any".to_string()
}

impl RuleSpec {
    /// Exclusion shorthand.
    pub fn exclude(pattern: &str) -> Self {
        RuleSpec::Pattern(pattern.to_string())
    }

    pub fn include(pattern: &str) -> Self {
        RuleSpec::Full {
            pattern: pattern.to_string(),
            include: true,
            kind: default_rule_type(),
        }
    }

    /// Rule restricted to one entry kind.
    pub fn typed(pattern: &str, kind: &str, include: bool) -> Self {
        RuleSpec::Full {
            pattern: pattern.to_string(),
            include,
            kind: kind.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: Regex,
    include: bool,
    kind: RuleType,
}

/// Compiled, immutable filter program.
#[derive(Debug, Clone)]
pub struct PathFilter {
    rules: Vec<Rule>,
    default_is_exclude: bool,
}

impl PathFilter {
    /// Compile `specs` into a filter.
    ///
    /// Fails with a configuration error on an empty rule list, an unknown rule
    /// type, or a pattern that is not a valid regular expression.
    pub fn compile(specs: &[RuleSpec], default_is_exclude: bool) -> Result<Self, PipelineError> {
        if specs.is_empty() {
            return Err(PipelineError::Config("no rules specified".to_string()));
        }
        let rules = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| compile_rule(index, spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            default_is_exclude,
        })
    }

    /// Decide whether `path` of the given `kind` is excluded.
    pub fn is_excluded(&self, path: &str, kind: EntryKind) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.kind.admits(kind) && rule.pattern.is_match(path))
            .map_or(self.default_is_exclude, |rule| !rule.include)
    }

    /// Like [`PathFilter::is_excluded`], with the kind given as text.
    pub fn is_excluded_str(&self, path: &str, kind: &str) -> Result<bool, PipelineError> {
        let kind: EntryKind = kind.parse()?;
        Ok(self.is_excluded(path, kind))
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

fn compile_rule(index: usize, spec: &RuleSpec) -> Result<Rule, PipelineError> {
    let (pattern, include, kind) = match spec {
        RuleSpec::Pattern(pattern) => (pattern.as_str(), false, RuleType::Any),
        RuleSpec::Full {
            pattern,
            include,
            kind,
        } => (pattern.as_str(), *include, kind.parse::<RuleType>()?),
    };
    let pattern = Regex::new(pattern).map_err(|err| {
        PipelineError::Config(format!("rule {index}: pattern is not a valid regex: {err}"))
    })?;
    Ok(Rule {
        pattern,
        include,
        kind,
    })
}
