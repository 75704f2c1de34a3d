//! Maps resolved build tags to the extra Go modules a build must fetch.
//!
//! The table lives in `config/component_dependencies.yaml`:
//!
//! ```yaml
//! dependencies:
//!   lambdacomponents.exporter.clickhouse:
//!     - github.com/open-telemetry/opentelemetry-collector-contrib/exporter/clickhouseexporter
//!   lambdacomponents.processor.tail_sampling: github.com/.../tailsamplingprocessor
//! ```
//!
//! Besides literal tag matches, two wildcards are honored: the global
//! `lambdacomponents.all` tag pulls in every mapped module, and a subgroup tag
//! such as `lambdacomponents.exporter.all` pulls in every entry sharing the
//! `lambdacomponents.exporter.` prefix.

use crate::error::DependencyError;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Tag that includes every mapped dependency.
pub const GLOBAL_ALL_TAG: &str = "lambdacomponents.all";

/// Suffix marking a subgroup wildcard tag.
const ALL_SUFFIX: &str = ".all";

/// One or more module paths attached to a tag.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ModuleRefs {
    One(String),
    Many(Vec<String>),
}

impl ModuleRefs {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            ModuleRefs::One(module) => std::slice::from_ref(module),
            ModuleRefs::Many(modules) => modules.as_slice(),
        };
        slice.iter().map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct DependencyFile {
    dependencies: Option<IndexMap<String, ModuleRefs>>,
}

/// Tag to module-path table.
#[derive(Debug, Clone, Default)]
pub struct DependencyTable {
    entries: IndexMap<String, ModuleRefs>,
}

/// Why a mapped entry was selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchReason {
    Direct,
    GlobalWildcard,
    Subgroup(String),
}

impl DependencyTable {
    /// Loads the dependency table. A missing file yields an empty table;
    /// a file that exists but cannot be parsed is an error.
    pub fn load(path: &Path) -> Result<Self, DependencyError> {
        if !path.is_file() {
            tracing::warn!(path = %path.display(), "Component dependency file not found, no extra modules will be fetched");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| DependencyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            DependencyError::Malformed { message, .. } => DependencyError::Malformed {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, DependencyError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: DependencyFile =
            serde_yaml::from_str(content).map_err(|e| DependencyError::Malformed {
                path: "<inline>".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            entries: file.dependencies.unwrap_or_default(),
        })
    }

    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, ModuleRefs)>,
        K: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns each selected table entry together with the rule that selected it.
    pub fn matching_entries<'a>(
        &'a self,
        resolved_tags: &[String],
    ) -> Vec<(&'a str, &'a ModuleRefs, MatchReason)> {
        let has_global_all = resolved_tags.iter().any(|t| t == GLOBAL_ALL_TAG);
        let subgroup_prefixes: Vec<&str> = resolved_tags
            .iter()
            .filter(|t| t.as_str() != GLOBAL_ALL_TAG)
            .filter_map(|t| t.strip_suffix(ALL_SUFFIX))
            .collect();

        let mut matches = Vec::new();
        for (tag, modules) in &self.entries {
            let reason = if resolved_tags.iter().any(|t| t == tag) {
                Some(MatchReason::Direct)
            } else if has_global_all {
                Some(MatchReason::GlobalWildcard)
            } else {
                subgroup_prefixes
                    .iter()
                    .find(|prefix| {
                        tag.strip_prefix(**prefix)
                            .is_some_and(|rest| rest.starts_with('.'))
                    })
                    .map(|prefix| MatchReason::Subgroup(prefix.to_string()))
            };
            if let Some(reason) = reason {
                tracing::debug!(tag = %tag, reason = ?reason, "Including dependency");
                matches.push((tag.as_str(), modules, reason));
            }
        }
        matches
    }
}

/// Computes the set of module paths required by `resolved_tags`.
pub fn map_dependencies(resolved_tags: &[String], table: &DependencyTable) -> BTreeSet<String> {
    table
        .matching_entries(resolved_tags)
        .into_iter()
        .flat_map(|(_, modules, _)| modules.iter())
        .map(str::to_string)
        .collect()
}
