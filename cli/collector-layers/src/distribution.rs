//! Loads the distribution table and resolves a named distribution into the
//! ordered list of Go build tags used to compile the collector.
//!
//! A distribution may name a `base`; resolution walks the base chain up to a
//! root, then applies every level's tags from the root down to the requested
//! distribution. The first occurrence of a tag decides its position.
//!
//! ```yaml
//! minimal:
//!   description: OTLP in, batch, OTLP out
//!   base: null
//!   buildtags: [lambdacomponents.custom, lambdacomponents.receiver.otlp]
//! clickhouse:
//!   base: minimal
//!   buildtags: [lambdacomponents.exporter.clickhouse]
//! ```

use crate::error::DistributionError;
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Name of the distribution used when a caller opts into the fallback policy.
pub const DEFAULT_DISTRIBUTION: &str = "default";

/// Raw shape of one entry in `distributions.yaml`.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DistributionEntry {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    base: Option<String>,
    #[serde(default, alias = "tags")]
    buildtags: Option<Vec<String>>,
}

/// A named, inheritable bundle of build tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub name: String,
    pub description: Option<String>,
    pub base: Option<String>,
    pub tags: Vec<String>,
}

/// All distributions, in file order.
#[derive(Debug, Clone, Default)]
pub struct DistributionTable {
    entries: IndexMap<String, Distribution>,
}

/// Result of resolving with the caller-level fallback policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The distribution whose tags were actually used.
    pub distribution: String,
    pub tags: Vec<String>,
    /// True when the requested distribution was missing and the fallback was used.
    pub fell_back: bool,
}

impl DistributionTable {
    /// Reads and parses a distributions YAML file.
    pub fn load(path: &Path) -> Result<Self, DistributionError> {
        let content = fs::read_to_string(path).map_err(|e| DistributionError::InvalidFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            DistributionError::InvalidFile { message, .. } => DistributionError::InvalidFile {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parses a distributions table from YAML text. An empty document is an empty table.
    pub fn from_yaml_str(content: &str) -> Result<Self, DistributionError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: Option<IndexMap<String, Option<DistributionEntry>>> =
            serde_yaml::from_str(content).map_err(|e| DistributionError::InvalidFile {
                path: "<inline>".to_string(),
                message: e.to_string(),
            })?;

        let entries = raw
            .unwrap_or_default()
            .into_iter()
            .map(|(name, entry)| {
                let entry = entry.unwrap_or_default();
                let dist = Distribution {
                    name: name.clone(),
                    description: entry.description,
                    // `base: ""` is treated like `base: null`
                    base: entry.base.filter(|b| !b.trim().is_empty()),
                    tags: entry.buildtags.unwrap_or_default(),
                };
                (name, dist)
            })
            .collect();
        Ok(Self { entries })
    }

    /// Builds a table from already-constructed distributions.
    pub fn from_distributions(distributions: impl IntoIterator<Item = Distribution>) -> Self {
        Self {
            entries: distributions
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Distribution> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Distribution> {
        self.entries.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the inheritance chain of `name`, leaf first, root last.
    pub fn inheritance_chain(&self, name: &str) -> Result<Vec<&Distribution>, DistributionError> {
        let mut chain: Vec<&Distribution> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut current = name;

        loop {
            if !seen.insert(current) {
                let mut names: Vec<String> = chain.iter().map(|d| d.name.clone()).collect();
                names.push(current.to_string());
                return Err(DistributionError::CircularInheritance {
                    name: name.to_string(),
                    chain: names,
                });
            }
            let dist = match self.entries.get(current) {
                Some(dist) => dist,
                None => {
                    return Err(match chain.last() {
                        None => DistributionError::NotFound(current.to_string()),
                        Some(child) => DistributionError::MissingBase {
                            name: child.name.clone(),
                            base: current.to_string(),
                        },
                    })
                }
            };
            chain.push(dist);
            match dist.base.as_deref() {
                Some(base) => current = base,
                None => break,
            }
        }
        Ok(chain)
    }

    /// Resolves `name` into its flattened, de-duplicated build tags.
    pub fn resolve(&self, name: &str) -> Result<Vec<String>, DistributionError> {
        let chain = self.inheritance_chain(name)?;
        let mut tags: IndexSet<&str> = IndexSet::new();
        for dist in chain.iter().rev() {
            for tag in &dist.tags {
                tags.insert(tag.as_str());
            }
        }
        tracing::debug!(distribution = %name, levels = chain.len(), tags = ?tags, "Resolved build tags");
        Ok(tags.into_iter().map(str::to_string).collect())
    }

    /// Resolves `name`, substituting `fallback` when `name` itself is not defined.
    ///
    /// Only a missing top-level name triggers the fallback; cycles and dangling
    /// bases are returned as errors.
    pub fn resolve_with_fallback(
        &self,
        name: &str,
        fallback: &str,
    ) -> Result<Resolution, DistributionError> {
        match self.resolve(name) {
            Ok(tags) => Ok(Resolution {
                distribution: name.to_string(),
                tags,
                fell_back: false,
            }),
            Err(DistributionError::NotFound(missing)) if missing == name && name != fallback => {
                tracing::warn!(
                    distribution = %name,
                    fallback = %fallback,
                    "Distribution not found, falling back"
                );
                let tags = self.resolve(fallback)?;
                Ok(Resolution {
                    distribution: fallback.to_string(),
                    tags,
                    fell_back: true,
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Resolves `name` against `table`.
pub fn resolve(name: &str, table: &DistributionTable) -> Result<Vec<String>, DistributionError> {
    table.resolve(name)
}

/// Joins resolved tags into the comma-separated form used by `BUILDTAGS`.
pub fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .filter(|t| !t.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Splits a comma-separated tag string, dropping empty items.
pub fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tag that enables the custom component registry; every explicit tag list
/// needs it.
pub const CUSTOM_COMPONENTS_TAG: &str = "lambdacomponents.custom";

/// Parses explicitly supplied build tags, putting [`CUSTOM_COMPONENTS_TAG`]
/// first when it is missing.
pub fn custom_tags(tags: &str) -> Vec<String> {
    let mut parsed = split_tags(tags);
    if !parsed.iter().any(|t| t == CUSTOM_COMPONENTS_TAG) {
        parsed.insert(0, CUSTOM_COMPONENTS_TAG.to_string());
    }
    parsed
}

/// Build tags recorded in a layer description.
///
/// Explicit tags are used as given and the table is not read. Otherwise
/// `distribution` (or `default`) is resolved from the table at `path`, falling
/// back to `default` only when the distribution is not defined.
pub fn description_tags(
    path: &Path,
    explicit: Option<&str>,
    distribution: Option<&str>,
) -> Result<Vec<String>, DistributionError> {
    if let Some(tags) = explicit {
        return Ok(split_tags(tags));
    }
    let distribution = distribution
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DISTRIBUTION);
    let resolution =
        DistributionTable::load(path)?.resolve_with_fallback(distribution, DEFAULT_DISTRIBUTION)?;
    if resolution.fell_back {
        tracing::warn!(
            distribution = %distribution,
            "Distribution not found, describing the layer with the default build tags"
        );
    }
    Ok(resolution.tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
default:
  description: Upstream default components
  buildtags: []
minimal:
  description: Minimal OTLP pipeline
  base: null
  buildtags:
    - custom
    - otlp-receiver
    - batch-processor
clickhouse:
  base: minimal
  buildtags: [clickhouse-exporter]
clickhouse-otlphttp:
  base: clickhouse
  buildtags: [otlp-receiver, otlphttp-exporter]
"#;

    fn dist(name: &str, base: Option<&str>, tags: &[&str]) -> Distribution {
        Distribution {
            name: name.to_string(),
            description: None,
            base: base.map(str::to_string),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_resolve_inherits_base_tags_first() {
        let table = DistributionTable::from_yaml_str(SAMPLE).unwrap();
        let tags = resolve("clickhouse", &table).unwrap();
        assert_eq!(
            tags,
            vec!["custom", "otlp-receiver", "batch-processor", "clickhouse-exporter"]
        );
    }

    #[test]
    fn test_resolve_deduplicates_keeping_first_position() {
        let table = DistributionTable::from_yaml_str(SAMPLE).unwrap();
        let tags = table.resolve("clickhouse-otlphttp").unwrap();
        assert_eq!(
            tags,
            vec![
                "custom",
                "otlp-receiver",
                "batch-processor",
                "clickhouse-exporter",
                "otlphttp-exporter"
            ]
        );
    }

    #[test]
    fn test_resolve_empty_tags_is_not_an_error() {
        let table = DistributionTable::from_yaml_str(SAMPLE).unwrap();
        assert!(table.resolve("default").unwrap().is_empty());
    }

    #[test]
    fn test_resolve_unknown_distribution() {
        let table = DistributionTable::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(
            table.resolve("nope"),
            Err(DistributionError::NotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_resolve_detects_cycles() {
        let table = DistributionTable::from_distributions(vec![
            dist("a", Some("b"), &["x"]),
            dist("b", Some("c"), &["y"]),
            dist("c", Some("a"), &["z"]),
        ]);
        match table.resolve("a") {
            Err(DistributionError::CircularInheritance { name, chain }) => {
                assert_eq!(name, "a");
                assert_eq!(chain, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected circular inheritance, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_detects_self_reference() {
        let table = DistributionTable::from_distributions(vec![dist("loop", Some("loop"), &[])]);
        assert!(matches!(
            table.resolve("loop"),
            Err(DistributionError::CircularInheritance { .. })
        ));
    }

    #[test]
    fn test_resolve_reports_dangling_base() {
        let table = DistributionTable::from_distributions(vec![dist("child", Some("ghost"), &[])]);
        assert_eq!(
            table.resolve("child"),
            Err(DistributionError::MissingBase {
                name: "child".to_string(),
                base: "ghost".to_string()
            })
        );
    }

    #[test]
    fn test_resolved_tags_cover_every_level_exactly_once() {
        let table = DistributionTable::from_distributions(vec![
            dist("root", None, &["a", "b"]),
            dist("mid", Some("root"), &["b", "c", "c"]),
            dist("leaf", Some("mid"), &["d", "a"]),
        ]);
        let tags = table.resolve("leaf").unwrap();
        let mut expected: Vec<&str> = vec!["a", "b", "c", "d"];
        let mut sorted: Vec<&str> = tags.iter().map(String::as_str).collect();
        sorted.sort();
        expected.sort();
        assert_eq!(sorted, expected);
        assert_eq!(tags.len(), 4);
    }

    #[test]
    fn test_fallback_to_default() {
        let table = DistributionTable::from_yaml_str(SAMPLE).unwrap();
        let resolution = table
            .resolve_with_fallback("unknown", DEFAULT_DISTRIBUTION)
            .unwrap();
        assert_eq!(resolution.distribution, "default");
        assert!(resolution.fell_back);
        assert!(resolution.tags.is_empty());

        let direct = table
            .resolve_with_fallback("minimal", DEFAULT_DISTRIBUTION)
            .unwrap();
        assert!(!direct.fell_back);
        assert_eq!(direct.tags.len(), 3);
    }

    #[test]
    fn test_fallback_does_not_hide_cycles() {
        let table = DistributionTable::from_distributions(vec![
            dist("default", None, &[]),
            dist("a", Some("a"), &[]),
        ]);
        assert!(matches!(
            table.resolve_with_fallback("a", DEFAULT_DISTRIBUTION),
            Err(DistributionError::CircularInheritance { .. })
        ));
    }

    #[test]
    fn test_fallback_missing_default_fails() {
        let table = DistributionTable::from_distributions(vec![dist("minimal", None, &["x"])]);
        assert_eq!(
            table.resolve_with_fallback("nope", DEFAULT_DISTRIBUTION),
            Err(DistributionError::NotFound("default".to_string()))
        );
    }

    #[test]
    fn test_load_preserves_file_order_and_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("distributions.yaml");
        fs::write(&path, SAMPLE).unwrap();
        let table = DistributionTable::load(&path).unwrap();
        let names: Vec<&str> = table.names().collect();
        assert_eq!(
            names,
            vec!["default", "minimal", "clickhouse", "clickhouse-otlphttp"]
        );
        assert_eq!(
            table.get("minimal").and_then(|d| d.description.as_deref()),
            Some("Minimal OTLP pipeline")
        );
    }

    #[test]
    fn test_load_rejects_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("distributions.yaml");
        fs::write(&path, "minimal: [not, a, mapping").unwrap();
        match DistributionTable::load(&path) {
            Err(DistributionError::InvalidFile { path: p, .. }) => {
                assert!(p.ends_with("distributions.yaml"))
            }
            other => panic!("expected invalid file error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_file_is_empty_table() {
        let table = DistributionTable::from_yaml_str("   \n").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_join_and_split_tags() {
        let tags = vec!["a".to_string(), String::new(), "b".to_string()];
        assert_eq!(join_tags(&tags), "a,b");
        assert_eq!(split_tags(" a, ,b,"), vec!["a", "b"]);
    }

    #[test]
    fn test_custom_tags_include_custom_components() {
        assert_eq!(
            custom_tags("lambdacomponents.exporter.clickhouse"),
            vec!["lambdacomponents.custom", "lambdacomponents.exporter.clickhouse"]
        );
        assert_eq!(
            custom_tags("lambdacomponents.receiver.otlp,lambdacomponents.custom"),
            vec!["lambdacomponents.receiver.otlp", "lambdacomponents.custom"]
        );
        assert_eq!(custom_tags(""), vec!["lambdacomponents.custom"]);
    }

    fn write_table(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("distributions.yaml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_description_tags_resolve_and_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(&dir, SAMPLE);
        assert_eq!(
            description_tags(&path, None, Some("minimal")).unwrap(),
            DistributionTable::from_yaml_str(SAMPLE).unwrap().resolve("minimal").unwrap()
        );
        assert_eq!(
            description_tags(&path, None, Some("unknown")).unwrap(),
            DistributionTable::from_yaml_str(SAMPLE).unwrap().resolve("default").unwrap()
        );
        assert_eq!(
            description_tags(&dir.path().join("absent.yaml"), Some("a, b"), None).unwrap(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_description_tags_surface_configuration_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cyclic = write_table(&dir, "default:\n  buildtags: []\nloop:\n  base: loop\n");
        assert!(matches!(
            description_tags(&cyclic, None, Some("loop")),
            Err(DistributionError::CircularInheritance { .. })
        ));

        let malformed = write_table(&dir, "loop: [not, valid");
        assert!(matches!(
            description_tags(&malformed, None, Some("loop")),
            Err(DistributionError::InvalidFile { .. })
        ));

        let dangling = write_table(&dir, "default:\n  buildtags: []\nx:\n  base: gone\n");
        assert!(matches!(
            description_tags(&dangling, None, Some("x")),
            Err(DistributionError::MissingBase { .. })
        ));
    }
}
