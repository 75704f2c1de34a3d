//! Markdown reports built from the metadata store.

use crate::metadata::{ArtifactRecord, MetadataStore};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::Glob;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tera::{Context as TeraContext, Tera};

const LAYERS_TEMPLATE: &str = "layers.md";
const RELEASE_NOTES_TEMPLATE: &str = "release_notes.md";
const UNKNOWN_ARCHITECTURE: &str = "unknown";
const ARCHITECTURE_ORDER: [&str; 3] = ["amd64", "arm64", UNKNOWN_ARCHITECTURE];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerRow {
    pub region: String,
    pub arn: String,
    pub version: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchitectureGroup {
    pub architecture: String,
    pub layers: Vec<LayerRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionGroup {
    pub distribution: String,
    pub architectures: Vec<ArchitectureGroup>,
}

#[derive(Serialize)]
struct ReleaseNoteRow<'a> {
    region: &'a str,
    architecture: &'a str,
    arn: &'a str,
}

fn load_templates(template_dir: Option<&Path>, required: &str, builtin: &str) -> Result<Tera> {
    let mut tera = Tera::default();
    match template_dir {
        Some(dir) => {
            if !dir.exists() {
                bail!("Custom template directory not found: {}", dir.display());
            }
            let glob_pattern = dir.join("*.md").to_string_lossy().into_owned();
            tera = Tera::new(&glob_pattern).with_context(|| {
                format!("Failed to load templates from custom directory: {}", glob_pattern)
            })?;
            if !tera.get_template_names().any(|n| n == required) {
                bail!(
                    "Template '{}' not found in custom directory: {}",
                    required,
                    dir.display()
                );
            }
        }
        None => tera.add_raw_template(required, builtin)?,
    }
    Ok(tera)
}

/// Queries the store for every distribution, logging and skipping the ones
/// that fail.
pub async fn fetch_records(
    store: &dyn MetadataStore,
    distributions: &[String],
) -> Vec<ArtifactRecord> {
    let mut records = Vec::new();
    for distribution in distributions {
        match store.query_by_distribution(distribution).await {
            Ok(mut found) => {
                tracing::debug!(distribution = %distribution, count = found.len(), "Fetched layer records");
                records.append(&mut found);
            }
            Err(e) => {
                tracing::warn!(distribution = %distribution, error = %e, "Failed to query layer records")
            }
        }
    }
    records
}

/// Keeps the records whose layer ARN matches the glob `pattern`.
pub fn filter_by_arn(records: Vec<ArtifactRecord>, pattern: &str) -> Result<Vec<ArtifactRecord>> {
    let matcher = Glob::new(pattern)
        .with_context(|| format!("Invalid layer ARN pattern: {}", pattern))?
        .compile_matcher();
    Ok(records
        .into_iter()
        .filter(|r| matcher.is_match(&r.layer_arn))
        .collect())
}

fn format_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| {
            ts.with_timezone(&Utc)
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string()
        })
        .unwrap_or_else(|_| {
            if raw.is_empty() {
                "Unknown".to_string()
            } else {
                raw.to_string()
            }
        })
}

/// Groups records by distribution then architecture.
///
/// Distributions follow `distribution_order`, with any others appended in name
/// order; architectures outside amd64/arm64 are grouped as `unknown`. Rows are
/// sorted by region, then publish time.
pub fn group_records(
    records: &[ArtifactRecord],
    distribution_order: &[String],
) -> Vec<DistributionGroup> {
    let mut grouped: BTreeMap<String, BTreeMap<&'static str, Vec<&ArtifactRecord>>> =
        BTreeMap::new();
    for record in records {
        let architecture = ARCHITECTURE_ORDER
            .iter()
            .copied()
            .find(|a| record.architecture.as_deref() == Some(*a))
            .unwrap_or(UNKNOWN_ARCHITECTURE);
        grouped
            .entry(record.distribution.clone())
            .or_default()
            .entry(architecture)
            .or_default()
            .push(record);
    }

    let mut names: Vec<String> = distribution_order
        .iter()
        .filter(|d| grouped.contains_key(d.as_str()))
        .cloned()
        .collect();
    names.extend(
        grouped
            .keys()
            .filter(|d| !distribution_order.contains(d))
            .cloned(),
    );

    names
        .into_iter()
        .filter_map(|name| {
            let by_arch = grouped.remove(&name)?;
            let architectures = ARCHITECTURE_ORDER
                .iter()
                .filter_map(|arch| {
                    let mut rows = by_arch.get(arch)?.clone();
                    rows.sort_by(|a, b| {
                        a.region
                            .cmp(&b.region)
                            .then_with(|| a.publish_timestamp.cmp(&b.publish_timestamp))
                    });
                    Some(ArchitectureGroup {
                        architecture: arch.to_string(),
                        layers: rows
                            .into_iter()
                            .map(|r| LayerRow {
                                region: r.region.clone(),
                                arn: r.layer_arn.clone(),
                                version: r
                                    .layer_version_str
                                    .clone()
                                    .unwrap_or_else(|| "unknown".to_string()),
                                timestamp: format_timestamp(&r.publish_timestamp),
                            })
                            .collect(),
                    })
                })
                .collect();
            Some(DistributionGroup {
                distribution: name,
                architectures,
            })
        })
        .collect()
}

/// Renders the `LAYERS.md` report.
pub fn render_layers_report(
    groups: &[DistributionGroup],
    table_name: &str,
    pattern: Option<&str>,
    generated_at: DateTime<Utc>,
    template_dir: Option<&Path>,
) -> Result<String> {
    let tera = load_templates(
        template_dir,
        LAYERS_TEMPLATE,
        include_str!("templates/layers.md"),
    )?;
    let mut ctx = TeraContext::new();
    ctx.insert("distributions", groups);
    ctx.insert("table_name", table_name);
    ctx.insert("pattern", &pattern);
    ctx.insert(
        "generated_at",
        &generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    tera.render(LAYERS_TEMPLATE, &ctx)
        .context("Failed to render layers report")
}

/// Renders release notes for one distribution and collector version.
/// Only records published for exactly `collector_version` are listed.
pub fn render_release_notes(
    distribution: &str,
    collector_version: &str,
    build_tags: &[String],
    records: &[ArtifactRecord],
    template_dir: Option<&Path>,
) -> Result<String> {
    let mut rows: Vec<ReleaseNoteRow<'_>> = records
        .iter()
        .filter(|r| r.collector_version_input.as_deref() == Some(collector_version))
        .map(|r| ReleaseNoteRow {
            region: &r.region,
            architecture: r.architecture.as_deref().unwrap_or("N/A"),
            arn: &r.layer_arn,
        })
        .collect();
    rows.sort_by(|a, b| (a.region, a.architecture).cmp(&(b.region, b.architecture)));
    tracing::debug!(
        distribution = %distribution,
        version = %collector_version,
        matching = rows.len(),
        total = records.len(),
        "Selected records for release notes"
    );

    let tera = load_templates(
        template_dir,
        RELEASE_NOTES_TEMPLATE,
        include_str!("templates/release_notes.md"),
    )?;
    let mut ctx = TeraContext::new();
    ctx.insert("distribution", distribution);
    ctx.insert("collector_version", collector_version);
    ctx.insert("tags", build_tags);
    ctx.insert("layers", &rows);
    tera.render(RELEASE_NOTES_TEMPLATE, &ctx)
        .context("Failed to render release notes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryStore;
    use chrono::TimeZone;

    fn record(
        dist: &str,
        arch: Option<&str>,
        region: &str,
        version: &str,
        ts: &str,
    ) -> ArtifactRecord {
        let arn = format!(
            "arn:aws:lambda:{}:123456789012:layer:collector-{}-{}:1",
            region,
            arch.unwrap_or("any"),
            dist
        );
        let mut r = ArtifactRecord::new(arn, region, dist, "hash");
        r.architecture = arch.map(str::to_string);
        r.collector_version_input = Some(version.to_string());
        r.layer_version_str = Some(version.trim_start_matches('v').replace('.', "_"));
        r.publish_timestamp = ts.to_string();
        r
    }

    fn order() -> Vec<String> {
        vec!["default".to_string(), "minimal".to_string()]
    }

    #[test]
    fn test_grouping_and_ordering() {
        let records = vec![
            record("minimal", Some("arm64"), "us-east-1", "v1", "2025-01-02T00:00:00Z"),
            record("zeta", Some("amd64"), "us-east-1", "v1", "2025-01-01T00:00:00Z"),
            record("minimal", Some("amd64"), "us-west-2", "v1", "2025-01-01T00:00:00Z"),
            record("minimal", Some("amd64"), "eu-west-1", "v1", "2025-01-03T00:00:00Z"),
            record("minimal", Some("riscv"), "eu-west-1", "v1", "2025-01-03T00:00:00Z"),
        ];
        let groups = group_records(&records, &order());
        let names: Vec<_> = groups.iter().map(|g| g.distribution.as_str()).collect();
        assert_eq!(names, vec!["minimal", "zeta"]);

        let archs: Vec<_> = groups[0]
            .architectures
            .iter()
            .map(|a| a.architecture.as_str())
            .collect();
        assert_eq!(archs, vec!["amd64", "arm64", "unknown"]);
        let regions: Vec<_> = groups[0].architectures[0]
            .layers
            .iter()
            .map(|l| l.region.as_str())
            .collect();
        assert_eq!(regions, vec!["eu-west-1", "us-west-2"]);
    }

    #[test]
    fn test_filter_by_arn_glob() {
        let records = vec![
            record("minimal", Some("amd64"), "us-east-1", "v1", ""),
            record("clickhouse", Some("arm64"), "us-east-1", "v1", ""),
        ];
        let filtered = filter_by_arn(records, "*arm64-clickhouse*").unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].distribution, "clickhouse");
    }

    #[test]
    fn test_layers_report_renders_tables() {
        let records = vec![record(
            "minimal",
            Some("amd64"),
            "us-east-1",
            "v0.119.0",
            "2025-01-02T03:04:05+00:00",
        )];
        let groups = group_records(&records, &order());
        let generated_at = Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap();
        let report =
            render_layers_report(&groups, "layers-table", None, generated_at, None).unwrap();

        assert!(report.starts_with("# OpenTelemetry Lambda Layers Report"));
        assert!(report.contains("Generated on: 2025-02-01 12:00:00 UTC"));
        assert!(report.contains("Source: DynamoDB table 'layers-table'"));
        assert!(report.contains("### minimal Distribution"));
        assert!(report.contains("#### amd64 Architecture"));
        assert!(report.contains(&format!(
            "| us-east-1 | `{}` | 0_119_0 | 2025-01-02T03:04:05Z |",
            records[0].layer_arn
        )));
        assert!(report.contains("## Usage Instructions"));
    }

    #[test]
    fn test_empty_report_with_pattern() {
        let report = render_layers_report(&[], "t", Some("*nothing*"), Utc::now(), None).unwrap();
        assert!(report.contains("Filtered by pattern: `*nothing*`"));
        assert!(report.contains("No layer metadata found"));
    }

    #[test]
    fn test_release_notes_filter_and_sort() {
        let records = vec![
            record("minimal", Some("arm64"), "us-east-1", "v0.119.0", ""),
            record("minimal", Some("amd64"), "us-east-1", "v0.119.0", ""),
            record("minimal", Some("amd64"), "eu-west-1", "v0.119.0", ""),
            record("minimal", Some("amd64"), "eu-west-1", "v0.118.0", ""),
        ];
        let tags = vec!["lambdacomponents.custom".to_string()];
        let notes = render_release_notes("minimal", "v0.119.0", &tags, &records, None).unwrap();

        assert!(notes.starts_with("## Release Details for minimal - Collector v0.119.0"));
        assert!(notes.contains("- `lambdacomponents.custom`"));
        let rows: Vec<&str> = notes
            .lines()
            .filter(|l| l.starts_with("| ") && l.contains("arn:"))
            .collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("| eu-west-1 | amd64 |"));
        assert!(rows[1].starts_with("| us-east-1 | amd64 |"));
        assert!(rows[2].starts_with("| us-east-1 | arm64 |"));
    }

    #[test]
    fn test_release_notes_without_tags_or_layers() {
        let notes = render_release_notes("default", "v1", &[], &[], None).unwrap();
        assert!(notes.contains("- Default (no specific tags)"));
        assert!(notes.contains("No matching layers found"));
    }

    #[test]
    fn test_custom_template_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("release_notes.md"),
            "{{ distribution }}={{ layers | length }}",
        )
        .unwrap();
        let notes = render_release_notes("minimal", "v1", &[], &[], Some(dir.path())).unwrap();
        assert_eq!(notes, "minimal=0");
        assert!(render_layers_report(&[], "t", None, Utc::now(), Some(dir.path())).is_err());
    }

    #[tokio::test]
    async fn test_fetch_records_queries_each_distribution() {
        let store = InMemoryStore::default();
        store.insert(record("minimal", Some("amd64"), "us-east-1", "v1", ""));
        store.insert(record("clickhouse", Some("amd64"), "us-east-1", "v1", ""));
        store.insert(record("other", Some("amd64"), "us-east-1", "v1", ""));
        let records =
            fetch_records(&store, &["minimal".to_string(), "clickhouse".to_string()]).await;
        assert_eq!(records.len(), 2);
    }
}
