//! Release naming and CI job matrices.

use crate::distribution::{join_tags, DistributionTable, DEFAULT_DISTRIBUTION};
use crate::error::DistributionError;
use crate::identity::Architecture;
use anyhow::{bail, Result};
use serde::Serialize;

/// Regions a release is published to when `all` is requested.
pub const DEFAULT_RELEASE_REGIONS: &[&str] = &[
    "ca-central-1",
    "ca-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "us-east-1",
    "us-east-2",
    "us-west-2",
];

const ALL: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseInfo {
    pub tag: String,
    pub title: String,
    pub build_tags: String,
    pub distribution: String,
    pub collector_version: String,
    pub release_group: String,
    /// True when the requested distribution was missing and the default was used.
    pub fell_back: bool,
}

/// Computes the release tag, title and build tags of a distribution release.
///
/// Tag and title always carry the requested distribution name, even when its
/// build tags came from the default distribution.
pub fn release_info(
    table: &DistributionTable,
    distribution: &str,
    collector_version: &str,
    release_group: &str,
) -> Result<ReleaseInfo, DistributionError> {
    let resolution = table.resolve_with_fallback(distribution, DEFAULT_DISTRIBUTION)?;
    let version = collector_version.trim_start_matches('v');
    Ok(ReleaseInfo {
        tag: format!("{}-v{}-{}", distribution, version, release_group),
        title: format!(
            "Release distribution:{} v{} ({})",
            distribution, version, release_group
        ),
        build_tags: join_tags(&resolution.tags),
        distribution: distribution.to_string(),
        collector_version: collector_version.to_string(),
        release_group: release_group.to_string(),
        fell_back: resolution.fell_back,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildMatrix {
    pub architecture: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseMatrix {
    pub architecture: Vec<String>,
    pub aws_region: Vec<String>,
}

/// Expands `all|amd64|arm64` and `all|<region>` into job matrices.
pub fn job_matrices(
    architecture: &str,
    region: &str,
    release_regions: &[String],
) -> Result<(BuildMatrix, ReleaseMatrix)> {
    let architectures: Vec<String> = if architecture == ALL {
        Architecture::ALL.iter().map(|a| a.to_string()).collect()
    } else {
        vec![architecture.parse::<Architecture>()?.to_string()]
    };

    let regions: Vec<String> = if region == ALL {
        release_regions.to_vec()
    } else if region.trim().is_empty() {
        bail!("region must be 'all' or an AWS region name");
    } else {
        vec![region.to_string()]
    };

    Ok((
        BuildMatrix {
            architecture: architectures.clone(),
        },
        ReleaseMatrix {
            architecture: architectures,
            aws_region: regions,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISTRIBUTIONS: &str = r#"
default:
  description: Upstream default
  buildtags: []
minimal:
  buildtags: [lambdacomponents.custom, lambdacomponents.receiver.otlp]
clickhouse:
  base: minimal
  buildtags: [lambdacomponents.exporter.clickhouse]
"#;

    fn table() -> DistributionTable {
        DistributionTable::from_yaml_str(DISTRIBUTIONS).unwrap()
    }

    fn regions() -> Vec<String> {
        DEFAULT_RELEASE_REGIONS.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_release_info() {
        let info = release_info(&table(), "clickhouse", "v0.119.0", "prod").unwrap();
        assert_eq!(info.tag, "clickhouse-v0.119.0-prod");
        assert_eq!(info.title, "Release distribution:clickhouse v0.119.0 (prod)");
        assert_eq!(
            info.build_tags,
            "lambdacomponents.custom,lambdacomponents.receiver.otlp,lambdacomponents.exporter.clickhouse"
        );
        assert!(!info.fell_back);
    }

    #[test]
    fn test_release_info_falls_back_to_default() {
        let info = release_info(&table(), "unknown", "0.120.0", "beta").unwrap();
        assert!(info.fell_back);
        assert_eq!(info.build_tags, "");
        assert_eq!(info.tag, "unknown-v0.120.0-beta");
    }

    #[test]
    fn test_release_info_without_default_fails() {
        let table = DistributionTable::from_yaml_str("minimal:\n  buildtags: [a]\n").unwrap();
        assert!(matches!(
            release_info(&table, "missing", "v1", "prod"),
            Err(DistributionError::NotFound(_))
        ));
    }

    #[test]
    fn test_matrices_expand_all() {
        let (build, release) = job_matrices("all", "all", &regions()).unwrap();
        assert_eq!(build.architecture, vec!["amd64", "arm64"]);
        assert_eq!(release.aws_region.len(), DEFAULT_RELEASE_REGIONS.len());
        assert_eq!(
            serde_json::to_string(&build).unwrap(),
            r#"{"architecture":["amd64","arm64"]}"#
        );
    }

    #[test]
    fn test_matrices_single_values() {
        let (build, release) = job_matrices("arm64", "eu-west-1", &regions()).unwrap();
        assert_eq!(build.architecture, vec!["arm64"]);
        assert_eq!(release.aws_region, vec!["eu-west-1"]);
        assert!(job_matrices("sparc", "all", &regions()).is_err());
    }
}
