//! GitHub Actions output files.

use crate::publish::PublishOutcome;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Locations of the workflow files, usually taken from `GITHUB_OUTPUT` and
/// `GITHUB_STEP_SUMMARY`. Either may be absent outside of a workflow.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFiles {
    pub output: Option<PathBuf>,
    pub step_summary: Option<PathBuf>,
}

impl WorkflowFiles {
    pub fn new(output: Option<PathBuf>, step_summary: Option<PathBuf>) -> Self {
        Self {
            output,
            step_summary,
        }
    }

    /// Appends `name=value`, switching to the `name<<DELIMITER` form for
    /// multi-line values. A no-op when no output file is configured.
    pub fn set_output(&self, name: &str, value: &str) -> Result<()> {
        let Some(path) = &self.output else {
            tracing::debug!(name, "GITHUB_OUTPUT not set, skipping output");
            return Ok(());
        };
        let entry = if value.contains('\n') {
            let delimiter = format!("EOF_{}", uuid::Uuid::new_v4().simple());
            format!("{}<<{}\n{}\n{}\n", name, delimiter, value, delimiter)
        } else {
            format!("{}={}\n", name, value)
        };
        append(path, &entry)
    }

    /// Appends markdown to the step summary, if configured.
    pub fn append_summary(&self, markdown: &str) -> Result<()> {
        match &self.step_summary {
            Some(path) => append(path, markdown),
            None => Ok(()),
        }
    }
}

fn append(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Step summary table for a publish run.
pub fn publish_summary(outcome: &PublishOutcome) -> String {
    let mut rows = vec![
        ("Layer Name", outcome.layer_name.clone()),
        ("Region", outcome.region.clone()),
        ("Layer ARN", format!("`{}`", outcome.layer_arn)),
        ("Content Hash", format!("`{}`", outcome.content_hash)),
        (
            "Status",
            if outcome.reused {
                "Reused existing layer".to_string()
            } else {
                "Published new layer".to_string()
            },
        ),
        ("Distribution", outcome.distribution.clone()),
    ];
    if let Some(arch) = &outcome.architecture {
        rows.push(("Architecture", arch.clone()));
    }
    if let Some(version) = &outcome.collector_version {
        rows.push(("Collector Version", version.clone()));
    }
    rows.push(("Public", outcome.public_access.is_public().to_string()));

    let mut summary = String::from("## Layer Publish Summary\n\n");
    summary.push_str("| Property | Value |\n|----------|-------|\n");
    for (key, value) in rows {
        summary.push_str(&format!("| {} | {} |\n", key, value));
    }
    summary.push('\n');
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{MetadataStatus, PublicAccess, PublishStage};
    use std::fs;

    fn outcome() -> PublishOutcome {
        PublishOutcome {
            layer_name: "collector-amd64-minimal-0_119_0-prod".to_string(),
            region: "eu-west-1".to_string(),
            layer_arn: "arn:aws:lambda:eu-west-1:123456789012:layer:collector:3".to_string(),
            version: 3,
            content_hash: "abc".to_string(),
            reused: true,
            distribution: "minimal".to_string(),
            architecture: Some("amd64".to_string()),
            collector_version: None,
            public_access: PublicAccess::Granted,
            metadata: MetadataStatus::AlreadyPresent,
            previous_version: None,
            stages: vec![PublishStage::Checking, PublishStage::Done],
        }
    }

    #[test]
    fn test_outputs_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        let files = WorkflowFiles::new(Some(path.clone()), None);
        files.set_output("skip_publish", "true").unwrap();
        files.set_output("layer_arn", "arn:x").unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "skip_publish=true\nlayer_arn=arn:x\n"
        );
    }

    #[test]
    fn test_multiline_output_uses_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        let files = WorkflowFiles::new(Some(path.clone()), None);
        files.set_output("notes", "line one\nline two").unwrap();

        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        let delimiter = lines[0].strip_prefix("notes<<").unwrap();
        assert!(delimiter.starts_with("EOF_"));
        assert_eq!(&lines[1..3], &["line one", "line two"]);
        assert_eq!(lines[3], delimiter);
    }

    #[test]
    fn test_unset_files_are_ignored() {
        let files = WorkflowFiles::default();
        files.set_output("a", "b").unwrap();
        files.append_summary("x").unwrap();
    }

    #[test]
    fn test_publish_summary() {
        let summary = publish_summary(&outcome());
        assert!(summary.contains("| Status | Reused existing layer |"));
        assert!(summary.contains("| Architecture | amd64 |"));
        assert!(summary.contains("| Public | true |"));
        assert!(!summary.contains("Collector Version"));
    }
}
