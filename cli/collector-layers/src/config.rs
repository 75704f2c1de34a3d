//! Project settings loaded from `collector-layers.toml`.
//!
//! Every setting has a built-in default; the file (if any) overrides the
//! defaults and command-line flags override the file.

use crate::build::{DEFAULT_UPSTREAM_REF, DEFAULT_UPSTREAM_REPO};
use crate::metadata::{DEFAULT_DISTRIBUTION_INDEX, DEFAULT_TABLE_NAME, DEFAULT_TABLE_REGION};
use crate::release::DEFAULT_RELEASE_REGIONS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "collector-layers.toml";

pub const DEFAULT_DISTRIBUTIONS_FILE: &str = "config/distributions.yaml";
pub const DEFAULT_DEPENDENCIES_FILE: &str = "config/component_dependencies.yaml";
pub const DEFAULT_COMPONENTS_DIR: &str = "components";
/// Runtimes attached to layers published by `run`.
pub const DEFAULT_RUNTIMES: &[&str] = &[
    "nodejs18.x",
    "nodejs20.x",
    "java17",
    "python3.9",
    "python3.10",
    "python3.11",
    "python3.12",
    "provided.al2023",
];

/// Shape of `collector-layers.toml`.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(rename = "metadata-table", skip_serializing_if = "Option::is_none")]
    pub metadata_table: Option<String>,
    #[serde(rename = "metadata-region", skip_serializing_if = "Option::is_none")]
    pub metadata_region: Option<String>,
    #[serde(rename = "metadata-index", skip_serializing_if = "Option::is_none")]
    pub metadata_index: Option<String>,

    #[serde(rename = "distributions-file", skip_serializing_if = "Option::is_none")]
    pub distributions_file: Option<PathBuf>,
    #[serde(rename = "dependencies-file", skip_serializing_if = "Option::is_none")]
    pub dependencies_file: Option<PathBuf>,
    #[serde(rename = "components-dir", skip_serializing_if = "Option::is_none")]
    pub components_dir: Option<PathBuf>,

    #[serde(rename = "release-regions", skip_serializing_if = "Option::is_none")]
    pub release_regions: Option<Vec<String>>,
    #[serde(rename = "default-runtimes", skip_serializing_if = "Option::is_none")]
    pub default_runtimes: Option<Vec<String>>,

    #[serde(rename = "upstream-repo", skip_serializing_if = "Option::is_none")]
    pub upstream_repo: Option<String>,
    #[serde(rename = "upstream-ref", skip_serializing_if = "Option::is_none")]
    pub upstream_ref: Option<String>,
}

impl ConfigFile {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }
}

/// Settings after merging defaults, the config file and CLI overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub metadata_table: String,
    pub metadata_region: String,
    pub metadata_index: String,
    pub distributions_file: PathBuf,
    pub dependencies_file: PathBuf,
    pub components_dir: PathBuf,
    pub release_regions: Vec<String>,
    pub default_runtimes: Vec<String>,
    pub upstream_repo: String,
    pub upstream_ref: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            metadata_table: DEFAULT_TABLE_NAME.to_string(),
            metadata_region: DEFAULT_TABLE_REGION.to_string(),
            metadata_index: DEFAULT_DISTRIBUTION_INDEX.to_string(),
            distributions_file: PathBuf::from(DEFAULT_DISTRIBUTIONS_FILE),
            dependencies_file: PathBuf::from(DEFAULT_DEPENDENCIES_FILE),
            components_dir: PathBuf::from(DEFAULT_COMPONENTS_DIR),
            release_regions: DEFAULT_RELEASE_REGIONS.iter().map(|r| r.to_string()).collect(),
            default_runtimes: DEFAULT_RUNTIMES.iter().map(|r| r.to_string()).collect(),
            upstream_repo: DEFAULT_UPSTREAM_REPO.to_string(),
            upstream_ref: DEFAULT_UPSTREAM_REF.to_string(),
        }
    }
}

/// Values given on the command line; `None` leaves the setting alone.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub metadata_table: Option<String>,
    pub metadata_region: Option<String>,
    pub distributions_file: Option<PathBuf>,
    pub dependencies_file: Option<PathBuf>,
    pub components_dir: Option<PathBuf>,
}

impl Settings {
    fn apply_file(mut self, file: ConfigFile) -> Self {
        if let Some(v) = file.metadata_table {
            self.metadata_table = v;
        }
        if let Some(v) = file.metadata_region {
            self.metadata_region = v;
        }
        if let Some(v) = file.metadata_index {
            self.metadata_index = v;
        }
        if let Some(v) = file.distributions_file {
            self.distributions_file = v;
        }
        if let Some(v) = file.dependencies_file {
            self.dependencies_file = v;
        }
        if let Some(v) = file.components_dir {
            self.components_dir = v;
        }
        if let Some(v) = file.release_regions.filter(|r| !r.is_empty()) {
            self.release_regions = v;
        }
        if let Some(v) = file.default_runtimes {
            self.default_runtimes = v;
        }
        if let Some(v) = file.upstream_repo {
            self.upstream_repo = v;
        }
        if let Some(v) = file.upstream_ref {
            self.upstream_ref = v;
        }
        self
    }

    fn apply_overrides(mut self, overrides: &SettingsOverrides) -> Self {
        if let Some(v) = &overrides.metadata_table {
            self.metadata_table = v.clone();
        }
        if let Some(v) = &overrides.metadata_region {
            self.metadata_region = v.clone();
        }
        if let Some(v) = &overrides.distributions_file {
            self.distributions_file = v.clone();
        }
        if let Some(v) = &overrides.dependencies_file {
            self.dependencies_file = v.clone();
        }
        if let Some(v) = &overrides.components_dir {
            self.components_dir = v.clone();
        }
        self
    }

    /// Loads settings. An explicit `config_path` must exist; otherwise
    /// `collector-layers.toml` in the working directory is used if present.
    pub fn load(config_path: Option<&Path>, overrides: &SettingsOverrides) -> Result<Self> {
        let file = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => {
                let default_path = Path::new(CONFIG_FILE);
                if default_path.is_file() {
                    Some(read_config_file(default_path)?)
                } else {
                    None
                }
            }
        };
        Ok(Self::resolve(file, overrides))
    }

    /// Applies precedence: overrides > file > defaults.
    pub fn resolve(file: Option<ConfigFile>, overrides: &SettingsOverrides) -> Self {
        let settings = match file {
            Some(file) => Settings::default().apply_file(file),
            None => Settings::default(),
        };
        settings.apply_overrides(overrides)
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
    let file = ConfigFile::from_toml_str(&content)
        .with_context(|| format!("Invalid configuration file {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Loaded configuration file");
    Ok(file)
}
