//! Layer naming.
//!
//! A layer name is derived from `{base}-{arch}-{distribution}-{version}-{release_group}`,
//! with optional parts skipped, then sanitized to the Lambda naming rules
//! (`[A-Za-z0-9_-]`, must start with a letter, at most 140 characters).

use crate::error::IdentityError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a Lambda layer name.
pub const MAX_LAYER_NAME_LEN: usize = 140;

/// Prefix added when a sanitized name would not start with a letter.
const NAME_PREFIX: &str = "layer-";

/// Version token used when nothing else is available.
const FALLBACK_VERSION: &str = "latest";

/// Target CPU architecture of a collector build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    #[value(alias = "x86_64")]
    Amd64,
    #[value(alias = "aarch64")]
    Arm64,
}

impl Architecture {
    pub const ALL: [Architecture; 2] = [Architecture::Amd64, Architecture::Arm64];

    /// Short code used in file names, layer names and `GOARCH`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Amd64 => "amd64",
            Architecture::Arm64 => "arm64",
        }
    }

    /// Label the Lambda API expects in `CompatibleArchitectures`.
    pub fn compatibility_label(&self) -> &'static str {
        match self {
            Architecture::Amd64 => "x86_64",
            Architecture::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "amd64" | "x86_64" => Ok(Architecture::Amd64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            other => Err(IdentityError::UnsupportedArchitecture(other.to_string())),
        }
    }
}

/// Registry compatibility labels for an optional architecture.
/// No architecture means the layer is compatible with all of them.
pub fn compatible_architectures(arch: Option<Architecture>) -> Vec<&'static str> {
    match arch {
        Some(a) => vec![a.compatibility_label()],
        None => Architecture::ALL
            .iter()
            .map(Architecture::compatibility_label)
            .collect(),
    }
}

/// Inputs to [`build_identity`].
#[derive(Debug, Clone, Default)]
pub struct IdentityInput<'a> {
    pub base_name: &'a str,
    pub architecture: Option<Architecture>,
    pub distribution: Option<&'a str>,
    pub explicit_version: Option<&'a str>,
    pub collector_version: Option<&'a str>,
    /// Git ref of the triggering build (e.g. `refs/tags/v0.119.0`), consulted
    /// only when neither an explicit nor a collector version is given.
    pub git_ref: Option<&'a str>,
    pub release_group: &'a str,
}

/// The derived, registry-safe name of a layer plus the pieces used to build it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerIdentity {
    pub name: String,
    pub architecture: Option<Architecture>,
    /// Labels for `CompatibleArchitectures`.
    pub compatible_architectures: Vec<&'static str>,
    /// Sanitized version token as it appears in the name.
    pub version_token: String,
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Derives a version from a git ref: the last path segment with any leading
/// non-version characters removed (`refs/tags/v0.119.0` -> `0.119.0`).
pub fn version_from_git_ref(git_ref: &str) -> Option<String> {
    let last = match git_ref.rsplit_once('/') {
        Some((_, last)) => last,
        None => git_ref,
    };
    let version = last.trim_start_matches(|c: char| !c.is_ascii_digit() && c != '.');
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

/// Picks the version token: explicit > collector version (without leading `v`)
/// > git ref > `latest`.
pub fn select_version(input: &IdentityInput<'_>) -> String {
    fn non_empty(v: Option<&str>) -> Option<&str> {
        v.map(str::trim).filter(|v| !v.is_empty())
    }

    if let Some(explicit) = non_empty(input.explicit_version) {
        return explicit.to_string();
    }
    if let Some(collector) = non_empty(input.collector_version) {
        return collector
            .strip_prefix('v')
            .unwrap_or(collector)
            .to_string();
    }
    non_empty(input.git_ref)
        .and_then(version_from_git_ref)
        .unwrap_or_else(|| FALLBACK_VERSION.to_string())
}

/// Builds the layer identity. Pure: the same input always yields the same name.
pub fn build_identity(input: &IdentityInput<'_>) -> Result<LayerIdentity, IdentityError> {
    if input.base_name.trim().is_empty() {
        return Err(IdentityError::EmptyBaseName);
    }

    let mut name = input.base_name.to_string();
    if let Some(arch) = input.architecture {
        name.push('-');
        name.push_str(arch.as_str());
    }
    if let Some(distribution) = input.distribution.filter(|d| !d.is_empty()) {
        name.push('-');
        name.push_str(distribution);
    }
    let version_token = sanitize(&select_version(input));
    name.push('-');
    name.push_str(&version_token);
    name.push('-');
    name.push_str(input.release_group);

    let mut name = sanitize(&name);
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        name = format!("{}{}", NAME_PREFIX, name);
    }
    if name.len() > MAX_LAYER_NAME_LEN {
        return Err(IdentityError::NameTooLong {
            len: name.len(),
            name,
            max: MAX_LAYER_NAME_LEN,
        });
    }

    tracing::debug!(layer_name = %name, version = %version_token, "Constructed layer name");
    Ok(LayerIdentity {
        name,
        architecture: input.architecture,
        compatible_architectures: compatible_architectures(input.architecture),
        version_token,
    })
}
