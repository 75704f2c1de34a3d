//! Error types shared by the library modules.
//!
//! Configuration and registry failures are fatal to the pipeline; metadata
//! store failures are always downgraded to warnings by the callers.

use thiserror::Error;

/// Errors raised while loading or resolving the distribution table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistributionError {
    #[error("distribution '{0}' not found in configuration")]
    NotFound(String),

    #[error("circular inheritance detected for distribution '{name}': {}", .chain.join(" -> "))]
    CircularInheritance { name: String, chain: Vec<String> },

    #[error("distribution '{name}' has base '{base}' which is not defined")]
    MissingBase { name: String, base: String },

    #[error("invalid distributions file {path}: {message}")]
    InvalidFile { path: String, message: String },
}

/// Errors raised while loading the tag-to-module dependency table.
#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("failed to read dependency file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed dependency file {path}: {message}")]
    Malformed { path: String, message: String },
}

/// Errors raised while deriving a layer identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("base layer name must not be empty")]
    EmptyBaseName,

    #[error("layer name '{name}' is {len} characters long (maximum {max})")]
    NameTooLong { name: String, len: usize, max: usize },

    #[error("unsupported architecture '{0}' (expected amd64 or arm64)")]
    UnsupportedArchitecture(String),
}

/// Errors returned by the layer registry.
///
/// `NotFound` is turned into an empty/absent result by callers wherever that
/// makes sense; `PermissionDenied` is always fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{operation}: resource not found")]
    NotFound { operation: &'static str },

    #[error("{operation}: permission denied ({message})")]
    PermissionDenied {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: {code} - {message}")]
    Service {
        operation: &'static str,
        code: String,
        message: String,
    },

    #[error("failed to read layer artifact {path}: {message}")]
    Artifact { path: String, message: String },
}

/// Errors returned by the metadata store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("invalid metadata record: missing required field '{0}'")]
    MissingField(&'static str),

    #[error("metadata {operation} failed: {message}")]
    Store {
        operation: &'static str,
        message: String,
    },

    #[error("failed to convert metadata item: {0}")]
    Conversion(String),
}

/// Fatal publish failures, tagged with the stage they happened in.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("{stage}: failed to hash artifact {path}: {source}")]
    Hash {
        stage: crate::publish::PublishStage,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage}: {source}")]
    Registry {
        stage: crate::publish::PublishStage,
        #[source]
        source: RegistryError,
    },
}

impl PublishError {
    pub fn stage(&self) -> crate::publish::PublishStage {
        match self {
            PublishError::Hash { stage, .. } | PublishError::Registry { stage, .. } => *stage,
        }
    }
}
