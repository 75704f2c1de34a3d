//! The publish protocol.
//!
//! Publishing is idempotent on content: the artifact is hashed, existing
//! versions of the layer are searched for that hash, and a new version is only
//! uploaded when none matches. Metadata is best-effort bookkeeping next to the
//! registry; the registry is authoritative.
//!
//! ```text
//! CHECKING ──match──▶ REUSING ──▶ REPAIRING_METADATA ──────────────────────────▶ DONE
//!     └──no match──▶ PUBLISHING ──▶ [GRANTING_PUBLIC_ACCESS] ──▶ WRITING_METADATA ──▶ DONE
//! ```

use crate::distribution::DEFAULT_DISTRIBUTION;
use crate::error::{PublishError, RegistryError};
use crate::hash::compute_content_hash;
use crate::identity::LayerIdentity;
use crate::metadata::{ArtifactRecord, MetadataStore};
use crate::registry::{
    latest_version, LayerRegistry, LayerVersion, PublishLayerInput, LAYER_LICENSE,
};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Maximum description length accepted by the registry.
pub const MAX_DESCRIPTION_LEN: usize = 256;

const TAGS_PREFIX: &str = "Build Tags: ";
const HASH_SEPARATOR: &str = " | SHA256: ";
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishStage {
    Checking,
    Reusing,
    Publishing,
    GrantingPublicAccess,
    WritingMetadata,
    RepairingMetadata,
    Done,
    Failed,
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublishStage::Checking => "CHECKING",
            PublishStage::Reusing => "REUSING",
            PublishStage::Publishing => "PUBLISHING",
            PublishStage::GrantingPublicAccess => "GRANTING_PUBLIC_ACCESS",
            PublishStage::WritingMetadata => "WRITING_METADATA",
            PublishStage::RepairingMetadata => "REPAIRING_METADATA",
            PublishStage::Done => "DONE",
            PublishStage::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What happened to public access during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum PublicAccess {
    NotRequested,
    /// Reused an existing version; its permissions were left untouched.
    Unchanged,
    AlreadyPublic,
    Granted,
    Failed(String),
}

impl PublicAccess {
    pub fn is_public(&self) -> bool {
        matches!(self, PublicAccess::AlreadyPublic | PublicAccess::Granted)
    }
}

/// What happened to the metadata record during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum MetadataStatus {
    Written,
    Repaired,
    AlreadyPresent,
    Failed(String),
}

impl MetadataStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, MetadataStatus::Failed(_))
    }
}

/// Inputs of one publish run.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub identity: LayerIdentity,
    pub base_name: String,
    pub artifact_path: PathBuf,
    pub region: String,
    pub distribution: Option<String>,
    pub build_tags: Vec<String>,
    pub collector_version: Option<String>,
    pub compatible_runtimes: Vec<String>,
    pub make_public: bool,
}

impl PublishRequest {
    fn distribution_or_default(&self) -> &str {
        self.distribution
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_DISTRIBUTION)
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub layer_name: String,
    pub region: String,
    pub layer_arn: String,
    pub version: i64,
    pub content_hash: String,
    pub reused: bool,
    pub distribution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collector_version: Option<String>,
    pub public_access: PublicAccess,
    pub metadata: MetadataStatus,
    /// Most recent version seen while checking, when a new version was published.
    #[serde(skip)]
    pub previous_version: Option<LayerVersion>,
    /// Stages visited, in order.
    pub stages: Vec<PublishStage>,
}

/// Builds the layer description: `Build Tags: {tags} | SHA256: {hash}`.
///
/// The tags part is shortened with `...` when the whole string would exceed
/// [`MAX_DESCRIPTION_LEN`]; the hash token is always kept intact.
pub fn build_description(build_tags: &str, content_hash: &str) -> String {
    let tags = if build_tags.trim().is_empty() {
        "N/A"
    } else {
        build_tags
    };
    let full = format!("{}{}{}{}", TAGS_PREFIX, tags, HASH_SEPARATOR, content_hash);
    if full.len() <= MAX_DESCRIPTION_LEN {
        return full;
    }

    let fixed = TAGS_PREFIX.len() + HASH_SEPARATOR.len() + content_hash.len() + ELLIPSIS.len();
    let mut cut = MAX_DESCRIPTION_LEN.saturating_sub(fixed).min(tags.len());
    while !tags.is_char_boundary(cut) {
        cut -= 1;
    }
    tracing::debug!(
        original_len = full.len(),
        kept_tag_bytes = cut,
        "Truncating layer description"
    );
    format!(
        "{}{}{}{}{}",
        TAGS_PREFIX,
        &tags[..cut],
        ELLIPSIS,
        HASH_SEPARATOR,
        content_hash
    )
}

/// Drives one artifact through the publish protocol.
pub struct Publisher<'a> {
    registry: &'a dyn LayerRegistry,
    store: &'a dyn MetadataStore,
    stages: Vec<PublishStage>,
}

impl<'a> Publisher<'a> {
    pub fn new(registry: &'a dyn LayerRegistry, store: &'a dyn MetadataStore) -> Self {
        Self {
            registry,
            store,
            stages: Vec::new(),
        }
    }

    fn enter(&mut self, stage: PublishStage) {
        tracing::debug!(stage = %stage, "Entering publish stage");
        self.stages.push(stage);
    }

    fn fail(&mut self, stage: PublishStage, source: RegistryError) -> PublishError {
        tracing::error!(stage = %stage, error = %source, "Publish failed");
        self.stages.push(PublishStage::Failed);
        PublishError::Registry { stage, source }
    }

    pub async fn run(mut self, request: &PublishRequest) -> Result<PublishOutcome, PublishError> {
        let layer_name = request.identity.name.as_str();
        self.enter(PublishStage::Checking);

        let artifact_path = request.artifact_path.clone();
        let content_hash =
            tokio::task::spawn_blocking(move || compute_content_hash(&artifact_path))
                .await
                .unwrap_or_else(|join_err| Err(std::io::Error::other(join_err)))
                .map_err(|source| PublishError::Hash {
                    stage: PublishStage::Checking,
                    path: request.artifact_path.display().to_string(),
                    source,
                })?;

        let versions = match self.registry.list_versions(layer_name).await {
            Ok(versions) => versions,
            Err(e) => return Err(self.fail(PublishStage::Checking, e)),
        };
        tracing::info!(
            layer = %layer_name,
            existing_versions = versions.len(),
            hash = %content_hash,
            "Checked existing layer versions"
        );

        if let Some(existing) = versions.iter().find(|v| v.matches_hash(&content_hash)) {
            let existing = existing.clone();
            self.enter(PublishStage::Reusing);
            tracing::info!(arn = %existing.arn, "Layer with identical content already exists, reusing it");
            return Ok(self.reuse(request, existing, content_hash).await);
        }

        let previous_version = latest_version(&versions).cloned();
        if let Some(previous) = &previous_version {
            tracing::info!(previous_arn = %previous.arn, "Content changed since the latest version");
        }

        self.enter(PublishStage::Publishing);
        let published = match self.publish_new(request, &content_hash).await {
            Ok(published) => published,
            Err(e) => return Err(self.fail(PublishStage::Publishing, e)),
        };
        tracing::info!(arn = %published.arn, version = published.version, "Published new layer version");

        let public_access = if request.make_public {
            self.enter(PublishStage::GrantingPublicAccess);
            self.grant_public(layer_name, published.version).await
        } else {
            PublicAccess::NotRequested
        };

        self.enter(PublishStage::WritingMetadata);
        let mut record = self.record_for(request, &published.arn, &content_hash);
        record.public = Some(public_access.is_public());
        let metadata = match self.store.put(&record.normalized()).await {
            Ok(()) => MetadataStatus::Written,
            Err(e) => {
                tracing::warn!(error = %e, arn = %published.arn, "Failed to write layer metadata");
                MetadataStatus::Failed(e.to_string())
            }
        };

        self.enter(PublishStage::Done);
        Ok(PublishOutcome {
            layer_name: layer_name.to_string(),
            region: request.region.clone(),
            layer_arn: published.arn,
            version: published.version,
            content_hash,
            reused: false,
            distribution: request.distribution_or_default().to_string(),
            architecture: request.identity.architecture.map(|a| a.to_string()),
            collector_version: request.collector_version.clone(),
            public_access,
            metadata,
            previous_version,
            stages: self.stages,
        })
    }

    async fn reuse(
        mut self,
        request: &PublishRequest,
        existing: LayerVersion,
        content_hash: String,
    ) -> PublishOutcome {
        self.enter(PublishStage::RepairingMetadata);
        let metadata = match self.store.get(&existing.arn).await {
            Ok(Some(_)) => {
                tracing::debug!(arn = %existing.arn, "Metadata record already present");
                MetadataStatus::AlreadyPresent
            }
            Ok(None) => {
                tracing::info!(arn = %existing.arn, "Metadata record missing, repairing");
                let record = self.record_for(request, &existing.arn, &content_hash);
                match self.store.put(&record.normalized()).await {
                    Ok(()) => MetadataStatus::Repaired,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to repair layer metadata");
                        MetadataStatus::Failed(e.to_string())
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to look up layer metadata");
                MetadataStatus::Failed(e.to_string())
            }
        };

        self.enter(PublishStage::Done);
        PublishOutcome {
            layer_name: request.identity.name.clone(),
            region: request.region.clone(),
            layer_arn: existing.arn,
            version: existing.version,
            content_hash,
            reused: true,
            distribution: request.distribution_or_default().to_string(),
            architecture: request.identity.architecture.map(|a| a.to_string()),
            collector_version: request.collector_version.clone(),
            public_access: if request.make_public {
                PublicAccess::Unchanged
            } else {
                PublicAccess::NotRequested
            },
            metadata,
            previous_version: None,
            stages: self.stages,
        }
    }

    async fn publish_new(
        &self,
        request: &PublishRequest,
        content_hash: &str,
    ) -> Result<LayerVersion, RegistryError> {
        let zip_file = tokio::fs::read(&request.artifact_path)
            .await
            .map_err(|e| RegistryError::Artifact {
                path: request.artifact_path.display().to_string(),
                message: e.to_string(),
            })?;

        let input = PublishLayerInput {
            layer_name: request.identity.name.clone(),
            description: build_description(&request.build_tags.join(","), content_hash),
            zip_file,
            compatible_architectures: request
                .identity
                .compatible_architectures
                .iter()
                .map(|a| a.to_string())
                .collect(),
            compatible_runtimes: request.compatible_runtimes.clone(),
            license_info: LAYER_LICENSE.to_string(),
        };
        self.registry.publish(input).await
    }

    async fn grant_public(&self, layer_name: &str, version: i64) -> PublicAccess {
        match self.registry.has_public_grant(layer_name, version).await {
            Ok(true) => {
                tracing::info!(layer = %layer_name, version, "Layer version is already public");
                return PublicAccess::AlreadyPublic;
            }
            Ok(false) => {}
            Err(e) => tracing::debug!(error = %e, "Could not read layer version policy"),
        }
        match self.registry.grant_public_read(layer_name, version).await {
            Ok(()) => {
                tracing::info!(layer = %layer_name, version, "Granted public read access");
                PublicAccess::Granted
            }
            Err(e) => {
                tracing::warn!(error = %e, layer = %layer_name, version, "Failed to make layer public");
                PublicAccess::Failed(e.to_string())
            }
        }
    }

    fn record_for(
        &self,
        request: &PublishRequest,
        arn: &str,
        content_hash: &str,
    ) -> ArtifactRecord {
        let mut record = ArtifactRecord::new(
            arn,
            &request.region,
            request.distribution_or_default(),
            content_hash,
        );
        record.base_name = Some(request.base_name.clone());
        record.architecture = request.identity.architecture.map(|a| a.to_string());
        record.layer_version_str = Some(request.identity.version_token.clone());
        record.collector_version_input = request.collector_version.clone();
        record.compatible_runtimes = request.compatible_runtimes.clone();
        record.build_tags = Some(request.build_tags.join(","));
        record
    }
}

/// Runs the publish protocol once.
pub async fn publish_layer(
    registry: &dyn LayerRegistry,
    store: &dyn MetadataStore,
    request: &PublishRequest,
) -> Result<PublishOutcome, PublishError> {
    Publisher::new(registry, store).run(request).await
}
