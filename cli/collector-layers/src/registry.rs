//! Layer registry access.
//!
//! [`LayerRegistry`] is the seam the publish protocol talks to; [`LambdaRegistry`]
//! implements it on top of the AWS Lambda layer API.

use crate::error::RegistryError;
use async_trait::async_trait;
use aws_sdk_lambda::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{Architecture, LayerVersionContentInput, Runtime};
use aws_sdk_lambda::Client as LambdaClient;

/// License attached to every published layer version.
pub const LAYER_LICENSE: &str = "Apache 2.0";

/// Statement id used for the public-read grant.
pub const PUBLIC_STATEMENT_ID: &str = "publish";

/// One published version of a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerVersion {
    pub arn: String,
    pub version: i64,
    pub description: Option<String>,
    pub created_date: Option<String>,
}

impl LayerVersion {
    /// True when the stored description embeds `content_hash`.
    pub fn matches_hash(&self, content_hash: &str) -> bool {
        !content_hash.is_empty()
            && self
                .description
                .as_deref()
                .is_some_and(|d| d.contains(content_hash))
    }
}

/// Everything needed to publish a new layer version.
#[derive(Debug, Clone)]
pub struct PublishLayerInput {
    pub layer_name: String,
    pub description: String,
    pub zip_file: Vec<u8>,
    /// Registry labels such as `x86_64` or `arm64`.
    pub compatible_architectures: Vec<String>,
    pub compatible_runtimes: Vec<String>,
    pub license_info: String,
}

#[async_trait]
pub trait LayerRegistry: Send + Sync {
    /// Lists every version of `layer_name`. An unknown layer yields an empty list.
    async fn list_versions(&self, layer_name: &str) -> Result<Vec<LayerVersion>, RegistryError>;

    async fn publish(&self, input: PublishLayerInput) -> Result<LayerVersion, RegistryError>;

    /// True when a resource policy already exists on the version.
    async fn has_public_grant(&self, layer_name: &str, version: i64)
        -> Result<bool, RegistryError>;

    async fn grant_public_read(&self, layer_name: &str, version: i64)
        -> Result<(), RegistryError>;
}

/// Picks the most recent version (highest version number).
pub fn latest_version(versions: &[LayerVersion]) -> Option<&LayerVersion> {
    versions.iter().max_by_key(|v| v.version)
}

/// Maps an AWS error code onto the registry error taxonomy.
pub fn classify_error(
    operation: &'static str,
    code: Option<&str>,
    message: Option<&str>,
) -> RegistryError {
    let message = message.unwrap_or_default().to_string();
    match code {
        Some("ResourceNotFoundException") => RegistryError::NotFound { operation },
        Some("AccessDeniedException") | Some("AccessDenied") => {
            RegistryError::PermissionDenied { operation, message }
        }
        Some(code) => RegistryError::Service {
            operation,
            code: code.to_string(),
            message,
        },
        None => RegistryError::Service {
            operation,
            code: "Unknown".to_string(),
            message,
        },
    }
}

fn from_sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> RegistryError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::ServiceError(context) => {
            classify_error(operation, context.err().code(), context.err().message())
        }
        other => RegistryError::Service {
            operation,
            code: "SdkError".to_string(),
            message: DisplayErrorContext(other).to_string(),
        },
    }
}

/// [`LayerRegistry`] backed by the AWS Lambda API in a single region.
#[derive(Clone)]
pub struct LambdaRegistry {
    client: LambdaClient,
}

impl LambdaRegistry {
    pub fn new(client: LambdaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LayerRegistry for LambdaRegistry {
    async fn list_versions(&self, layer_name: &str) -> Result<Vec<LayerVersion>, RegistryError> {
        let result = self
            .client
            .list_layer_versions()
            .layer_name(layer_name)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await;

        match result {
            Ok(items) => Ok(items
                .into_iter()
                .filter_map(|item| {
                    Some(LayerVersion {
                        arn: item.layer_version_arn()?.to_string(),
                        version: item.version(),
                        description: item.description().map(str::to_string),
                        created_date: item.created_date().map(str::to_string),
                    })
                })
                .collect()),
            Err(err) => match from_sdk_error("ListLayerVersions", err) {
                RegistryError::NotFound { .. } => {
                    tracing::debug!(layer = %layer_name, "Layer does not exist yet");
                    Ok(Vec::new())
                }
                other => Err(other),
            },
        }
    }

    async fn publish(&self, input: PublishLayerInput) -> Result<LayerVersion, RegistryError> {
        let architectures = input
            .compatible_architectures
            .iter()
            .map(|a| Architecture::from(a.as_str()))
            .collect::<Vec<_>>();
        let runtimes = if input.compatible_runtimes.is_empty() {
            None
        } else {
            Some(
                input
                    .compatible_runtimes
                    .iter()
                    .map(|r| Runtime::from(r.as_str()))
                    .collect::<Vec<_>>(),
            )
        };

        tracing::debug!(
            layer = %input.layer_name,
            bytes = input.zip_file.len(),
            architectures = ?input.compatible_architectures,
            runtimes = ?input.compatible_runtimes,
            "Publishing layer version"
        );

        let output = self
            .client
            .publish_layer_version()
            .layer_name(&input.layer_name)
            .description(&input.description)
            .license_info(&input.license_info)
            .content(
                LayerVersionContentInput::builder()
                    .zip_file(Blob::new(input.zip_file))
                    .build(),
            )
            .set_compatible_architectures(Some(architectures))
            .set_compatible_runtimes(runtimes)
            .send()
            .await
            .map_err(|e| from_sdk_error("PublishLayerVersion", e))?;

        let arn = output
            .layer_version_arn()
            .ok_or_else(|| RegistryError::Service {
                operation: "PublishLayerVersion",
                code: "MissingArn".to_string(),
                message: "response did not include a layer version ARN".to_string(),
            })?
            .to_string();

        Ok(LayerVersion {
            arn,
            version: output.version(),
            description: output.description().map(str::to_string),
            created_date: output.created_date().map(str::to_string),
        })
    }

    async fn has_public_grant(
        &self,
        layer_name: &str,
        version: i64,
    ) -> Result<bool, RegistryError> {
        match self
            .client
            .get_layer_version_policy()
            .layer_name(layer_name)
            .version_number(version)
            .send()
            .await
        {
            Ok(output) => Ok(output.policy().is_some_and(|p| !p.is_empty())),
            Err(err) => match from_sdk_error("GetLayerVersionPolicy", err) {
                RegistryError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn grant_public_read(
        &self,
        layer_name: &str,
        version: i64,
    ) -> Result<(), RegistryError> {
        self.client
            .add_layer_version_permission()
            .layer_name(layer_name)
            .version_number(version)
            .statement_id(PUBLIC_STATEMENT_ID)
            .action("lambda:GetLayerVersion")
            .principal("*")
            .send()
            .await
            .map_err(|e| from_sdk_error("AddLayerVersionPermission", e))?;
        Ok(())
    }
}
