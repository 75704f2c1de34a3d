//! Layer metadata records and the store that holds them.
//!
//! Every published layer version gets one [`ArtifactRecord`], keyed by its ARN
//! (`pk`) with the distribution as secondary key (`sk`). A global secondary
//! index on `sk` lets reports collect every layer of a distribution.

use crate::error::MetadataError;
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use serde::{Deserialize, Serialize};
use serde_dynamo::{from_item, from_items, to_item};
use std::collections::HashMap;

pub const DEFAULT_TABLE_NAME: &str = "custom-collector-extension-layers";
pub const DEFAULT_TABLE_REGION: &str = "us-east-1";
pub const DEFAULT_DISTRIBUTION_INDEX: &str = "sk-pk-index";

/// Metadata stored for one published layer version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Layer version ARN.
    pub pk: String,
    /// Distribution name.
    pub sk: String,
    pub layer_arn: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    pub distribution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_version_str: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_version_input: Option<String>,
    pub content_hash: String,
    /// RFC 3339 timestamp, UTC.
    #[serde(default)]
    pub publish_timestamp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compatible_runtimes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_tags: Option<String>,
}

impl ArtifactRecord {
    /// Starts a record with the required fields; `pk` and `sk` are derived.
    pub fn new(
        layer_arn: impl Into<String>,
        region: impl Into<String>,
        distribution: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        let layer_arn = layer_arn.into();
        let distribution = distribution.into();
        Self {
            pk: layer_arn.clone(),
            sk: distribution.clone(),
            layer_arn,
            region: region.into(),
            base_name: None,
            architecture: None,
            distribution,
            layer_version_str: None,
            collector_version_input: None,
            content_hash: content_hash.into(),
            publish_timestamp: chrono::Utc::now()
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            compatible_runtimes: Vec::new(),
            public: None,
            build_tags: None,
        }
    }

    /// Drops optional values that are present but empty so they are not stored.
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.base_name,
            &mut self.architecture,
            &mut self.layer_version_str,
            &mut self.collector_version_input,
            &mut self.build_tags,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
        self.compatible_runtimes.retain(|r| !r.trim().is_empty());
        self
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        let required: [(&'static str, &str); 6] = [
            ("pk", &self.pk),
            ("sk", &self.sk),
            ("layer_arn", &self.layer_arn),
            ("region", &self.region),
            ("distribution", &self.distribution),
            ("content_hash", &self.content_hash),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(MetadataError::MissingField(name)),
            None => Ok(()),
        }
    }
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, pk: &str) -> Result<Option<ArtifactRecord>, MetadataError>;

    /// Upserts a record after validating it.
    async fn put(&self, record: &ArtifactRecord) -> Result<(), MetadataError>;

    /// All records whose secondary key equals `distribution`.
    async fn query_by_distribution(
        &self,
        distribution: &str,
    ) -> Result<Vec<ArtifactRecord>, MetadataError>;
}

fn store_error<E: std::error::Error>(operation: &'static str, err: E) -> MetadataError {
    MetadataError::Store {
        operation,
        message: DisplayErrorContext(err).to_string(),
    }
}

/// [`MetadataStore`] backed by a DynamoDB table.
#[derive(Clone)]
pub struct DynamoMetadataStore {
    client: DynamoDbClient,
    table_name: String,
    index_name: String,
}

impl DynamoMetadataStore {
    pub fn new(
        client: DynamoDbClient,
        table_name: impl Into<String>,
        index_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            index_name: index_name.into(),
        }
    }
}

#[async_trait]
impl MetadataStore for DynamoMetadataStore {
    async fn get(&self, pk: &str) -> Result<Option<ArtifactRecord>, MetadataError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("pk", AttributeValue::S(pk.to_string()))
            .send()
            .await
            .map_err(|e| store_error("GetItem", e))?;

        match response.item {
            Some(item) => from_item(item)
                .map(Some)
                .map_err(|e| MetadataError::Conversion(e.to_string())),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &ArtifactRecord) -> Result<(), MetadataError> {
        record.validate()?;
        let item: HashMap<String, AttributeValue> =
            to_item(record).map_err(|e| MetadataError::Conversion(e.to_string()))?;

        tracing::debug!(table = %self.table_name, pk = %record.pk, "Writing metadata item");
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| store_error("PutItem", e))?;
        Ok(())
    }

    async fn query_by_distribution(
        &self,
        distribution: &str,
    ) -> Result<Vec<ArtifactRecord>, MetadataError> {
        let items = self
            .client
            .query()
            .table_name(&self.table_name)
            .index_name(&self.index_name)
            .key_condition_expression("sk = :sk")
            .expression_attribute_values(":sk", AttributeValue::S(distribution.to_string()))
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(|e| store_error("Query", e))?;

        tracing::debug!(distribution = %distribution, count = items.len(), "Queried metadata index");
        from_items(items).map_err(|e| MetadataError::Conversion(e.to_string()))
    }
}
