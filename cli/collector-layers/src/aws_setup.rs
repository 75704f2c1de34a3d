//! AWS SDK configuration and client construction.
//!
//! Layers are regional, and the metadata table lives in one fixed region, so
//! configs are loaded per region rather than once per process.

use crate::metadata::DynamoMetadataStore;
use crate::registry::LambdaRegistry;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Loads an SDK config, preferring `region` over the environment/profile
/// default.
pub async fn load_config(region: Option<&str>, profile: Option<&str>) -> SdkConfig {
    let region_provider = RegionProviderChain::first_try(region.map(|r| Region::new(r.to_string())))
        .or_default_provider();

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    let config = loader.load().await;
    tracing::debug!(region = ?config.region(), "Loaded AWS config");
    config
}

pub async fn layer_registry(region: &str, profile: Option<&str>) -> LambdaRegistry {
    let config = load_config(Some(region), profile).await;
    LambdaRegistry::new(aws_sdk_lambda::Client::new(&config))
}

pub async fn metadata_store(
    region: &str,
    table_name: &str,
    index_name: &str,
    profile: Option<&str>,
) -> DynamoMetadataStore {
    let config = load_config(Some(region), profile).await;
    tracing::debug!(table = %table_name, region = %region, "Using metadata table");
    DynamoMetadataStore::new(
        aws_sdk_dynamodb::Client::new(&config),
        table_name,
        index_name,
    )
}
