//! In-memory fakes used by the unit tests.

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{MetadataError, RegistryError};
use crate::metadata::{ArtifactRecord, MetadataStore};
use crate::registry::{LayerRegistry, LayerVersion, PublishLayerInput};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryRegistry {
    pub region: String,
    pub layers: Mutex<HashMap<String, Vec<LayerVersion>>>,
    pub grants: Mutex<HashSet<(String, i64)>>,
    pub published: Mutex<Vec<PublishLayerInput>>,
    pub list_error: Option<RegistryError>,
    pub publish_error: Option<RegistryError>,
    pub grant_error: Option<RegistryError>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            region: "us-east-1".to_string(),
            ..Default::default()
        }
    }

    fn arn(&self, layer_name: &str, version: i64) -> String {
        format!(
            "arn:aws:lambda:{}:123456789012:layer:{}:{}",
            self.region, layer_name, version
        )
    }

    /// Registers an existing version without going through `publish`.
    pub fn seed(&self, layer_name: &str, description: &str) -> LayerVersion {
        let mut layers = self.layers.lock().unwrap();
        let versions = layers.entry(layer_name.to_string()).or_default();
        let version = versions.len() as i64 + 1;
        let entry = LayerVersion {
            arn: self.arn(layer_name, version),
            version,
            description: Some(description.to_string()),
            created_date: Some("2025-01-01T00:00:00.000+0000".to_string()),
        };
        versions.push(entry.clone());
        entry
    }

    pub fn version_count(&self, layer_name: &str) -> usize {
        self.layers
            .lock()
            .unwrap()
            .get(layer_name)
            .map_or(0, Vec::len)
    }

    pub fn is_public(&self, layer_name: &str, version: i64) -> bool {
        self.grants
            .lock()
            .unwrap()
            .contains(&(layer_name.to_string(), version))
    }
}

#[async_trait]
impl LayerRegistry for InMemoryRegistry {
    async fn list_versions(&self, layer_name: &str) -> Result<Vec<LayerVersion>, RegistryError> {
        if let Some(err) = &self.list_error {
            return Err(err.clone());
        }
        Ok(self
            .layers
            .lock()
            .unwrap()
            .get(layer_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn publish(&self, input: PublishLayerInput) -> Result<LayerVersion, RegistryError> {
        if let Some(err) = &self.publish_error {
            return Err(err.clone());
        }
        let published = self.seed(&input.layer_name, &input.description);
        self.published.lock().unwrap().push(input);
        Ok(published)
    }

    async fn has_public_grant(
        &self,
        layer_name: &str,
        version: i64,
    ) -> Result<bool, RegistryError> {
        Ok(self.is_public(layer_name, version))
    }

    async fn grant_public_read(
        &self,
        layer_name: &str,
        version: i64,
    ) -> Result<(), RegistryError> {
        if let Some(err) = &self.grant_error {
            return Err(err.clone());
        }
        self.grants
            .lock()
            .unwrap()
            .insert((layer_name.to_string(), version));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    pub records: Mutex<HashMap<String, ArtifactRecord>>,
    pub fail_gets: bool,
    pub fail_puts: bool,
    pub puts: Mutex<usize>,
}

impl InMemoryStore {
    pub fn insert(&self, record: ArtifactRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.pk.clone(), record);
    }

    pub fn record(&self, pk: &str) -> Option<ArtifactRecord> {
        self.records.lock().unwrap().get(pk).cloned()
    }

    pub fn put_count(&self) -> usize {
        *self.puts.lock().unwrap()
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn get(&self, pk: &str) -> Result<Option<ArtifactRecord>, MetadataError> {
        if self.fail_gets {
            return Err(MetadataError::Store {
                operation: "GetItem",
                message: "store unavailable".to_string(),
            });
        }
        Ok(self.record(pk))
    }

    async fn put(&self, record: &ArtifactRecord) -> Result<(), MetadataError> {
        if self.fail_puts {
            return Err(MetadataError::Store {
                operation: "PutItem",
                message: "store unavailable".to_string(),
            });
        }
        record.validate()?;
        *self.puts.lock().unwrap() += 1;
        self.insert(record.clone());
        Ok(())
    }

    async fn query_by_distribution(
        &self,
        distribution: &str,
    ) -> Result<Vec<ArtifactRecord>, MetadataError> {
        let mut records: Vec<ArtifactRecord> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.sk == distribution)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.pk.cmp(&b.pk));
        Ok(records)
    }
}

type CommandHook = Box<dyn Fn(&CommandSpec) + Send + Sync>;

/// Records every command instead of running it. Commands whose rendered form
/// contains one of the `fail_on` patterns report a non-zero exit.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    fail_on: Vec<String>,
    hooks: Vec<(String, CommandHook)>,
}

impl RecordingRunner {
    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.fail_on.push(pattern.to_string());
        self
    }

    /// Runs `hook` for every command whose rendered form contains `pattern`.
    pub fn on(
        mut self,
        pattern: &str,
        hook: impl Fn(&CommandSpec) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.push((pattern.to_string(), Box::new(hook)));
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> anyhow::Result<CommandOutput> {
        let rendered = spec.to_string();
        self.calls.lock().unwrap().push(spec.clone());
        if self.fail_on.iter().any(|p| rendered.contains(p.as_str())) {
            return Ok(CommandOutput {
                success: false,
                code: Some(1),
                stdout: String::new(),
                stderr: "simulated failure".to_string(),
            });
        }
        for (pattern, hook) in &self.hooks {
            if rendered.contains(pattern.as_str()) {
                hook(spec);
            }
        }
        Ok(CommandOutput {
            success: true,
            code: Some(0),
            ..Default::default()
        })
    }
}
