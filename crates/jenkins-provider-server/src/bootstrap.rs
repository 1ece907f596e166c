//! Startup manifest loading.
//!
//! A manifest is a JSON document with three optional lists:
//!
//! ```json
//! {
//!   "secrets": [{"namespace": "default", "name": "jenkins", "stringData": {"credentials": "..."}}],
//!   "providerConfigs": [{"name": "default", "credentials": {"source": "Secret", "secretRef": {...}}}],
//!   "resources": [{"kind": "Job", "metadata": {"name": "build-1"}, "spec": {...}}]
//! }
//! ```
//!
//! Secrets are stored first so that ProviderConfigs and resources never reference something that
//! is missing at the time the controller starts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use jenkins_provider_core::{CoreError, KindRegistry, ProviderConfig, SecretBytes};
use jenkins_provider_runtime::{
    MemoryProviderConfigStore, MemoryResourceStore, MemorySecretStore, SecretData, StoreError,
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("cannot read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("resource #{index} in manifest: {source}")]
    Resource {
        index: usize,
        #[source]
        source: CoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub secrets: Vec<SecretManifest>,
    #[serde(default)]
    pub provider_configs: Vec<ProviderConfig>,
    #[serde(default)]
    pub resources: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretManifest {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub string_data: BTreeMap<String, String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapStats {
    pub secrets: usize,
    pub provider_configs: usize,
    pub resources: usize,
}

/// Stores a manifest's contents are written to
pub struct BootstrapTargets<'a> {
    pub registry: &'a KindRegistry,
    pub secrets: &'a MemorySecretStore,
    pub configs: &'a MemoryProviderConfigStore,
    pub resources: &'a MemoryResourceStore,
}

pub async fn read_manifest(path: &Path) -> Result<Manifest, BootstrapError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|source| BootstrapError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(serde_json::from_slice(&raw)?)
}

pub async fn apply_manifest(
    manifest: Manifest,
    targets: &BootstrapTargets<'_>,
) -> Result<BootstrapStats, BootstrapError> {
    // Decode everything before touching the stores
    let resources = manifest
        .resources
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            targets
                .registry
                .decode(value)
                .map_err(|source| BootstrapError::Resource { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut stats = BootstrapStats::default();

    for secret in manifest.secrets {
        let data: SecretData = secret
            .string_data
            .into_iter()
            .map(|(key, value)| (key, SecretBytes::from(value)))
            .collect();
        debug!(namespace = %secret.namespace, name = %secret.name, "Loaded secret");
        targets
            .secrets
            .insert(&secret.namespace, &secret.name, data)
            .await;
        stats.secrets += 1;
    }

    for config in manifest.provider_configs {
        debug!(name = %config.name, "Loaded ProviderConfig");
        targets.configs.insert(config).await;
        stats.provider_configs += 1;
    }

    for resource in resources {
        debug!(key = %resource.key(), "Loaded resource");
        targets.resources.apply(resource).await?;
        stats.resources += 1;
    }

    info!(
        secrets = stats.secrets,
        provider_configs = stats.provider_configs,
        resources = stats.resources,
        "Manifest applied"
    );
    Ok(stats)
}
