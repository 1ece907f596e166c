//! Credential resolution.
//!
//! A managed resource names a ProviderConfig; the resolver looks the config up, fetches the secret
//! material it points at, and returns an external client authenticated with it. While a resource
//! references a ProviderConfig a usage marker keeps that config from being deleted.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use jenkins_provider_core::{
    ConnectionDetails, CoreError, CredentialRef, Credentials, CredentialsSource, ManagedResource,
    ProviderConfig, ResourceKey, ResourceKind, SecretBytes, SecretKeySelector, SecretRef,
};
use tokio::sync::RwLock;

use crate::error::{PublishError, ResolveError, StoreError};
use crate::external::{ExternalClient, ItemClient, JenkinsClient, MemoryTarget, NodeClient};
use crate::publisher::ConnectionPublisher;

/// Key/value data of one secret
pub type SecretData = BTreeMap<String, SecretBytes>;

#[async_trait]
pub trait ProviderConfigStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<ProviderConfig>, StoreError>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, StoreError>;
}

#[derive(Debug, Default)]
struct UsageTable {
    by_resource: HashMap<ResourceKey, String>,
    counts: HashMap<String, usize>,
}

impl UsageTable {
    fn decrement(&mut self, config: &str) {
        if let Some(count) = self.counts.get_mut(config) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.counts.remove(config);
            }
        }
    }
}

/// Ref-counted markers linking resources to the ProviderConfig they use.
///
/// All updates happen under one lock, so concurrent reconciles never lose a count.
#[derive(Debug, Default)]
pub struct UsageTracker {
    table: Mutex<UsageTable>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` uses `config`. Tracking the same pair again is a no-op; tracking against
    /// another config moves the marker.
    pub fn track(&self, key: &ResourceKey, config: &str) {
        let mut table = self.lock();
        match table.by_resource.get(key) {
            Some(current) if current == config => return,
            Some(previous) => {
                let previous = previous.clone();
                table.decrement(&previous);
                tracing::debug!(key = %key, from = %previous, to = %config, "ProviderConfig usage moved");
            }
            None => {}
        }
        table.by_resource.insert(key.clone(), config.to_string());
        *table.counts.entry(config.to_string()).or_default() += 1;
    }

    /// Drop the marker of a finalized resource
    pub fn release(&self, key: &ResourceKey) {
        let mut table = self.lock();
        if let Some(config) = table.by_resource.remove(key) {
            table.decrement(&config);
        }
    }

    pub fn users(&self, config: &str) -> usize {
        self.lock().counts.get(config).copied().unwrap_or(0)
    }

    pub fn is_in_use(&self, config: &str) -> bool {
        self.users(config) > 0
    }

    /// Config currently tracked for a resource
    pub fn config_of(&self, key: &ResourceKey) -> Option<String> {
        self.lock().by_resource.get(key).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, UsageTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-local ProviderConfig store
pub struct MemoryProviderConfigStore {
    configs: RwLock<HashMap<String, ProviderConfig>>,
    usage: Arc<UsageTracker>,
}

impl MemoryProviderConfigStore {
    pub fn new(usage: Arc<UsageTracker>) -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            usage,
        }
    }

    pub async fn insert(&self, config: ProviderConfig) {
        tracing::debug!(name = %config.name, "ProviderConfig stored");
        self.configs
            .write()
            .await
            .insert(config.name.clone(), config);
    }

    /// Delete a ProviderConfig. Refused while any resource still uses it.
    pub async fn delete(&self, name: &str) -> Result<bool, CoreError> {
        let mut configs = self.configs.write().await;
        let users = self.usage.users(name);
        if users > 0 {
            return Err(CoreError::ProviderConfigInUse {
                name: name.to_string(),
                users,
            });
        }
        Ok(configs.remove(name).is_some())
    }
}

#[async_trait]
impl ProviderConfigStore for MemoryProviderConfigStore {
    async fn get(&self, name: &str) -> Result<Option<ProviderConfig>, StoreError> {
        Ok(self.configs.read().await.get(name).cloned())
    }
}

/// Process-local secret store.
///
/// Also receives published connection details, so a Job's details end up readable next to the
/// credentials that created it.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<(String, String), SecretData>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, namespace: &str, name: &str, data: SecretData) {
        self.secrets
            .write()
            .await
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub async fn remove(&self, namespace: &str, name: &str) -> Option<SecretData> {
        self.secrets
            .write()
            .await
            .remove(&(namespace.to_string(), name.to_string()))
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, StoreError> {
        Ok(self
            .secrets
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

#[async_trait]
impl ConnectionPublisher for MemorySecretStore {
    async fn publish(
        &self,
        key: &ResourceKey,
        target: Option<&SecretRef>,
        details: &ConnectionDetails,
    ) -> Result<(), PublishError> {
        let Some(target) = target else {
            return Ok(());
        };
        let mut secrets = self.secrets.write().await;
        let entry = secrets
            .entry((target.namespace.clone(), target.name.clone()))
            .or_default();
        entry.extend(details.iter().map(|(k, v)| (k.clone(), v.clone())));
        tracing::debug!(
            key = %key,
            namespace = %target.namespace,
            secret = %target.name,
            "Connection details published"
        );
        Ok(())
    }

    async fn unpublish(
        &self,
        _key: &ResourceKey,
        target: Option<&SecretRef>,
    ) -> Result<(), PublishError> {
        if let Some(target) = target {
            self.remove(&target.namespace, &target.name).await;
        }
        Ok(())
    }
}

/// Builds external clients from resolved credentials
pub trait ClientFactory: Send + Sync {
    fn build(
        &self,
        kind: ResourceKind,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ExternalClient>, ResolveError>;
}

/// Clients talking to a real Jenkins
#[derive(Debug, Clone)]
pub struct JenkinsClientFactory {
    request_timeout: Duration,
}

impl JenkinsClientFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl ClientFactory for JenkinsClientFactory {
    fn build(
        &self,
        kind: ResourceKind,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ExternalClient>, ResolveError> {
        let jenkins = JenkinsClient::new(credentials, self.request_timeout)
            .map_err(|e| ResolveError::credential(e.to_string()))?;
        Ok(match kind {
            ResourceKind::Job | ResourceKind::Folder => Arc::new(ItemClient::new(jenkins, kind)),
            ResourceKind::Node => Arc::new(NodeClient::new(jenkins)),
        })
    }
}

/// Clients backed by an in-memory target; credentials are validated but otherwise unused
#[derive(Debug, Clone)]
pub struct MemoryClientFactory {
    target: Arc<MemoryTarget>,
}

impl MemoryClientFactory {
    pub fn new(target: Arc<MemoryTarget>) -> Self {
        Self { target }
    }
}

impl ClientFactory for MemoryClientFactory {
    fn build(
        &self,
        kind: ResourceKind,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn ExternalClient>, ResolveError> {
        Ok(self.target.client(kind))
    }
}

/// Turns a managed resource into a client for its kind
#[async_trait]
pub trait Connector: Send + Sync {
    /// Track usage of the referenced ProviderConfig and return an authenticated client
    async fn connect(
        &self,
        resource: &dyn ManagedResource,
    ) -> Result<Arc<dyn ExternalClient>, ResolveError>;

    /// Drop the usage marker of a finalized resource
    fn release(&self, key: &ResourceKey);
}

struct PooledClient {
    credentials: Credentials,
    client: Arc<dyn ExternalClient>,
}

pub struct CredentialResolver {
    configs: Arc<dyn ProviderConfigStore>,
    secrets: Arc<dyn SecretStore>,
    usage: Arc<UsageTracker>,
    factory: Arc<dyn ClientFactory>,
    pool: DashMap<(String, ResourceKind), PooledClient>,
}

impl CredentialResolver {
    pub fn new(
        configs: Arc<dyn ProviderConfigStore>,
        secrets: Arc<dyn SecretStore>,
        usage: Arc<UsageTracker>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            configs,
            secrets,
            usage,
            factory,
            pool: DashMap::new(),
        }
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// Resolve a credential reference to a client for `kind`
    pub async fn resolve(
        &self,
        credential_ref: &CredentialRef,
        kind: ResourceKind,
    ) -> Result<Arc<dyn ExternalClient>, ResolveError> {
        let config = self
            .configs
            .get(&credential_ref.name)
            .await
            .map_err(|e| ResolveError::config(e.to_string()))?
            .ok_or_else(|| {
                ResolveError::config(format!("ProviderConfig {} not found", credential_ref.name))
            })?;

        let blob = self.fetch_blob(&config.credentials).await?;
        let credentials = Credentials::from_slice(&blob)?;

        let pool_key = (config.name.clone(), kind);
        if let Some(pooled) = self.pool.get(&pool_key) {
            if pooled.credentials == credentials {
                return Ok(Arc::clone(&pooled.client));
            }
            tracing::info!(provider_config = %config.name, kind = %kind, "Credentials changed, rebuilding client");
        }

        let client = self.factory.build(kind, &credentials)?;
        self.pool.insert(
            pool_key,
            PooledClient {
                credentials,
                client: Arc::clone(&client),
            },
        );
        Ok(client)
    }

    async fn fetch_blob(&self, source: &CredentialsSource) -> Result<Vec<u8>, ResolveError> {
        match source {
            CredentialsSource::Secret { secret_ref } => self.read_secret_key(secret_ref).await,
            CredentialsSource::Environment { env } => std::env::var(env)
                .map(String::into_bytes)
                .map_err(|e| {
                    ResolveError::credential(format!("environment variable {env}: {e}"))
                }),
            CredentialsSource::Filesystem { path } => tokio::fs::read(path).await.map_err(|e| {
                ResolveError::credential(format!("cannot read {}: {e}", path.display()))
            }),
        }
    }

    async fn read_secret_key(&self, selector: &SecretKeySelector) -> Result<Vec<u8>, ResolveError> {
        let data = self
            .secrets
            .get(&selector.namespace, &selector.name)
            .await
            .map_err(|e| ResolveError::credential(e.to_string()))?
            .ok_or_else(|| {
                ResolveError::credential(format!(
                    "secret {}/{} not found",
                    selector.namespace, selector.name
                ))
            })?;
        data.get(&selector.key)
            .map(|value| value.as_bytes().to_vec())
            .ok_or_else(|| {
                ResolveError::credential(format!(
                    "secret {}/{} has no key {}",
                    selector.namespace, selector.name, selector.key
                ))
            })
    }
}

#[async_trait]
impl Connector for CredentialResolver {
    async fn connect(
        &self,
        resource: &dyn ManagedResource,
    ) -> Result<Arc<dyn ExternalClient>, ResolveError> {
        let credential_ref = resource.desired_state().credential_ref;
        self.usage.track(&resource.key(), &credential_ref.name);
        self.resolve(&credential_ref, resource.kind()).await
    }

    fn release(&self, key: &ResourceKey) {
        self.usage.release(key);
    }
}
