//! Storage of desired-state objects.
//!
//! The controller reads objects and writes status back through [`ResourceStore`]; changes to the
//! desired state are announced on a broadcast feed so the controller can enqueue them.

use std::collections::HashMap;

use async_trait::async_trait;
use jenkins_provider_core::{ManagedResource, ObservedStatus, ResourceKey};
use tokio::sync::{RwLock, broadcast};

use crate::error::StoreError;

const CHANGE_FEED_CAPACITY: usize = 1024;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Box<dyn ManagedResource>>, StoreError>;

    async fn list_keys(&self) -> Result<Vec<ResourceKey>, StoreError>;

    /// Replace the status of an object. Status writes are not announced on the change feed.
    async fn update_status(
        &self,
        key: &ResourceKey,
        status: ObservedStatus,
    ) -> Result<(), StoreError>;

    /// Remove an object whose deletion has completed
    async fn finalize(&self, key: &ResourceKey) -> Result<(), StoreError>;

    /// Keys whose desired state changed
    fn watch(&self) -> broadcast::Receiver<ResourceKey>;
}

/// Process-local resource store
pub struct MemoryResourceStore {
    objects: RwLock<HashMap<ResourceKey, Box<dyn ManagedResource>>>,
    changes: broadcast::Sender<ResourceKey>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            objects: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Create or replace the desired state of an object.
    ///
    /// The stored status is kept. The generation is bumped when the spec differs from the stored
    /// one.
    pub async fn apply(&self, mut resource: Box<dyn ManagedResource>) -> Result<(), StoreError> {
        let key = resource.key();
        let incoming = resource
            .to_json()
            .map_err(|e| StoreError::backend(e.to_string()))?;

        let mut objects = self.objects.write().await;
        match objects.get(&key) {
            Some(existing) => {
                let current = existing
                    .to_json()
                    .map_err(|e| StoreError::backend(e.to_string()))?;
                let generation = existing.metadata().generation;
                let deletion_requested = existing.metadata().deletion_requested;
                let status = existing.status().clone();

                let changed = current.get("spec") != incoming.get("spec");
                let meta = resource.metadata_mut();
                meta.generation = if changed { generation + 1 } else { generation };
                meta.deletion_requested |= deletion_requested;
                resource.set_status(status);
                if !changed {
                    tracing::trace!(key = %key, "Desired state unchanged");
                }
            }
            None => {
                let meta = resource.metadata_mut();
                meta.generation = meta.generation.max(1);
            }
        }
        objects.insert(key.clone(), resource);
        drop(objects);

        tracing::debug!(key = %key, "Desired state applied");
        let _ = self.changes.send(key);
        Ok(())
    }

    /// Ask for an object to be deleted. It stays in the store until finalized.
    pub async fn request_deletion(&self, key: &ResourceKey) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        let resource = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        resource.metadata_mut().deletion_requested = true;
        drop(objects);

        let _ = self.changes.send(key.clone());
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Box<dyn ManagedResource>>, StoreError> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn list_keys(&self) -> Result<Vec<ResourceKey>, StoreError> {
        let mut keys: Vec<_> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn update_status(
        &self,
        key: &ResourceKey,
        status: ObservedStatus,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        let resource = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        resource.set_status(status);
        Ok(())
    }

    async fn finalize(&self, key: &ResourceKey) -> Result<(), StoreError> {
        if self.objects.write().await.remove(key).is_some() {
            tracing::debug!(key = %key, "Resource finalized");
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<ResourceKey> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jenkins_provider_core::{Job, JobParameters, ResourceKind};

    fn job(config: &str) -> Box<dyn ManagedResource> {
        Box::new(Job::new(
            "build-1",
            JobParameters {
                name: "build-1".into(),
                parent: None,
                config: config.into(),
            },
        ))
    }

    fn key() -> ResourceKey {
        ResourceKey::new(ResourceKind::Job, "build-1")
    }

    #[tokio::test]
    async fn test_apply_bumps_generation_on_spec_change_and_keeps_status() {
        let store = MemoryResourceStore::new();
        store.apply(job("<project/>")).await.unwrap();

        let mut status = ObservedStatus::default();
        status.external_identity = "build-1".into();
        store.update_status(&key(), status).await.unwrap();

        store.apply(job("<project/>")).await.unwrap();
        let current = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(current.metadata().generation, 1);

        store.apply(job("<project><description/></project>")).await.unwrap();
        let current = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(current.metadata().generation, 2);
        assert_eq!(current.external_identity(), "build-1");
    }

    #[tokio::test]
    async fn test_changes_are_announced() {
        let store = MemoryResourceStore::new();
        let mut feed = store.watch();

        store.apply(job("<project/>")).await.unwrap();
        assert_eq!(feed.recv().await.unwrap(), key());

        store.request_deletion(&key()).await.unwrap();
        assert_eq!(feed.recv().await.unwrap(), key());
        assert!(
            store
                .get(&key())
                .await
                .unwrap()
                .unwrap()
                .metadata()
                .deletion_requested
        );

        store
            .update_status(&key(), ObservedStatus::default())
            .await
            .unwrap();
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_finalize_removes() {
        let store = MemoryResourceStore::new();
        store.apply(job("<project/>")).await.unwrap();
        assert_eq!(store.list_keys().await.unwrap(), vec![key()]);

        store.finalize(&key()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(store.get(&key()).await.unwrap().is_none());
        assert!(matches!(
            store.update_status(&key(), ObservedStatus::default()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
