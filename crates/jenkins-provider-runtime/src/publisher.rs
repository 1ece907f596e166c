//! Connection detail publishing.
//!
//! Details returned by a Create, or read back when an existing artifact is adopted, are handed to
//! a [`ConnectionPublisher`]. The engine keeps a copy on the in-memory status; it is never
//! serialized.

use async_trait::async_trait;
use jenkins_provider_core::{ConnectionDetails, ResourceKey, SecretRef};

use crate::error::PublishError;

#[async_trait]
pub trait ConnectionPublisher: Send + Sync {
    /// Publish details of the artifact behind `key`. `target` is `None` when the resource did
    /// not ask for its details to be written anywhere.
    async fn publish(
        &self,
        key: &ResourceKey,
        target: Option<&SecretRef>,
        details: &ConnectionDetails,
    ) -> Result<(), PublishError>;

    /// Remove previously published details
    async fn unpublish(
        &self,
        key: &ResourceKey,
        target: Option<&SecretRef>,
    ) -> Result<(), PublishError>;
}

/// Publisher for resources that never write connection details
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardPublisher;

#[async_trait]
impl ConnectionPublisher for DiscardPublisher {
    async fn publish(
        &self,
        key: &ResourceKey,
        _target: Option<&SecretRef>,
        details: &ConnectionDetails,
    ) -> Result<(), PublishError> {
        tracing::trace!(key = %key, keys = details.len(), "Discarding connection details");
        Ok(())
    }

    async fn unpublish(
        &self,
        _key: &ResourceKey,
        _target: Option<&SecretRef>,
    ) -> Result<(), PublishError> {
        Ok(())
    }
}
