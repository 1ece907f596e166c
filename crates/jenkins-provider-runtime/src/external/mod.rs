//! External client adapters.
//!
//! An adapter maps Observe/Create/Update/Delete onto the target system and normalizes its error
//! vocabulary into [`ExternalError`]. "Not found" is always reported as a distinguished value,
//! never folded into another failure, because the engine uses it to pick the Create branch.

pub mod items;
pub mod jenkins;
pub mod memory;
pub mod nodes;

use async_trait::async_trait;
use jenkins_provider_core::{ConnectionDetails, ExternalRef};
use serde_json::Value;

use crate::context::PassContext;
use crate::error::ExternalError;

/// Result of observing an external artifact
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// The artifact exists with this configuration
    Found(Value),
    NotFound,
}

/// Result of creating an external artifact
#[derive(Debug, Clone, Default)]
pub struct Creation {
    /// Handle of the artifact in the target system
    pub external_identity: String,
    pub connection_details: ConnectionDetails,
}

/// Adapter for one resource kind of the target system
#[async_trait]
pub trait ExternalClient: Send + Sync {
    async fn observe(
        &self,
        ctx: &PassContext,
        target: &ExternalRef,
    ) -> Result<Observation, ExternalError>;

    /// Create the artifact. Fails with [`ExternalError::AlreadyExists`] if it is already there.
    async fn create(
        &self,
        ctx: &PassContext,
        target: &ExternalRef,
        config: &Value,
    ) -> Result<Creation, ExternalError>;

    async fn update(
        &self,
        ctx: &PassContext,
        target: &ExternalRef,
        config: &Value,
    ) -> Result<(), ExternalError>;

    /// Delete the artifact. Succeeds when it is already absent.
    async fn delete(&self, ctx: &PassContext, target: &ExternalRef) -> Result<(), ExternalError>;

    /// Connection details of an existing artifact, published when it is adopted rather than created
    fn connection_details(&self, _target: &ExternalRef) -> Result<ConnectionDetails, ExternalError> {
        Ok(ConnectionDetails::new())
    }
}

pub use items::ItemClient;
pub use jenkins::JenkinsClient;
pub use memory::{MemoryTarget, Verb};
pub use nodes::NodeClient;
