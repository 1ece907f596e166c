//! Managed resource model.
//!
//! Every kind the provider reconciles (Job, Folder, Node) is a [`Managed`] wrapper around a
//! kind-specific parameter block. The reconcile engine never sees the concrete type; it works
//! against the [`ManagedResource`] capability set.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::status::ObservedStatus;

/// Resource kinds served by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Job,
    Folder,
    Node,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Job, ResourceKind::Folder, ResourceKind::Node];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Job => "Job",
            ResourceKind::Folder => "Folder",
            ResourceKind::Node => "Node",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Job" => Ok(ResourceKind::Job),
            "Folder" => Ok(ResourceKind::Folder),
            "Node" | "JenkinsNode" => Ok(ResourceKind::Node),
            other => Err(CoreError::unknown_kind(other)),
        }
    }
}

/// Scheduler key of a desired-state object. Resources are cluster scoped, so kind and name are
/// enough to identify one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Object metadata of a desired-state object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    /// Incremented by the store on every spec change
    #[serde(default)]
    pub generation: u64,

    /// Set when the object has been asked to go away
    #[serde(default)]
    pub deletion_requested: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// What happens to the external artifact when the desired object is deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Orphan,
}

/// Reference to a ProviderConfig (credential set)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialRef {
    pub name: String,
}

impl CredentialRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for CredentialRef {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Where connection details of a created artifact should be published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

/// Fields every managed resource spec carries beside its kind-specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec<P> {
    #[serde(default)]
    pub provider_config_ref: CredentialRef,

    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretRef>,

    pub for_provider: P,
}

/// Identity of an artifact in the target system. Names only need to be unique within their
/// parent, so two artifacts with the same name under different parents are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalRef {
    pub name: String,
    pub parent: Option<String>,
}

impl ExternalRef {
    pub fn new(name: impl Into<String>, parent: Option<String>) -> Self {
        Self {
            name: name.into(),
            parent: parent.filter(|p| !p.trim_matches('/').is_empty()),
        }
    }

    /// Parent path split into its segments (`a/b` -> `["a", "b"]`)
    pub fn parent_segments(&self) -> Vec<&str> {
        self.parent
            .as_deref()
            .map(|p| p.split('/').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{}/{}", parent.trim_matches('/'), self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Kind-independent projection of a desired-state object, immutable for the duration of a pass
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub name: String,
    pub parent_ref: Option<String>,
    pub configuration: Value,
    pub credential_ref: CredentialRef,
}

impl DesiredState {
    pub fn external_ref(&self) -> ExternalRef {
        ExternalRef::new(self.name.clone(), self.parent_ref.clone())
    }
}

/// Capability set the reconcile engine is written against
pub trait ManagedResource: fmt::Debug + Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Desired state of the external artifact
    fn desired_state(&self) -> DesiredState;

    fn deletion_policy(&self) -> DeletionPolicy;

    fn connection_secret_ref(&self) -> Option<&SecretRef>;

    fn status(&self) -> &ObservedStatus;

    fn set_status(&mut self, status: ObservedStatus);

    /// Whether a configuration read back from the target system satisfies the desired state
    fn is_up_to_date(&self, observed: &Value) -> bool;

    fn clone_boxed(&self) -> Box<dyn ManagedResource>;

    fn to_json(&self) -> Result<Value, CoreError>;

    fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind(), self.metadata().name.clone())
    }

    fn external_identity(&self) -> &str {
        &self.status().external_identity
    }
}

impl Clone for Box<dyn ManagedResource> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Kind-specific parameters (`spec.forProvider`) of a managed resource
pub trait ForProvider:
    fmt::Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: ResourceKind;

    /// Name of the external artifact
    fn name(&self) -> &str;

    /// Parent (folder path) of the external artifact, if any
    fn parent(&self) -> Option<&str> {
        None
    }

    /// Opaque configuration blob handed to the external client
    fn configuration(&self) -> Value;

    fn is_up_to_date(&self, observed: &Value) -> bool {
        self.configuration() == *observed
    }
}

/// A desired-state object of one concrete kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Managed<P> {
    pub metadata: ObjectMeta,
    pub spec: ResourceSpec<P>,
    #[serde(default)]
    pub status: ObservedStatus,
}

impl<P: ForProvider> Managed<P> {
    pub fn new(name: impl Into<String>, for_provider: P) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                generation: 1,
                ..Default::default()
            },
            spec: ResourceSpec {
                provider_config_ref: CredentialRef::default(),
                deletion_policy: DeletionPolicy::default(),
                write_connection_secret_to_ref: None,
                for_provider,
            },
            status: ObservedStatus::default(),
        }
    }

    pub fn with_provider_config(mut self, name: impl Into<String>) -> Self {
        self.spec.provider_config_ref = CredentialRef::new(name);
        self
    }

    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.spec.deletion_policy = policy;
        self
    }

    /// Decode from the manifest representation (`{"kind": ..., "metadata": ..., "spec": ...}`)
    pub fn from_json(value: Value) -> Result<Self, CoreError> {
        let resource: Self = serde_json::from_value(value)?;
        if resource.metadata.name.trim().is_empty() {
            return Err(CoreError::invalid_resource(format!(
                "{} metadata.name must not be empty",
                P::KIND
            )));
        }
        if resource.spec.for_provider.name().trim().is_empty() {
            return Err(CoreError::invalid_resource(format!(
                "{} {} spec.forProvider.name must not be empty",
                P::KIND,
                resource.metadata.name
            )));
        }
        Ok(resource)
    }
}

impl<P: ForProvider> ManagedResource for Managed<P> {
    fn kind(&self) -> ResourceKind {
        P::KIND
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn desired_state(&self) -> DesiredState {
        let params = &self.spec.for_provider;
        DesiredState {
            name: params.name().to_string(),
            parent_ref: params.parent().map(str::to_string),
            configuration: params.configuration(),
            credential_ref: self.spec.provider_config_ref.clone(),
        }
    }

    fn deletion_policy(&self) -> DeletionPolicy {
        self.spec.deletion_policy
    }

    fn connection_secret_ref(&self) -> Option<&SecretRef> {
        self.spec.write_connection_secret_to_ref.as_ref()
    }

    fn status(&self) -> &ObservedStatus {
        &self.status
    }

    fn set_status(&mut self, status: ObservedStatus) {
        self.status = status;
    }

    fn is_up_to_date(&self, observed: &Value) -> bool {
        self.spec.for_provider.is_up_to_date(observed)
    }

    fn clone_boxed(&self) -> Box<dyn ManagedResource> {
        Box::new(self.clone())
    }

    fn to_json(&self) -> Result<Value, CoreError> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("kind".to_string(), Value::String(P::KIND.to_string()));
        }
        Ok(value)
    }
}
