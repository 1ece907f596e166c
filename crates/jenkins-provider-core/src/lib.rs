//! Core types for the Jenkins provider.
//!
//! Desired-state objects for Jenkins jobs, folders and agents, their observed status, and the
//! [`ManagedResource`] capability set the reconcile engine is written against.

pub mod error;
pub mod kinds;
pub mod provider_config;
pub mod registry;
pub mod resource;
pub mod status;

pub use error::CoreError;
pub use kinds::{
    DEFAULT_FOLDER_CONFIG, Folder, FolderParameters, Job, JobParameters, Node, NodeParameters,
    normalize_labels, normalize_xml,
};
pub use provider_config::{Credentials, CredentialsSource, ProviderConfig, SecretKeySelector};
pub use registry::KindRegistry;
pub use resource::{
    CredentialRef, DeletionPolicy, DesiredState, ExternalRef, ForProvider, Managed,
    ManagedResource, ObjectMeta, ResourceKey, ResourceKind, ResourceSpec, SecretRef,
};
pub use status::{
    Condition, ConditionReason, ConditionType, ConnectionDetails, ObservedStatus, SecretBytes,
};

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
