//! Reconcile runtime for the Jenkins provider.
//!
//! - [`credentials`]: ProviderConfig lookup, secret fetching, usage tracking and client pooling
//! - [`external`]: adapters for the Jenkins remote API and an in-memory target
//! - [`engine`]: the per-resource reconcile state machine
//! - [`queue`] and [`controller`]: single-flight scheduling with exponential backoff

pub mod backoff;
pub mod context;
pub mod controller;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod events;
pub mod external;
pub mod publisher;
pub mod queue;
pub mod store;

pub use backoff::BackoffPolicy;
pub use context::PassContext;
pub use controller::{Controller, ControllerConfig, apply_requeue};
pub use credentials::{
    ClientFactory, Connector, CredentialResolver, JenkinsClientFactory, MemoryClientFactory,
    MemoryProviderConfigStore, MemorySecretStore, ProviderConfigStore, SecretData, SecretStore,
    UsageTracker,
};
pub use engine::{DEFAULT_FAILURE_THRESHOLD, PassOutcome, Reconciler, Requeue, ResourceState};
pub use error::{
    ErrorClass, ExternalError, PublishError, ReconcileError, ResolveError, StoreError,
};
pub use events::{
    BroadcastRecorder, EventReason, EventRecorder, EventType, ReconcileEvent, TracingRecorder,
};
pub use external::{
    Creation, ExternalClient, ItemClient, JenkinsClient, MemoryTarget, NodeClient, Observation,
    Verb,
};
pub use publisher::{ConnectionPublisher, DiscardPublisher};
pub use queue::WorkQueue;
pub use store::{MemoryResourceStore, ResourceStore};
