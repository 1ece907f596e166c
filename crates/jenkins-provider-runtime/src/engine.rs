//! Reconcile engine.
//!
//! One pass drives one managed resource a step closer to its desired state:
//!
//! 1. Deletion requested: delete the external artifact (unless orphaned) and finalize.
//! 2. Otherwise observe it. Absent artifacts are created, stale ones updated, current ones left
//!    alone.
//!
//! The engine is written once against [`ManagedResource`] and serves every kind. Its result is a
//! [`PassOutcome`] telling the controller how to requeue the key; the status of the resource is
//! written back to the store before the pass returns.

use std::sync::Arc;

use jenkins_provider_core::{
    ConditionReason, ConditionType, ConnectionDetails, DeletionPolicy, ExternalRef, ManagedResource, ObservedStatus,
    ResourceKey, ResourceKind,
};

use crate::context::PassContext;
use crate::credentials::Connector;
use crate::error::{ErrorClass, ExternalError, ReconcileError};
use crate::events::{EventReason, EventRecorder, ReconcileEvent};
use crate::external::{ExternalClient, Observation};
use crate::publisher::ConnectionPublisher;
use crate::store::ResourceStore;

/// Consecutive transient failures tolerated before Ready is forced false
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// What a pass found the external artifact to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// The pass ended before the artifact was observed
    Unobserved,
    Absent,
    PresentStale,
    PresentCurrent,
    /// Terminal: the resource has been finalized
    Deleted,
}

/// How the controller should requeue a key after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Desired state reached; check again after the poll interval
    Converged,
    /// A mutating call succeeded; observe again soon
    Progress,
    /// Transient failure; exponential backoff
    Backoff,
    /// Permanent failure; retry at the capped interval
    Capped,
    /// Resource is gone; stop tracking the key
    Done,
    /// Unprocessable; log and forget
    Drop,
    /// Shutdown; leave the key alone
    Abort,
}

#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub state: ResourceState,
    pub requeue: Requeue,
    pub error: Option<ReconcileError>,
}

impl PassOutcome {
    fn ok(state: ResourceState, requeue: Requeue) -> Self {
        Self {
            state,
            requeue,
            error: None,
        }
    }

    fn failed(state: ResourceState, error: ReconcileError) -> Self {
        let requeue = match error.class() {
            ErrorClass::Drop => Requeue::Drop,
            ErrorClass::Backoff => Requeue::Backoff,
            ErrorClass::Capped => Requeue::Capped,
            ErrorClass::Abort => Requeue::Abort,
        };
        Self {
            state,
            requeue,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Observe,
    Create,
    Update,
    Delete,
}

impl Verb {
    fn as_str(self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    fn event_reason(self) -> EventReason {
        match self {
            Self::Observe => EventReason::CannotObserve,
            Self::Create => EventReason::CannotCreate,
            Self::Update => EventReason::CannotUpdate,
            Self::Delete => EventReason::CannotDelete,
        }
    }
}

/// Reconciler for one resource kind
pub struct Reconciler {
    kind: ResourceKind,
    connector: Arc<dyn Connector>,
    store: Arc<dyn ResourceStore>,
    recorder: Arc<dyn EventRecorder>,
    publisher: Arc<dyn ConnectionPublisher>,
    failure_threshold: u32,
}

impl Reconciler {
    pub fn new(
        kind: ResourceKind,
        connector: Arc<dyn Connector>,
        store: Arc<dyn ResourceStore>,
        recorder: Arc<dyn EventRecorder>,
        publisher: Arc<dyn ConnectionPublisher>,
    ) -> Self {
        Self {
            kind,
            connector,
            store,
            recorder,
            publisher,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Run one pass over `resource`
    pub async fn reconcile(&self, ctx: &PassContext, resource: &dyn ManagedResource) -> PassOutcome {
        let key = resource.key();
        if resource.kind() != self.kind {
            let error = ReconcileError::TypeMismatch {
                expected: self.kind,
                actual: resource.kind(),
            };
            tracing::error!(key = %key, error = %error, "Dropping resource of unexpected kind");
            return PassOutcome::failed(ResourceState::Unobserved, error);
        }

        let mut status = resource.status().clone();
        status.observed_generation = resource.metadata().generation;

        if resource.metadata().deletion_requested
            && resource.deletion_policy() == DeletionPolicy::Orphan
        {
            tracing::info!(key = %key, "Orphaning external resource");
            return self.finalize(&key, resource).await;
        }

        let client = match self.connector.connect(resource).await {
            Ok(client) => client,
            Err(err) => {
                let error = ReconcileError::from(err);
                let message = format!("cannot connect to provider: {error}");
                status.set_sync_error(message.clone());
                self.recorder.record(ReconcileEvent::warning(
                    key.clone(),
                    EventReason::CannotConnect,
                    message,
                ));
                self.persist_quietly(&key, status).await;
                return PassOutcome::failed(ResourceState::Unobserved, error);
            }
        };

        let target = resource.desired_state().external_ref();
        if resource.metadata().deletion_requested {
            return self
                .delete(ctx, client.as_ref(), &key, resource, &target, status)
                .await;
        }

        let observation = match ctx.run(client.observe(ctx, &target)).await {
            Ok(observation) => observation,
            Err(err) => {
                return self
                    .fail(&key, status, err, Verb::Observe, ResourceState::Unobserved)
                    .await;
            }
        };

        match observation {
            Observation::Found(current) if !status.external_identity.is_empty() => {
                status.external_exists = true;
                if resource.is_up_to_date(&current) {
                    tracing::debug!(key = %key, "External resource is up to date");
                    status.last_configuration = Some(current);
                    status.set_available();
                    status.set_synced();
                    status.consecutive_failures = 0;
                    self.persist(&key, status, ResourceState::PresentCurrent, Requeue::Converged)
                        .await
                } else {
                    self.update(ctx, client.as_ref(), &key, resource, &target, status)
                        .await
                }
            }
            Observation::Found(_) | Observation::NotFound => {
                if status.external_exists {
                    tracing::info!(key = %key, "External resource disappeared, recreating");
                }
                status.external_exists = false;
                self.create(ctx, client.as_ref(), &key, resource, &target, status)
                    .await
            }
        }
    }

    async fn create(
        &self,
        ctx: &PassContext,
        client: &dyn ExternalClient,
        key: &ResourceKey,
        resource: &dyn ManagedResource,
        target: &ExternalRef,
        mut status: ObservedStatus,
    ) -> PassOutcome {
        let configuration = resource.desired_state().configuration;
        match ctx.run(client.create(ctx, target, &configuration)).await {
            Ok(creation) => {
                status.external_identity = if creation.external_identity.is_empty() {
                    target.to_string()
                } else {
                    creation.external_identity
                };
                status.external_exists = true;
                status.last_configuration = Some(configuration);
                status.set_available();
                status.set_synced();
                status.consecutive_failures = 0;
                self.recorder.record(ReconcileEvent::normal(
                    key.clone(),
                    EventReason::CreatedExternalResource,
                    format!("Created external resource {target}"),
                ));
                self.publish(key, resource, &mut status, creation.connection_details)
                    .await;

                self.persist(key, status, ResourceState::Absent, Requeue::Converged)
                    .await
            }
            Err(ExternalError::AlreadyExists(detail)) => {
                // A retried create whose first attempt landed. Adopt it; Ready waits for the
                // next observe.
                tracing::info!(key = %key, detail = %detail, "External resource already exists, adopting");
                status.external_identity = target.to_string();
                status.external_exists = true;
                status.consecutive_failures = 0;
                status.mark_pending(
                    ConditionType::Ready,
                    "adopted existing external resource, awaiting observe",
                );
                self.recorder.record(ReconcileEvent::normal(
                    key.clone(),
                    EventReason::CreatedExternalResource,
                    format!("Adopted existing external resource {target}"),
                ));
                match client.connection_details(target) {
                    Ok(details) => self.publish(key, resource, &mut status, details).await,
                    Err(err) => self.recorder.record(ReconcileEvent::warning(
                        key.clone(),
                        EventReason::CannotPublish,
                        err.to_string(),
                    )),
                }
                self.persist(key, status, ResourceState::Absent, Requeue::Progress)
                    .await
            }
            Err(err) => {
                self.fail(key, status, err, Verb::Create, ResourceState::Absent)
                    .await
            }
        }
    }

    async fn update(
        &self,
        ctx: &PassContext,
        client: &dyn ExternalClient,
        key: &ResourceKey,
        resource: &dyn ManagedResource,
        target: &ExternalRef,
        mut status: ObservedStatus,
    ) -> PassOutcome {
        let configuration = resource.desired_state().configuration;
        match ctx.run(client.update(ctx, target, &configuration)).await {
            Ok(()) => {
                // Ready is left to the next observe
                status.last_configuration = Some(configuration);
                status.set_synced();
                status.consecutive_failures = 0;
                self.recorder.record(ReconcileEvent::normal(
                    key.clone(),
                    EventReason::UpdatedExternalResource,
                    format!("Updated external resource {target}"),
                ));
                self.persist(key, status, ResourceState::PresentStale, Requeue::Progress)
                    .await
            }
            Err(err) => {
                self.fail(key, status, err, Verb::Update, ResourceState::PresentStale)
                    .await
            }
        }
    }

    async fn delete(
        &self,
        ctx: &PassContext,
        client: &dyn ExternalClient,
        key: &ResourceKey,
        resource: &dyn ManagedResource,
        target: &ExternalRef,
        status: ObservedStatus,
    ) -> PassOutcome {
        match ctx.run(client.delete(ctx, target)).await {
            Ok(()) | Err(ExternalError::NotFound) => {
                self.recorder.record(ReconcileEvent::normal(
                    key.clone(),
                    EventReason::DeletedExternalResource,
                    format!("Deleted external resource {target}"),
                ));
                self.finalize(key, resource).await
            }
            Err(err) => {
                self.fail(key, status, err, Verb::Delete, ResourceState::Unobserved)
                    .await
            }
        }
    }

    /// Publish connection details and remember them on the status. A failure is reported as an
    /// event and never fails the pass.
    async fn publish(
        &self,
        key: &ResourceKey,
        resource: &dyn ManagedResource,
        status: &mut ObservedStatus,
        details: ConnectionDetails,
    ) {
        if let Err(err) = self
            .publisher
            .publish(key, resource.connection_secret_ref(), &details)
            .await
        {
            self.recorder.record(ReconcileEvent::warning(
                key.clone(),
                EventReason::CannotPublish,
                err.to_string(),
            ));
        }
        status.connection_details = details;
    }

    async fn finalize(&self, key: &ResourceKey, resource: &dyn ManagedResource) -> PassOutcome {
        if let Err(err) = self
            .publisher
            .unpublish(key, resource.connection_secret_ref())
            .await
        {
            self.recorder.record(ReconcileEvent::warning(
                key.clone(),
                EventReason::CannotPublish,
                err.to_string(),
            ));
        }
        if let Err(err) = self.store.finalize(key).await {
            tracing::warn!(key = %key, error = %err, "Cannot finalize resource");
            return PassOutcome::failed(ResourceState::Deleted, err.into());
        }
        self.connector.release(key);
        tracing::info!(key = %key, "Resource finalized");
        PassOutcome::ok(ResourceState::Deleted, Requeue::Done)
    }

    async fn fail(
        &self,
        key: &ResourceKey,
        mut status: ObservedStatus,
        err: ExternalError,
        verb: Verb,
        state: ResourceState,
    ) -> PassOutcome {
        let error = ReconcileError::from(err);
        let class = error.class();
        if class == ErrorClass::Abort {
            tracing::debug!(key = %key, verb = verb.as_str(), "Pass aborted by shutdown");
            return PassOutcome::failed(state, error);
        }

        let message = format!("cannot {} external resource: {error}", verb.as_str());
        if class == ErrorClass::Backoff {
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            if status.consecutive_failures >= self.failure_threshold {
                let reason = match verb {
                    Verb::Delete => ConditionReason::Deleting,
                    _ => ConditionReason::Unavailable,
                };
                status.set_unavailable(reason, message.clone());
                status.set_sync_error(message.clone());
            } else {
                status.mark_pending(ConditionType::Ready, message.clone());
                status.mark_pending(ConditionType::Synced, message.clone());
            }
        } else {
            match verb {
                Verb::Observe | Verb::Create | Verb::Update => {
                    status.set_unavailable(ConditionReason::ReconcileError, message.clone())
                }
                Verb::Delete => {
                    status.set_unavailable(ConditionReason::Deleting, message.clone())
                }
            }
            status.set_sync_error(message.clone());
        }

        tracing::warn!(
            key = %key,
            verb = verb.as_str(),
            failures = status.consecutive_failures,
            error = %error,
            "Reconcile pass failed"
        );
        self.recorder.record(ReconcileEvent::warning(
            key.clone(),
            verb.event_reason(),
            message,
        ));
        self.persist_quietly(key, status).await;
        PassOutcome::failed(state, error)
    }

    async fn persist(
        &self,
        key: &ResourceKey,
        status: ObservedStatus,
        state: ResourceState,
        requeue: Requeue,
    ) -> PassOutcome {
        match self.store.update_status(key, status).await {
            Ok(()) => PassOutcome::ok(state, requeue),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Cannot persist status");
                PassOutcome::failed(state, err.into())
            }
        }
    }

    /// Persist a status on a path that already failed; the original error wins.
    async fn persist_quietly(&self, key: &ResourceKey, status: ObservedStatus) {
        if let Err(err) = self.store.update_status(key, status).await {
            tracing::warn!(key = %key, error = %err, "Cannot persist status");
        }
    }
}
