//! Reconcile events.
//!
//! The engine reports what it did to the external system through an injected [`EventRecorder`]
//! instead of printing. [`TracingRecorder`] writes events to the log; [`BroadcastRecorder`] fans
//! them out to any number of subscribers over a tokio broadcast channel.

use std::fmt;

use jenkins_provider_core::ResourceKey;
use tokio::sync::broadcast;

/// Default buffer size for the broadcast channel.
/// Events beyond this limit are dropped for slow receivers.
const DEFAULT_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReason {
    CreatedExternalResource,
    UpdatedExternalResource,
    DeletedExternalResource,
    CannotConnect,
    CannotObserve,
    CannotCreate,
    CannotUpdate,
    CannotDelete,
    CannotPublish,
}

impl EventReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreatedExternalResource => "CreatedExternalResource",
            Self::UpdatedExternalResource => "UpdatedExternalResource",
            Self::DeletedExternalResource => "DeletedExternalResource",
            Self::CannotConnect => "CannotConnectToProvider",
            Self::CannotObserve => "CannotObserveExternalResource",
            Self::CannotCreate => "CannotCreateExternalResource",
            Self::CannotUpdate => "CannotUpdateExternalResource",
            Self::CannotDelete => "CannotDeleteExternalResource",
            Self::CannotPublish => "CannotPublishConnectionDetails",
        }
    }
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileEvent {
    pub key: ResourceKey,
    pub event_type: EventType,
    pub reason: EventReason,
    pub message: String,
}

impl ReconcileEvent {
    pub fn normal(key: ResourceKey, reason: EventReason, message: impl Into<String>) -> Self {
        Self {
            key,
            event_type: EventType::Normal,
            reason,
            message: message.into(),
        }
    }

    pub fn warning(key: ResourceKey, reason: EventReason, message: impl Into<String>) -> Self {
        Self {
            key,
            event_type: EventType::Warning,
            reason,
            message: message.into(),
        }
    }
}

pub trait EventRecorder: Send + Sync {
    fn record(&self, event: ReconcileEvent);
}

/// Writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: ReconcileEvent) {
        match event.event_type {
            EventType::Normal => tracing::info!(
                key = %event.key,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => tracing::warn!(
                key = %event.key,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

/// Publishes events to broadcast subscribers
#[derive(Clone)]
pub struct BroadcastRecorder {
    sender: broadcast::Sender<ReconcileEvent>,
}

impl BroadcastRecorder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive all events recorded after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BroadcastRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastRecorder")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl EventRecorder for BroadcastRecorder {
    fn record(&self, event: ReconcileEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}
