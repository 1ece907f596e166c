use jenkins_provider_core::{CoreError, ResourceKind};
use thiserror::Error;

/// Error vocabulary of the external client adapters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalError {
    #[error("external resource not found")]
    NotFound,

    #[error("external resource already exists: {0}")]
    AlreadyExists(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("permanent error: {0}")]
    Permanent(String),

    /// The pass was aborted because the process is shutting down
    #[error("cancelled by shutdown")]
    Cancelled,
}

impl ExternalError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Credential resolution failures
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The credential reference does not point at an existing ProviderConfig
    #[error("cannot get ProviderConfig: {0}")]
    Config(String),

    /// The secret material could not be fetched or parsed
    #[error("cannot get credentials: {0}")]
    Credential(String),
}

impl ResolveError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }
}

impl From<CoreError> for ResolveError {
    fn from(err: CoreError) -> Self {
        Self::Credential(err.to_string())
    }
}

/// Storage backend failures
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Connection detail publishing failures
#[derive(Debug, Clone, Error)]
#[error("cannot publish connection details: {0}")]
pub struct PublishError(pub String);

/// How a failed pass must be requeued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Log and forget the key
    Drop,
    /// Requeue with exponential backoff
    Backoff,
    /// Requeue at the capped maximum interval
    Capped,
    /// Do not requeue; the process is going away
    Abort,
}

/// Failure of a reconcile pass
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error("managed resource is not a {expected}: got {actual}")]
    TypeMismatch {
        expected: ResourceKind,
        actual: ResourceKind,
    },

    #[error("cannot get ProviderConfig: {0}")]
    Config(String),

    #[error("cannot get credentials: {0}")]
    Credential(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("reconcile aborted by shutdown")]
    Shutdown,

    #[error("storage error: {0}")]
    Store(String),
}

impl ReconcileError {
    /// Requeue class of this failure
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TypeMismatch { .. } => ErrorClass::Drop,
            Self::Config(_) | Self::Credential(_) | Self::Transient(_) | Self::Store(_) => {
                ErrorClass::Backoff
            }
            Self::Permanent(_) => ErrorClass::Capped,
            Self::Shutdown => ErrorClass::Abort,
        }
    }
}

impl From<ResolveError> for ReconcileError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Config(msg) => Self::Config(msg),
            ResolveError::Credential(msg) => Self::Credential(msg),
        }
    }
}

impl From<ExternalError> for ReconcileError {
    fn from(err: ExternalError) -> Self {
        match err {
            ExternalError::Cancelled => Self::Shutdown,
            ExternalError::Transient(msg) => Self::Transient(msg),
            ExternalError::Permanent(msg) => Self::Permanent(msg),
            ExternalError::NotFound => Self::Transient("external resource not found".into()),
            ExternalError::AlreadyExists(msg) => {
                Self::Permanent(format!("external resource already exists: {msg}"))
            }
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}
