use thiserror::Error;

/// Core error types for managed resource handling
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("Resource kind not registered: {0}")]
    KindNotRegistered(String),

    #[error("Invalid resource data: {message}")]
    InvalidResource { message: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("ProviderConfig {name} is still used by {users} resource(s)")]
    ProviderConfigInUse { name: String, users: usize },
}

impl CoreError {
    /// Create a new UnknownKind error
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        Self::UnknownKind(kind.into())
    }

    /// Create a new InvalidResource error
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    /// Create a new InvalidCredentials error
    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::InvalidCredentials(message.into())
    }

    /// Check if the error was caused by malformed input rather than process state
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownKind(_)
                | Self::InvalidResource { .. }
                | Self::JsonError(_)
                | Self::InvalidCredentials(_)
        )
    }
}
