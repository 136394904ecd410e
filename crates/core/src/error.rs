//! Command error model.
//!
//! Every command returns either its result or a [`CommandError`]. Callers branch on
//! the error *class* through the `is_*` predicates, never on message text. The
//! message carried by business errors is a stable identifier such as
//! `Errors.Org.AlreadyExists`.

use std::sync::Arc;

use thiserror::Error;

/// Result type used by the command side.
pub type CommandResult<T> = Result<T, CommandError>;

/// Shared, cloneable underlying cause of an [`CommandError::Internal`].
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error, Clone)]
pub enum CommandError {
    /// Structurally bad input, detected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required aggregate has no qualifying events.
    #[error("not found: {0}")]
    NotFound(String),

    /// The aggregate exists but is not in the state the change requires.
    /// Also covers the no-op case.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A unique constraint claim collides with an outstanding one.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Another writer committed to one of the aggregates first.
    ///
    /// Retryable by re-running the whole command against fresh state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller's context was cancelled or its deadline elapsed.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A collaborator (storage, id generation, encoding) failed.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Cause,
    },
}

impl CommandError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    /// The requested state already holds.
    pub fn not_changed() -> Self {
        Self::PreconditionFailed("Errors.NoChangesFound".to_string())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn internal<E>(msg: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: msg.into(),
            source: Arc::new(source),
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, Self::PreconditionFailed(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// The stable message id (or description) carried by this error.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArgument(m)
            | Self::NotFound(m)
            | Self::PreconditionFailed(m)
            | Self::AlreadyExists(m)
            | Self::PermissionDenied(m)
            | Self::Conflict(m)
            | Self::Cancelled(m) => m,
            Self::Internal { message, .. } => message,
        }
    }
}
