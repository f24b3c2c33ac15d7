use thiserror::Error;

/// Failure reported by a backend collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Not signed in or session expired")]
    Unauthorized,

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("{0}")]
    Rejected(String),
}

/// Outcome of a component operation that did not go through.
///
/// Every variant is recoverable: the caller may retry once the cause is gone.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sign in required")]
    AuthRequired,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("No conversation partner selected")]
    NoPeerSelected,

    #[error(transparent)]
    Remote(#[from] BackendError),
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
