use thiserror::Error;

use foodshare_sync::BackendError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not signed in or session expired")]
    Unauthorized,

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Realtime channel error: {0}")]
    Realtime(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<ClientError> for BackendError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Unauthorized => BackendError::Unauthorized,
            ClientError::Status { status, message } => BackendError::Status { status, message },
            ClientError::Decode(msg) => BackendError::Decode(msg),
            ClientError::Http(e) if e.is_decode() => BackendError::Decode(e.to_string()),
            ClientError::Http(e) => BackendError::Transport(e.to_string()),
            ClientError::WebSocket(e) => BackendError::Transport(e.to_string()),
            ClientError::Realtime(msg) => BackendError::Transport(msg),
            ClientError::Config(msg) => BackendError::Rejected(msg),
            ClientError::Url(e) => BackendError::Rejected(e.to_string()),
        }
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
