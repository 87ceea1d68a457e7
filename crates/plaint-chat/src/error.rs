use plaint_types::api::{ErrorBody, ErrorCode};

/// Failure talking to the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The server answered with an error body.
    #[error("{code}: {message}")]
    Server { code: ErrorCode, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    /// The realtime connection went away.
    #[error("gateway connection closed")]
    Closed,
}

impl BackendError {
    pub fn server(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The query needs an index that does not exist yet.
    pub fn is_failed_precondition(&self) -> bool {
        self.code() == Some(ErrorCode::FailedPrecondition)
    }

    pub fn message(&self) -> String {
        match self {
            Self::Server { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<ErrorBody> for BackendError {
    fn from(body: ErrorBody) -> Self {
        Self::server(body.code, body.message)
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BackendError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Transport(format!("malformed payload: {}", e))
    }
}

/// Failure of a chat feed operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("message text must not be empty")]
    EmptyMessage,

    #[error(transparent)]
    Backend(#[from] BackendError),
}
