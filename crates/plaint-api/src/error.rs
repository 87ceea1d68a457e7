use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use plaint_db::MissingIndex;
use plaint_types::api::{ErrorBody, ErrorCode};

/// Handler error. Rendered as `ErrorBody` JSON.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    AlreadyExists(String),

    /// Workflow or state conflict.
    #[error("{0}")]
    FailedPrecondition(String),

    /// Ordered query without a ready index, before the console link is known.
    #[error(transparent)]
    MissingIndex(#[from] MissingIndex),

    /// Ordered query without a ready index. Carries the remediation text.
    #[error("{0}")]
    IndexRequired(String),

    #[error(transparent)]
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated(_) => ErrorCode::Unauthenticated,
            Self::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::FailedPrecondition(_) | Self::MissingIndex(_) | Self::IndexRequired(_) => {
                ErrorCode::FailedPrecondition
            }
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyExists(_) | Self::FailedPrecondition(_) => StatusCode::CONFLICT,
            Self::MissingIndex(_) | Self::IndexRequired(_) => StatusCode::PRECONDITION_FAILED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Attach the console link to a missing-index error.
    pub fn with_console(self, console_url: &str) -> Self {
        match self {
            Self::MissingIndex(missing) => Self::IndexRequired(missing.remediation(console_url)),
            other => other,
        }
    }

    pub fn denied() -> Self {
        Self::PermissionDenied("You don't have permission to access this area.".into())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<MissingIndex>() {
            Ok(missing) => Self::MissingIndex(missing),
            Err(err) => Self::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                "Internal error".to_string()
            }
            Self::MissingIndex(missing) => missing.remediation("/console"),
            other => other.to_string(),
        };
        let body = ErrorBody {
            code: self.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plaint_db::CHAT_INDEX;

    #[test]
    fn missing_index_survives_anyhow_and_gets_console_link() {
        let err: anyhow::Error = MissingIndex::from_spec(CHAT_INDEX).into();
        let api = ApiError::from(err).with_console("http://localhost:3000/console");
        assert_eq!(api.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(api.code(), ErrorCode::FailedPrecondition);
        assert_eq!(
            api.to_string(),
            "The query requires an index. You can create it here: \
             http://localhost:3000/console/indexes/create?collection=chats&fields=complaintId,timestamp"
        );
    }

    #[test]
    fn other_errors_are_internal() {
        let api = ApiError::from(anyhow::anyhow!("disk full"));
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.code(), ErrorCode::Internal);
    }
}
