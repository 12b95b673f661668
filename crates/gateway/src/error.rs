//! Error types for gateway operations

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scm::ScmError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Push to '{branch}' rejected: {output}")]
    PushRejected { branch: String, output: String },

    #[error("git {command} failed: {output}")]
    Git { command: String, output: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Scm(#[from] ScmError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(kind: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    /// Whether the failure is a lost optimistic-concurrency race worth retrying
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) | Self::PushRejected { .. } => true,
            Self::Kube(e) => is_kube_conflict(e),
            _ => false,
        }
    }

    /// HTTP status the error maps to when surfaced through axum
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::PushRejected { .. } => StatusCode::CONFLICT,
            Self::Kube(kube::Error::Api(resp)) => {
                StatusCode::from_u16(resp.code).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Scm(ScmError::PushDenied { .. }) => StatusCode::FORBIDDEN,
            Self::Scm(ScmError::BranchNotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Scm(ScmError::InvalidUrl { .. }) => StatusCode::BAD_REQUEST,
            Self::Git { .. } | Self::Kube(_) | Self::Scm(_) => StatusCode::BAD_GATEWAY,
            Self::Serialization(_) | Self::Config(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// 404 from the API server
pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// 409 from the API server: a stale resourceVersion or a lost create race
pub(crate) fn is_kube_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

/// Result type for gateway operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
