//! Error types for SCM operations

use crate::repo::Provider;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error: {status} - {message}")]
    Api {
        provider: Provider,
        status: u16,
        message: String,
    },

    #[error("Invalid repository URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("No push access to {repo}")]
    PushDenied { repo: String },

    #[error("Branch '{branch}' not found in {repo}")]
    BranchNotFound { repo: String, branch: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScmError {
    pub(crate) fn invalid_url(url: &str, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// Status code reported by the remote API, if the failure came from one
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type for SCM operations
pub type ScmResult<T> = Result<T, ScmError>;
