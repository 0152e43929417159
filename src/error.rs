//! Domain-specific error types for explore-llm

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::clients::CompletionError;

/// Main error type for the explore-llm service
#[derive(Error, Debug)]
pub enum ExploreError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Upstream error in {operation}: {message}")]
    Upstream { operation: String, message: String },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Parse error in {operation}: {message}")]
    Parse { operation: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ExploreError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Wrap a completion failure with the name of the operation that issued it.
    pub fn from_completion(operation: &str, err: CompletionError) -> Self {
        match err {
            CompletionError::Timeout { timeout_ms } => Self::Timeout {
                operation: operation.to_string(),
                timeout_ms,
            },
            other => Self::Upstream {
                operation: operation.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Stable machine-readable kind carried in every error body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config_error",
            Self::Validation { .. } => "validation_error",
            Self::Upstream { .. } | Self::Timeout { .. } => "upstream_error",
            Self::Parse { .. } => "parse_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Config { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Upstream { .. } | Self::Parse { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Message shown to HTTP clients. Upstream and parse details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Upstream { .. } => "The completion service request failed".to_string(),
            Self::Timeout { timeout_ms, .. } => {
                format!("The completion service did not answer within {timeout_ms}ms")
            }
            Self::Parse { .. } => "The completion service returned a malformed response".to_string(),
            Self::Config { .. } => "The service is misconfigured".to_string(),
            Self::Internal { .. } => "Internal error".to_string(),
            Self::Validation { message } => message.clone(),
        }
    }
}

impl From<anyhow::Error> for ExploreError {
    fn from(err: anyhow::Error) -> Self {
        ExploreError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ExploreError {
    fn from(err: serde_json::Error) -> Self {
        ExploreError::Internal {
            message: format!("Serialization failed: {err}"),
        }
    }
}

impl From<toml::de::Error> for ExploreError {
    fn from(err: toml::de::Error) -> Self {
        ExploreError::Config {
            message: format!("Invalid config file: {err}"),
        }
    }
}

/// Convert ExploreError into a JSON error response
impl IntoResponse for ExploreError {
    fn into_response(self) -> Response {
        match &self {
            ExploreError::Validation { .. } => tracing::debug!("Rejected request: {}", self),
            _ => tracing::error!("Request failed: {}", self),
        }

        let body = json!({
            "error": {
                "kind": self.kind(),
                "message": self.public_message(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Result type alias for explore-llm operations
pub type Result<T> = std::result::Result<T, ExploreError>;
