use std::io;

use axum::http::StatusCode;

/// Custom error type for cicd_hooks operations
#[derive(Debug, thiserror::Error)]
pub enum CicdError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Webhook validation failed: {0}")]
    WebhookValidationFailed(String),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("SCM request failed ({status}): {message}")]
    Scm { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No SCM identity available: {0}")]
    IdentityUnavailable(String),

    #[error("Invalid trigger configuration: {0}")]
    InvalidTrigger(String),

    #[error("Failed to start event ({status}): {message}")]
    EventCreationFailed { status: u16, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CicdError {
    /// Shorthand for an SCM adapter failure.
    pub fn scm(status: u16, message: impl Into<String>) -> Self {
        CicdError::Scm {
            status,
            message: message.into(),
        }
    }

    /// True for SCM failures the provider reported as a server-side problem.
    pub fn is_server_side(&self) -> bool {
        match self {
            CicdError::Scm { status, .. } => *status >= 500,
            _ => true,
        }
    }

    /// HTTP status a delivery is answered with when this error is the
    /// request's outcome.
    pub fn status_code(&self) -> StatusCode {
        let code = match self {
            CicdError::WebhookValidationFailed(_) => 401,
            CicdError::InvalidPayload(_) | CicdError::JsonError(_) => 400,
            CicdError::NotFound(_) => 404,
            CicdError::Scm { status, .. } | CicdError::EventCreationFailed { status, .. } => {
                *status
            }
            _ => 500,
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Helper type for Results that use CicdError
pub type Result<T> = std::result::Result<T, CicdError>;
