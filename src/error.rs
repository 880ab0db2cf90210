//! Error types for convert-relay
//!
//! This module provides the error taxonomy for the relay:
//! - Input errors detected before any job work starts
//! - Upstream tool failures (non-zero exits, undecodable metadata, timeouts)
//! - Internal failures of the orchestration itself
//! - HTTP status code mapping and the JSON error body used by the API
//!
//! A client disconnect is deliberately absent: it is a job outcome
//! ([`crate::orchestrator::JobOutcome::Cancelled`]), not an error.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::StageKind;

/// Result type alias for convert-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for convert-relay
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid source reference (or other request input)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An external stage exited unsuccessfully
    #[error("{stage} stage failed (exit code {exit_code:?}): {message}")]
    UpstreamTool {
        /// Which stage failed
        stage: StageKind,
        /// Exit code, if the process exited normally
        exit_code: Option<i32>,
        /// Diagnostic detail (usually the tail of stderr)
        message: String,
    },

    /// Metadata stage output could not be decoded
    #[error("metadata parse error: {0}")]
    MetadataParse(String),

    /// An external stage exceeded the configured stage timeout
    #[error("{stage} stage timed out after {after:?}")]
    StageTimeout {
        /// Which stage timed out
        stage: StageKind,
        /// The timeout that was exceeded
        after: Duration,
    },

    /// External tool could not be launched or driven
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "temp_dir")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Unexpected failure in the orchestration logic itself
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error originates from one of the external stages
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::UpstreamTool { .. } | Error::MetadataParse(_) | Error::StageTimeout { .. }
        )
    }

    /// Message published on the push channel when a job fails with this error
    pub fn event_message(&self) -> &'static str {
        match self {
            Error::UpstreamTool {
                stage: StageKind::Metadata,
                ..
            } => "Failed to fetch video info",
            Error::MetadataParse(_) => "Metadata error",
            Error::UpstreamTool {
                stage: StageKind::FetchMux,
                ..
            } => "Conversion failed",
            Error::StageTimeout {
                stage: StageKind::Metadata,
                ..
            } => "Timed out fetching video info",
            Error::StageTimeout {
                stage: StageKind::FetchMux,
                ..
            } => "Conversion timed out",
            Error::InvalidInput(_) => "Invalid request",
            _ => "Internal server error",
        }
    }

    /// Message returned in the HTTP error body for this error
    ///
    /// Internal details never leak to the requester; they are logged instead.
    pub fn public_message(&self) -> String {
        match self {
            Error::InvalidInput(msg) => msg.clone(),
            Error::MetadataParse(_) => "Failed to parse video metadata".to_string(),
            other => other.event_message().to_string(),
        }
    }
}

/// API error response body
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": "No URL provided",
///   "code": "invalid_input"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Human-readable error message
    pub error: String,

    /// Machine-readable error code (e.g., "invalid_input", "upstream_tool_error")
    pub code: String,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
        }
    }

    /// Body for a conversion cut short by server shutdown
    pub fn cancelled() -> Self {
        Self::new("cancelled", "Conversion cancelled")
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::InvalidInput(_) => 400,

            // 502 Bad Gateway - the upstream tool misbehaved
            Error::UpstreamTool { .. } | Error::MetadataParse(_) => 502,

            // 504 Gateway Timeout
            Error::StageTimeout { .. } => 504,

            Error::ExternalTool(_)
            | Error::Config { .. }
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::ApiServerError(_)
            | Error::Internal(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::UpstreamTool { .. } => "upstream_tool_error",
            Error::MetadataParse(_) => "metadata_parse_error",
            Error::StageTimeout { .. } => "stage_timeout",
            Error::ExternalTool(_) => "external_tool_error",
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError::new(error.error_code().to_string(), error.public_message())
    }
}
