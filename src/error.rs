//! Custom error types for flowdeck
//!
//! Errors are grouped by concern. Everything an observer can trigger ends
//! up as an [`ApiError`], which maps onto an HTTP status at the request
//! boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors raised by flow and store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("Flow not found: {0}")]
    NotFound(String),

    #[error("Duplicate flow id: {0}")]
    DuplicateId(String),

    #[error("Invalid flow update: {0}")]
    InvalidArgument(String),
}

/// Live option errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    #[error("No such option: {0}")]
    Unknown(String),

    #[error("Option {name} expects {expected}, got {got}")]
    WrongType {
        name: String,
        expected: String,
        got: String,
    },

    #[error("Invalid choice for option {name}: {value} (valid: {choices})")]
    InvalidChoice {
        name: String,
        value: String,
        choices: String,
    },

    #[error("Invalid value for option {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Configuration file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Failed to write file: {path}")]
    WriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors reported back by the protocol engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0}")]
    Rejected(String),

    #[error("Protocol engine is not running")]
    Unavailable,
}

/// Command registration and invocation errors
///
/// Invocation errors never escape the dispatcher; they are reported to the
/// caller as the `error` payload of the outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Command {command}: {reason}")]
    Arguments { command: String, reason: String },

    #[error("Invalid command definition {command}: {reason}")]
    Definition { command: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

impl From<FlowError> for CommandError {
    fn from(err: FlowError) -> Self {
        CommandError::Failed(err.to_string())
    }
}

impl From<OptionError> for CommandError {
    fn from(err: OptionError) -> Self {
        CommandError::Failed(err.to_string())
    }
}

impl From<EngineError> for CommandError {
    fn from(err: EngineError) -> Self {
        CommandError::Failed(err.to_string())
    }
}

/// Error returned to HTTP clients
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                "Internal Server Error".to_string()
            }
            other => {
                tracing::debug!(status = %status, error = %other, "client error");
                other.to_string()
            }
        };
        (status, message).into_response()
    }
}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::NotFound(_) => ApiError::NotFound(err.to_string()),
            FlowError::DuplicateId(_) => ApiError::Conflict(err.to_string()),
            FlowError::InvalidArgument(_) => ApiError::InvalidArgument(err.to_string()),
        }
    }
}

impl From<OptionError> for ApiError {
    fn from(err: OptionError) -> Self {
        ApiError::InvalidArgument(err.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Rejected(msg) => ApiError::InvalidArgument(msg),
            EngineError::Unavailable => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> String;
}

impl UserHint for ConfigError {
    fn user_hint(&self) -> String {
        match self {
            ConfigError::ReadError { path, .. } => {
                format!("Could not read '{}'. Check if the file exists and you have read permissions.", path)
            }
            ConfigError::ParseError(_) => {
                "The configuration file has invalid syntax. Check for TOML formatting errors.".into()
            }
            ConfigError::ValidationError { field, reason } => {
                format!("Invalid value for '{}': {}", field, reason)
            }
            ConfigError::WriteError { path, .. } => {
                format!("Could not write '{}'. Check the directory permissions.", path)
            }
        }
    }
}

impl UserHint for OptionError {
    fn user_hint(&self) -> String {
        match self {
            OptionError::Unknown(name) => {
                format!("'{}' is not a known option. GET /options lists all options.", name)
            }
            OptionError::InvalidChoice { name, choices, .. } => {
                format!("Option '{}' must be one of: {}", name, choices)
            }
            _ => self.to_string(),
        }
    }
}
