//! Error types for the Azure Resource Manager provider.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors raised by the Azure provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AzureError {
    /// Raised when the configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when hybrid endpoint metadata cannot be fetched or parsed.
    #[error("failed to discover endpoints from {endpoint}: {message}")]
    Discovery {
        /// Resource Manager endpoint queried.
        endpoint: String,
        /// Failure description.
        message: String,
    },
    /// Raised when the token exchange fails.
    #[error("authentication failed: {message}")]
    Authentication {
        /// HTTP status, when a response was received.
        status: Option<u16>,
        /// Failure description.
        message: String,
    },
    /// Raised when the request could not be sent or the response not read.
    #[error("transport error: {0}")]
    Transport(String),
    /// Raised when Resource Manager rejects a request.
    #[error("request failed with status {status} ({code}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Resource Manager error code.
        code: String,
        /// Resource Manager error message.
        message: String,
    },
    /// Raised when a long-running operation ends in a non-success state.
    #[error("operation on {resource} ended as {status}: {message}")]
    OperationFailed {
        /// Resource the operation targeted.
        resource: String,
        /// Terminal status reported by the provider.
        status: String,
        /// Error message reported with the status.
        message: String,
    },
    /// Raised when a long-running operation exceeds the poll budget.
    #[error("timeout waiting for {operation} on {resource}")]
    Timeout {
        /// Operation being waited on.
        operation: String,
        /// Resource the operation targeted.
        resource: String,
    },
    /// Raised when a response body does not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for AzureError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

impl From<ConfigError> for AzureError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
