//! Error types for the DigitalOcean provider.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the DigitalOcean provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DigitalOceanError {
    /// Raised when the provider configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a request could not be sent or its response read.
    #[error("request to the DigitalOcean API failed: {message}")]
    Http {
        /// Message returned by the HTTP client.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("DigitalOcean API returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message from the API error body, or the raw body.
        message: String,
    },
    /// Raised when a response body does not match the expected shape.
    #[error("unexpected DigitalOcean API response: {message}")]
    Decode {
        /// Decoder message.
        message: String,
    },
    /// Raised when an instance create response carries no create action.
    #[error("create response for instance {instance} has no create action")]
    MissingCreateAction {
        /// Name of the created instance.
        instance: String,
    },
}

impl From<reqwest::Error> for DigitalOceanError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode {
                message: value.to_string(),
            }
        } else {
            Self::Http {
                message: value.to_string(),
            }
        }
    }
}

impl From<ConfigError> for DigitalOceanError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
