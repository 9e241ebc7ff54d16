//! Error type definitions for the lookup provider
//!
//! This module defines all error types used throughout the crate. Argument
//! validation failures are raised synchronously to the caller; transport
//! failures are absorbed at the fetch boundary and only ever show up in logs
//! or as a missing notification.

use thiserror::Error;

/// Top-level application error type
///
/// This enum represents every error a public operation can return. It uses
/// `thiserror` to provide automatic error trait implementations and proper
/// error chaining.
#[derive(Error, Debug)]
pub enum AppError {
    /// Empty key, empty listener id or similar caller mistakes
    #[error("Invalid argument: {field} - {message}")]
    InvalidArgument { field: String, message: String },

    /// A raw key that cannot be canonicalized
    #[error("Invalid key '{raw}': {reason}")]
    InvalidKey { raw: String, reason: String },

    /// More observer departures than arrivals
    #[error("Observer count underflow: departure reported with no active observers")]
    ObserverUnderflow,

    /// Transport layer errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors reported by the external lookup and image transports
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Request exceeded the provider timeout
    #[error("Request timeout: {target}")]
    Timeout { target: String },

    /// Non-success HTTP status from the provider
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// Provider answered but the payload could not be decoded
    #[error("Decode error: {target} - {message}")]
    Decode { target: String, message: String },

    /// Provider has no record for the key
    #[error("Not found: {key}")]
    NotFound { key: String },

    /// Provider is not started or cannot be reached
    #[error("Provider unavailable: {provider} - {message}")]
    Unavailable { provider: String, message: String },
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create an invalid argument error for a named parameter
    pub fn invalid_argument<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an invalid key error
    pub fn invalid_key<R: Into<String>, M: Into<String>>(raw: R, reason: M) -> Self {
        Self::InvalidKey {
            raw: raw.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error was caused by the caller rather than the environment
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. } | Self::InvalidKey { .. } | Self::ObserverUnderflow
        )
    }
}

impl TransportError {
    /// Create an unavailable error
    pub fn unavailable<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode<T: Into<String>, M: Into<String>>(target: T, message: M) -> Self {
        Self::Decode {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Map a reqwest failure onto the transport taxonomy
    pub fn from_reqwest(target: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                target: target.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Self::decode(target, err.to_string())
        } else {
            Self::unavailable(target, err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_are_classified() {
        assert!(AppError::invalid_argument("key", "empty").is_caller_error());
        assert!(AppError::invalid_key("abc", "no digits").is_caller_error());
        assert!(AppError::ObserverUnderflow.is_caller_error());
        assert!(!AppError::configuration("bad").is_caller_error());
    }

    #[test]
    fn transport_errors_convert_into_app_errors() {
        let err: AppError = TransportError::NotFound {
            key: "+15551234567".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::Transport(TransportError::NotFound { .. })));
        assert_eq!(
            err.to_string(),
            "Transport error: Not found: +15551234567"
        );
    }
}
