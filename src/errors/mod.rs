//! Centralized error handling for the lookup provider
//!
//! # Error Categories
//!
//! - **Argument Errors**: empty keys or listener ids handed to a public operation
//! - **Key Errors**: raw phone numbers that cannot be canonicalized
//! - **Lifecycle Errors**: observer count bookkeeping mistakes
//! - **Transport Errors**: failures reported by the remote provider
//! - **Configuration Errors**: invalid or unreadable configuration
//!
//! # Usage
//!
//! ```rust
//! use lookup_provider::errors::{AppError, AppResult};
//!
//! fn example_function(raw: &str) -> AppResult<String> {
//!     if raw.is_empty() {
//!         return Err(AppError::invalid_argument("raw", "must not be empty"));
//!     }
//!     Ok(raw.to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for transport Results
pub type TransportResult<T> = Result<T, TransportError>;
