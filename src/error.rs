//! Error types for the tunnel broker
//!
//! This module defines the error types used throughout the application.
//! We use `thiserror` for ergonomic error definitions and `anyhow` for
//! error propagation in the binary's `main`.

use thiserror::Error;

/// Main error type for broker operations
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tunnel registry errors (id collision, subnet exhausted)
    #[error("Registry error: {0}")]
    Registry(String),

    /// WireGuard peer-controller errors
    #[error("WireGuard error: {0}")]
    WireGuard(String),

    /// Keeper (identity/credit service) errors
    #[error("Keeper error: {0}")]
    Keeper(String),

    /// Metering engine errors
    #[error("Metering error: {0}")]
    Metering(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Not found errors (unknown tunnel id)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state errors (e.g. deleting a non-active tunnel)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource exhaustion (IP subnet full)
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

/// Result type alias using BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        BrokerError::Keeper(err.to_string())
    }
}
