//! Error types for the NAS auth agent
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the NAS auth agent
#[derive(Error, Debug)]
pub enum Error {
    /// Cloud roster errors (non-success code, malformed payload)
    #[error("Roster error: {0}")]
    Roster(String),

    /// Router web API errors
    #[error("Router error: {0}")]
    Router(String),

    /// Captive-portal auth call errors
    #[error("Portal error: {0}")]
    Portal(String),

    /// Push channel errors (broker connection, malformed message)
    #[error("Push channel error: {0}")]
    Push(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Credentials rejected by an external service
    ///
    /// Retrying cannot fix this, so it is treated as fatal.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The router rejected the cached session token
    #[error("Router session token expired")]
    SessionExpired,

    /// The router kept rejecting freshly acquired session tokens
    #[error("Router session token expired again after re-login ({operation})")]
    SessionRetryExhausted {
        /// Router operation that was being attempted
        operation: &'static str,
    },

    /// An outbound call or a check cycle exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Create a roster error
    pub fn roster(msg: impl Into<String>) -> Self {
        Self::Roster(msg.into())
    }

    /// Create a router error
    pub fn router(msg: impl Into<String>) -> Self {
        Self::Router(msg.into())
    }

    /// Create a portal error
    pub fn portal(msg: impl Into<String>) -> Self {
        Self::Portal(msg.into())
    }

    /// Create a push channel error
    pub fn push(msg: impl Into<String>) -> Self {
        Self::Push(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error must terminate the agent
    ///
    /// Bad credentials and bad configuration cannot be resolved by
    /// retrying; everything else is logged and retried on the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::Config(_))
    }
}
