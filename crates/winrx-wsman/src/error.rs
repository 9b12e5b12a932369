//! WS-Man transport error types

use thiserror::Error;
use std::io;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to reach or talk to the WS-Man endpoint
    #[error("connection error: {0}")]
    Connection(String),

    /// The endpoint rejected the supplied credentials or auth scheme
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The endpoint answered with an unexpected HTTP status
    #[error("HTTP error {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// The SOAP response could not be interpreted
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request did not complete within the configured timeout
    #[error("operation timed out")]
    Timeout,

    /// Remote command failed
    #[error("remote command failed with exit code {code}: {message}")]
    CommandFailed {
        /// Exit code of the failed command
        code: i32,
        /// Error message
        message: String,
    },

    /// Invalid transport configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}
