//! Error types for the winrx library

use thiserror::Error;
use winrx_wsman::TransportError;

/// Main error type for winrx operations
#[derive(Debug, Error)]
pub enum WinrxError {
    /// Invalid session configuration; fatal, not retryable
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The pre-flight reachability probe failed; the host was never reached
    #[error("host unreachable: {0}")]
    Connectivity(String),

    /// Ticket acquisition or the transport handshake rejected the credentials
    #[error("authentication error: {0}")]
    Authentication(String),

    /// A remote command returned a non-zero exit code
    #[error("remote command failed with exit code {code}")]
    CommandFailed {
        /// Remote process exit code
        code: i32,
        /// Captured stderr, when available
        stderr: String,
    },

    /// Removal of a remote temporary artifact failed after the operation
    #[error("cleanup failed: {0}")]
    Cleanup(String),

    /// Transport-level failure; surfaced as-is, no layer-local retry
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session used outside its valid lifecycle; a programming error
    #[error("session error: {0}")]
    Session(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
