//! # Winrx WS-Management Transport
//!
//! WS-Management (WinRM) shell transport layer implementation for winrx.

#![warn(missing_docs)]

/// Transport abstraction and configuration
pub mod transport;

/// SOAP envelope construction and response extraction
pub mod envelope;

/// HTTP authentication (Basic, NTLM)
pub mod auth;

/// Default reqwest-based transport client
pub mod client;

/// Transport-specific error types
pub mod error;

pub use transport::{
    AuthScheme, OutputSink, ShellId, ShellOptions, ShellTransport, WsmanAuth, WsmanConfig,
};
pub use envelope::{EnvelopeBuilder, ReceiveOutput, StreamBlock, StreamKind};
pub use auth::NtlmExchange;
pub use client::WsmanClient;
pub use error::TransportError;
