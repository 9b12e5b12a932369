//! # Winrx
//!
//! A remote execution session layer for Windows hosts over the
//! WS-Management remote-shell protocol.
//!
//! Winrx lets an orchestration worker run scripts and push files on a remote
//! Windows host: it batches arbitrary script content into wire-size-bounded
//! commands, supports Basic/NTLM/Kerberos/CredSSP authentication (Kerberos
//! tickets are acquired through a local `kinit` helper with per-execution
//! credential-cache isolation), and guarantees cleanup of remote temporary
//! artifacts on every exit path.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use winrx_wsman as wsman;

/// Error types for the winrx library
pub mod error;

/// Session configuration and validation
pub mod config;

/// Kerberos ticket acquisition and cache isolation
pub mod kerberos;

/// Script batching and remote command construction
pub mod batch;

/// Remote session lifecycle and command execution
pub mod session;

/// Script execution orchestration
pub mod executor;

/// Chunked file transfer orchestration
pub mod transfer;

/// Remote temporary-artifact cleanup
pub mod cleanup;

pub use config::{AuthScheme, CommandParameter, SessionConfig, SessionConfigBuilder};
pub use error::WinrxError;
pub use executor::{ExecutionResult, ExecutionStatus, Executor, ScriptExecutor};
pub use kerberos::{KinitTicketProvider, TicketProvider};
pub use session::{RemoteSession, SessionState};
pub use transfer::{fetch_file, FileTransferDescriptor, FileTransferExecutor};
pub use wsman::OutputSink;

/// Result type alias for winrx operations
pub type Result<T> = std::result::Result<T, WinrxError>;
