//! Shell transport abstraction and configuration

use crate::TransportError;
use async_trait::async_trait;
use secrecy::{Secret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default WinRM HTTP port
pub const DEFAULT_WSMAN_PORT: u16 = 5985;

/// Default WinRM HTTPS port
pub const DEFAULT_WSMAN_TLS_PORT: u16 = 5986;

/// Authentication scheme for the WS-Man HTTP exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthScheme {
    /// Basic authentication (plaintext credentials, HTTPS strongly advised)
    Basic,
    /// NTLM challenge-response authentication
    Ntlm,
    /// Kerberos ticket-based authentication
    Kerberos,
    /// CredSSP delegated authentication
    CredSsp,
}

/// Credential material for the WS-Man HTTP exchange
#[derive(Debug, Clone)]
pub struct WsmanAuth {
    /// Scheme used to authenticate the HTTP requests
    pub scheme: AuthScheme,
    /// Account name (without domain qualifier)
    pub username: String,
    /// Account domain, where the scheme uses one
    pub domain: Option<String>,
    /// Password or token
    pub password: SecretString,
}

/// WS-Man endpoint configuration
#[derive(Debug, Clone)]
pub struct WsmanConfig {
    /// Remote hostname or IP
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Use HTTPS instead of HTTP
    pub use_tls: bool,
    /// Accept invalid/self-signed certificates
    pub skip_cert_validation: bool,
    /// Authentication material
    pub auth: WsmanAuth,
    /// Optional HTTP(S) proxy URL
    pub proxy: Option<String>,
    /// Per-request wall-clock timeout
    pub request_timeout: Duration,
    /// Operation timeout advertised to the endpoint (ISO-8601 duration)
    pub operation_timeout_secs: u64,
    /// Maximum SOAP envelope size accepted from the endpoint
    pub max_envelope_size: u32,
    /// Console code page requested for the shell
    pub codepage: u32,
}

impl Default for WsmanConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_WSMAN_PORT,
            use_tls: false,
            skip_cert_validation: false,
            auth: WsmanAuth {
                scheme: AuthScheme::Basic,
                username: String::new(),
                domain: None,
                password: Secret::new(String::new()),
            },
            proxy: None,
            request_timeout: Duration::from_secs(60),
            operation_timeout_secs: 60,
            max_envelope_size: 153600,
            codepage: 65001, // UTF-8
        }
    }
}

impl WsmanConfig {
    /// Get the WS-Man endpoint URL
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}/wsman", scheme, self.host, self.port)
    }
}

/// Options applied when the remote shell is created
#[derive(Debug, Clone, Default)]
pub struct ShellOptions {
    /// Working directory for the shell
    pub working_directory: Option<String>,
    /// Environment variables set on the shell
    pub environment: HashMap<String, String>,
    /// Skip loading the interpreter profile
    pub no_profile: bool,
    /// Shell idle timeout in seconds, if any
    pub idle_timeout_secs: Option<u64>,
}

/// Opaque identifier of an open remote shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellId(String);

impl ShellId {
    /// Wrap an endpoint-assigned shell identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental receiver for one remote output stream.
///
/// Transports push decoded output here as it arrives; implementations must
/// not assume they see the whole stream in one call.
pub trait OutputSink: Send {
    /// Append a decoded piece of stream output
    fn append(&mut self, text: &str);
}

impl OutputSink for String {
    fn append(&mut self, text: &str) {
        self.push_str(text);
    }
}

impl OutputSink for Vec<String> {
    fn append(&mut self, text: &str) {
        self.push(text.to_string());
    }
}

/// Transport abstraction over the WS-Man shell primitives.
///
/// A transport owns the HTTP/SOAP plumbing; callers own the shell lifecycle:
/// create exactly one shell, run commands against it one at a time, close it.
#[async_trait]
pub trait ShellTransport: Send {
    /// Create a remote shell and return its identifier
    async fn create_shell(&mut self, options: &ShellOptions) -> Result<ShellId, TransportError>;

    /// Run a single command in the shell, streaming decoded output to the
    /// sinks as it arrives, and return the remote exit code
    async fn run_command(
        &mut self,
        shell: &ShellId,
        command: &str,
        stdout: &mut dyn OutputSink,
        stderr: &mut dyn OutputSink,
    ) -> Result<i32, TransportError>;

    /// Close the shell, releasing its remote resources
    async fn close_shell(&mut self, shell: &ShellId) -> Result<(), TransportError>;
}
