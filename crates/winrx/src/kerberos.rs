//! Kerberos ticket acquisition and cache isolation
//!
//! Tickets are obtained by invoking the local `kinit` helper synchronously,
//! bounded by a wall-clock timeout. When unique-cache-file mode is on, the
//! credential cache is scoped to one execution through the `KRB5CCNAME`
//! selector so concurrent sessions on the same worker never clobber each
//! other's tickets.

use crate::{Result, SessionConfig, WinrxError};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment variable selecting the Kerberos credential cache
pub const KRB5_CACHE_ENV: &str = "KRB5CCNAME";

/// Credential cache type used for execution-scoped caches
pub const KRB5_CACHE_TYPE: &str = "FILE";

const KINIT_BINARY: &str = "kinit";
const DEFAULT_KINIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Provider of short-lived authentication tickets.
///
/// Injected into session open so tests can substitute a fake instead of
/// intercepting a process-wide helper invocation.
#[async_trait]
pub trait TicketProvider: Send + Sync {
    /// Acquire a ticket for the configured principal, scoped to the
    /// configured credential cache
    async fn acquire(&self, config: &SessionConfig) -> Result<()>;
}

/// Compute the user principal as `username@DOMAIN`.
///
/// The domain is always upper-cased; if the supplied username already
/// carries an `@` qualifier, everything after it is discarded and replaced
/// with the normalized domain.
pub fn user_principal(username: &str, domain: &str) -> String {
    let user = username.split('@').next().unwrap_or(username);
    format!("{}@{}", user, domain.to_uppercase())
}

/// Derive the execution-scoped credential cache path
pub fn unique_cache_path(execution_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("krb5cc_{}", execution_id))
}

/// Cache-selector value for the given cache file (`FILE:<path>`)
pub fn cache_selector(path: &Path) -> String {
    format!("{}:{}", KRB5_CACHE_TYPE, path.display())
}

/// Ticket provider invoking the local `kinit` helper
pub struct KinitTicketProvider {
    timeout: Duration,
}

impl KinitTicketProvider {
    /// Create a provider with the default helper timeout
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_KINIT_TIMEOUT,
        }
    }

    /// Override the helper timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for KinitTicketProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TicketProvider for KinitTicketProvider {
    async fn acquire(&self, config: &SessionConfig) -> Result<()> {
        let domain = config.domain.as_deref().ok_or_else(|| {
            WinrxError::Configuration("domain is required for Kerberos".to_string())
        })?;
        let principal = user_principal(&config.username, domain);
        debug!(principal = %principal, "acquiring Kerberos ticket");

        let mut command = Command::new(KINIT_BINARY);
        command
            .arg(&principal)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cache_path) = &config.cache_file_path {
            // A stale cache from a previous run must not be picked up
            if cache_path.exists() {
                tokio::fs::remove_file(cache_path).await?;
            }
            command.env(KRB5_CACHE_ENV, cache_selector(cache_path));
        }

        let mut child = command.spawn().map_err(|e| {
            WinrxError::Authentication(format!("failed to invoke {}: {}", KINIT_BINARY, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(config.password.expose_secret().as_bytes())
                .await?;
            stdin.write_all(b"\n").await?;
            stdin.shutdown().await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                WinrxError::Authentication(format!(
                    "ticket acquisition for {} timed out after {:?}",
                    principal, self.timeout
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(principal = %principal, "kinit failed: {}", stderr.trim());
            return Err(WinrxError::Authentication(format!(
                "ticket acquisition for {} failed: {}",
                principal,
                stderr.trim()
            )));
        }

        debug!(principal = %principal, "Kerberos ticket acquired");
        Ok(())
    }
}
