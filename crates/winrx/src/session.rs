//! Remote session lifecycle and command execution

use crate::batch::CommandChunk;
use crate::kerberos::{self, TicketProvider};
use crate::{AuthScheme, Result, SessionConfig, WinrxError};
use std::path::PathBuf;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use winrx_wsman::{OutputSink, ShellId, ShellOptions, ShellTransport, TransportError, WsmanClient};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but never opened; no remote resources exist
    Unopened,
    /// Shell is open and accepting commands
    Open,
    /// Shell and transport released; the session cannot be reused
    Closed,
}

/// A session owning one transport connection and one remote shell.
///
/// One session serves one logical execution on one task; it is not designed
/// for concurrent use. The only valid lifecycle is
/// `Unopened -> Open -> Closed`; executing commands in any state but `Open`
/// is a programming error, not a retryable failure.
pub struct RemoteSession {
    config: SessionConfig,
    transport: Box<dyn ShellTransport>,
    shell: Option<ShellId>,
    state: SessionState,
    cache_file: Option<PathBuf>,
}

impl RemoteSession {
    /// Create an unopened session over the given transport
    pub fn new(config: SessionConfig, transport: Box<dyn ShellTransport>) -> Self {
        Self {
            config,
            transport,
            shell: None,
            state: SessionState::Unopened,
            cache_file: None,
        }
    }

    /// Create and open a session with the default transport and ticket
    /// provider
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let transport = Box::new(WsmanClient::new(config.wsman_config())?);
        let mut session = Self::new(config, transport);
        session
            .open(&kerberos::KinitTicketProvider::new(), None)
            .await?;
        Ok(session)
    }

    /// Open the session.
    ///
    /// For Kerberos, a bounded reachability probe runs first and the ticket
    /// provider is invoked before the transport handshake, so an unreachable
    /// host never costs a ticket-acquisition round trip. The cancellation
    /// token, when supplied, is honored before any network or process
    /// activity.
    pub async fn open(
        &mut self,
        ticket_provider: &dyn TicketProvider,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        if self.state != SessionState::Unopened {
            return Err(WinrxError::Session(format!(
                "cannot open a session in state {:?}",
                self.state
            )));
        }
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(WinrxError::Session("cancelled before open".to_string()));
        }

        info!(host = %self.config.hostname, execution_id = %self.config.execution_id,
            "opening session");

        if self.config.auth_scheme == AuthScheme::Kerberos {
            probe_reachability(&self.config).await?;
            ticket_provider.acquire(&self.config).await?;
            self.cache_file = self.config.cache_file_path.clone();
        }

        let options = shell_options(&self.config);
        let shell = self
            .transport
            .create_shell(&options)
            .await
            .map_err(|e| match e {
                TransportError::Authentication(message) => WinrxError::Authentication(message),
                other => WinrxError::Transport(other),
            })?;

        info!(host = %self.config.hostname, shell_id = %shell, "session open");
        self.shell = Some(shell);
        self.state = SessionState::Open;
        Ok(())
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn open_shell(&self) -> Result<ShellId> {
        match self.state {
            SessionState::Open => self
                .shell
                .clone()
                .ok_or_else(|| WinrxError::Session("open session has no shell".to_string())),
            other => Err(WinrxError::Session(format!(
                "cannot execute commands on a session in state {:?}",
                other
            ))),
        }
    }

    /// Run a single command synchronously against the open shell, streaming
    /// output to the sinks, and return the remote exit code.
    ///
    /// `is_script` suppresses command-text logging, since script payloads
    /// may embed secrets.
    pub async fn execute_command_string(
        &mut self,
        command: &str,
        stdout: &mut dyn OutputSink,
        stderr: &mut dyn OutputSink,
        is_script: bool,
    ) -> Result<i32> {
        let shell = self.open_shell()?;
        if is_script {
            debug!(shell_id = %shell, length = command.len(), "executing script command");
        } else {
            debug!(shell_id = %shell, command = %command, "executing command");
        }
        let code = self
            .transport
            .run_command(&shell, command, stdout, stderr)
            .await?;
        debug!(shell_id = %shell, exit_code = code, "command finished");
        Ok(code)
    }

    /// Run an ordered list of chunks, stopping at the first non-zero exit
    /// code.
    ///
    /// When `script_exec_command` is supplied, it is appended as the final
    /// command of the last chunk, so the assembled remote script runs once,
    /// after all chunks have been appended. The cancellation token is
    /// honored between chunks; an in-flight command is never interrupted.
    pub async fn execute_command_list(
        &mut self,
        chunks: &[CommandChunk],
        stdout: &mut dyn OutputSink,
        stderr: &mut dyn OutputSink,
        script_exec_command: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<i32> {
        self.open_shell()?;
        let exec_command = script_exec_command.filter(|c| !c.is_empty());

        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 && cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(WinrxError::Session("cancelled between chunks".to_string()));
            }
            for command in &chunk.commands {
                let code = self
                    .execute_command_string(command, stdout, stderr, true)
                    .await?;
                if code != 0 {
                    debug!(chunk = index, exit_code = code, "chunk failed, stopping");
                    return Ok(code);
                }
            }
        }

        // The invocation runs once, after the last chunk; an empty script
        // (zero chunks) still gets its invocation
        if let Some(exec) = exec_command {
            return self.execute_command_string(exec, stdout, stderr, false).await;
        }
        Ok(0)
    }

    /// Close the session, releasing the shell, the transport and the
    /// execution-scoped credential cache.
    ///
    /// Safe to call more than once; close-time failures are logged, never
    /// returned.
    pub async fn close(&mut self) {
        if self.state == SessionState::Open {
            if let Some(shell) = self.shell.take() {
                if let Err(e) = self.transport.close_shell(&shell).await {
                    warn!(shell_id = %shell, error = %e, "failed to close remote shell");
                }
            }
        }
        self.delete_cache_file();
        self.state = SessionState::Closed;
        debug!(host = %self.config.hostname, "session closed");
    }

    /// Remove the execution-scoped cache file, at most once
    fn delete_cache_file(&mut self) {
        if let Some(path) = self.cache_file.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e,
                        "failed to delete credential cache");
                }
            }
        }
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        // Backstop for sessions dropped without close(); the shell itself
        // expires through the endpoint's idle timeout
        self.delete_cache_file();
    }
}

/// Shell creation options derived from the session configuration; the
/// Kerberos cache selector is merged into the environment map
fn shell_options(config: &SessionConfig) -> ShellOptions {
    let mut environment = config.environment.clone();
    if let Some(path) = &config.cache_file_path {
        environment.insert(
            kerberos::KRB5_CACHE_ENV.to_string(),
            kerberos::cache_selector(path),
        );
    }
    ShellOptions {
        working_directory: Some(config.working_directory.clone()),
        environment,
        no_profile: config.use_no_profile,
        idle_timeout_secs: None,
    }
}

/// Bounded TCP reachability probe, run before ticket acquisition
async fn probe_reachability(config: &SessionConfig) -> Result<()> {
    let address = (config.hostname.as_str(), config.port);
    match tokio::time::timeout(config.connect_timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(WinrxError::Connectivity(format!(
            "{}:{} is not reachable: {}",
            config.hostname, config.port, e
        ))),
        Err(_) => Err(WinrxError::Connectivity(format!(
            "{}:{} did not answer within {:?}",
            config.hostname, config.port, config.connect_timeout
        ))),
    }
}
