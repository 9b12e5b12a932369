//! Shared test doubles for integration tests

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use winrx::wsman::{OutputSink, ShellId, ShellOptions, ShellTransport, TransportError};
use winrx::{Result, SessionConfig, TicketProvider};

/// Transport double recording every command and shell operation.
///
/// Exit codes are scripted per command substring; unmatched commands exit
/// zero.
pub struct RecordingTransport {
    pub commands: Arc<Mutex<Vec<String>>>,
    pub created_options: Arc<Mutex<Vec<ShellOptions>>>,
    pub closed_shells: Arc<Mutex<Vec<String>>>,
    failures: Vec<(String, i32)>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            created_options: Arc::new(Mutex::new(Vec::new())),
            closed_shells: Arc::new(Mutex::new(Vec::new())),
            failures: Vec::new(),
        }
    }

    /// Commands containing `needle` exit with `code`
    pub fn failing_on(mut self, needle: impl Into<String>, code: i32) -> Self {
        self.failures.push((needle.into(), code));
        self
    }
}

#[async_trait]
impl ShellTransport for RecordingTransport {
    async fn create_shell(
        &mut self,
        options: &ShellOptions,
    ) -> std::result::Result<ShellId, TransportError> {
        self.created_options.lock().unwrap().push(options.clone());
        Ok(ShellId::new("itest-shell"))
    }

    async fn run_command(
        &mut self,
        _shell: &ShellId,
        command: &str,
        stdout: &mut dyn OutputSink,
        stderr: &mut dyn OutputSink,
    ) -> std::result::Result<i32, TransportError> {
        self.commands.lock().unwrap().push(command.to_string());
        for (needle, code) in &self.failures {
            if command.contains(needle.as_str()) {
                stderr.append("scripted failure\n");
                return Ok(*code);
            }
        }
        if command.contains("ToBase64String") {
            // Canned remote file content for fetch tests
            stdout.append("ZmV0Y2hlZA==\n");
        } else {
            stdout.append("ok\n");
        }
        Ok(0)
    }

    async fn close_shell(&mut self, shell: &ShellId) -> std::result::Result<(), TransportError> {
        self.closed_shells.lock().unwrap().push(shell.to_string());
        Ok(())
    }
}

/// Ticket provider double that materializes the cache file without spawning
/// a helper process
pub struct FakeTicketProvider {
    pub acquired: Arc<Mutex<Vec<String>>>,
}

impl FakeTicketProvider {
    pub fn new() -> Self {
        Self {
            acquired: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl TicketProvider for FakeTicketProvider {
    async fn acquire(&self, config: &SessionConfig) -> Result<()> {
        self.acquired
            .lock()
            .unwrap()
            .push(config.execution_id.clone());
        if let Some(path) = &config.cache_file_path {
            std::fs::write(path, b"ticket")?;
        }
        Ok(())
    }
}
