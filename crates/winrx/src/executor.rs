//! Script execution orchestration

use crate::batch::{CommandChunk, ScriptBatcher, DEFAULT_COMMAND_BUDGET};
use crate::cleanup::CleanupCoordinator;
use crate::session::RemoteSession;
use crate::{Result, WinrxError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use winrx_wsman::OutputSink;

/// Outcome of one logical operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Every command exited zero
    Success,
    /// A command failed or an error interrupted the operation
    Failure,
}

/// Aggregate result of one logical operation (script run or file push).
///
/// Output goes to the caller-supplied sinks; per-chunk detail is available
/// through logs only.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Overall status; the first non-zero exit code wins
    pub status: ExecutionStatus,
    /// Exit code of the operation (the first failing code, or zero)
    pub exit_code: i32,
    /// Underlying cause of a failure, when one exists
    pub error: Option<WinrxError>,
    /// Secondary cleanup failure; never flips the primary status
    pub cleanup_error: Option<WinrxError>,
}

impl ExecutionResult {
    /// A successful result
    pub fn success() -> Self {
        Self {
            status: ExecutionStatus::Success,
            exit_code: 0,
            error: None,
            cleanup_error: None,
        }
    }

    /// A failed result for the given exit code
    pub fn failure(exit_code: i32, error: Option<WinrxError>) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            exit_code,
            error,
            cleanup_error: None,
        }
    }

    /// Whether the operation succeeded
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Attach a secondary cleanup failure
    pub(crate) fn with_cleanup_error(mut self, error: Option<WinrxError>) -> Self {
        self.cleanup_error = error;
        self
    }
}

/// One logical unit of remote work reporting a single aggregate result
#[async_trait]
pub trait Executor: Send {
    /// Run the unit of work, streaming output to the sinks
    async fn execute(
        &mut self,
        stdout: &mut dyn OutputSink,
        stderr: &mut dyn OutputSink,
    ) -> Result<ExecutionResult>;
}

/// Executes one script on the remote host.
///
/// The batcher turns the script into wire-size-bounded chunks; the bulk
/// flag selects between one combined command sequence and one round trip
/// per chunk with its own exit-code check. The temporary script file is
/// removed on every exit path.
pub struct ScriptExecutor<'s> {
    session: &'s mut RemoteSession,
    script: String,
    batcher: ScriptBatcher,
    cancel: Option<CancellationToken>,
}

impl<'s> ScriptExecutor<'s> {
    /// Create an executor for the given script
    pub fn new(session: &'s mut RemoteSession, script: impl Into<String>) -> Self {
        let config = session.config();
        let batcher =
            ScriptBatcher::new(DEFAULT_COMMAND_BUDGET).with_no_profile(config.use_no_profile);
        Self {
            session,
            script: script.into(),
            batcher,
            cancel: None,
        }
    }

    /// Override the single-command character budget
    pub fn with_command_budget(mut self, budget: usize) -> Self {
        let no_profile = self.session.config().use_no_profile;
        self.batcher = ScriptBatcher::new(budget).with_no_profile(no_profile);
        self
    }

    /// Honor a cancellation token between chunk round trips
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Remote path of the temporary script file for this execution
    fn script_path(&self) -> String {
        let config = self.session.config();
        format!(
            "{}\\winrx-{}.ps1",
            config.working_directory, config.execution_id
        )
    }

    async fn run_chunks(
        &mut self,
        chunks: &[CommandChunk],
        exec_command: Option<&str>,
        stdout: &mut dyn OutputSink,
        stderr: &mut dyn OutputSink,
    ) -> Result<i32> {
        if self.session.config().bulk_command_list {
            return self
                .session
                .execute_command_list(chunks, stdout, stderr, exec_command, self.cancel.as_ref())
                .await;
        }

        // Per-chunk round trips: each chunk checks its own exit code and the
        // cancellation token is honored before every subsequent chunk
        let last = chunks.len().saturating_sub(1);
        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 && self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(WinrxError::Session("cancelled between chunks".to_string()));
            }
            let exec = if index == last { exec_command } else { None };
            let code = self
                .session
                .execute_command_list(std::slice::from_ref(chunk), stdout, stderr, exec, None)
                .await?;
            if code != 0 {
                return Ok(code);
            }
        }
        if chunks.is_empty() {
            if let Some(exec) = exec_command {
                return self
                    .session
                    .execute_command_list(&[], stdout, stderr, Some(exec), None)
                    .await;
            }
        }
        Ok(0)
    }
}

#[async_trait]
impl Executor for ScriptExecutor<'_> {
    async fn execute(
        &mut self,
        stdout: &mut dyn OutputSink,
        stderr: &mut dyn OutputSink,
    ) -> Result<ExecutionResult> {
        let config = self.session.config();
        let script_path = self.script_path();
        let parameters = config.parameters.clone();

        let (chunks, exec_command) = if config.disable_command_encoding {
            let chunks = self
                .batcher
                .encoded_chunks(&self.script, &script_path, &parameters);
            (chunks, None)
        } else {
            let chunks = self.batcher.plain_chunks(&self.script, &script_path);
            // An empty script produces zero chunks and no remote file, so
            // there is nothing to invoke
            let invocation = (!chunks.is_empty())
                .then(|| self.batcher.invocation_command(&script_path, &parameters));
            (chunks, invocation)
        };
        debug!(
            chunks = chunks.len(),
            bulk = config.bulk_command_list,
            encoded = config.disable_command_encoding,
            "executing script"
        );

        let outcome = self
            .run_chunks(&chunks, exec_command.as_deref(), stdout, stderr)
            .await;

        // The temporary script file is removed on every exit path; a cleanup
        // failure never masks the primary outcome
        let cleanup_error = CleanupCoordinator::new()
            .remove_remote_file(self.session, &script_path)
            .await
            .err();

        let result = match outcome {
            Ok(0) => ExecutionResult::success(),
            Ok(code) => ExecutionResult::failure(
                code,
                Some(WinrxError::CommandFailed {
                    code,
                    stderr: String::new(),
                }),
            ),
            Err(e) => return Err(e),
        };

        info!(status = ?result.status, exit_code = result.exit_code, "script finished");
        Ok(result.with_cleanup_error(cleanup_error))
    }
}
