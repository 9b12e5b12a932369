//! Chunked file transfer orchestration
//!
//! File content travels as base64 text: append commands grow a remote
//! staging file one encoded chunk at a time, in strictly ascending order,
//! and a single materialize command decodes the staging file into the final
//! destination. The decode step is the only point where the destination
//! file comes into existence, so a partial chunk failure can only ever
//! corrupt the staging artifact, which is removed afterwards anyway.

use crate::batch::{self, DEFAULT_FILE_CHUNK_SIZE};
use crate::cleanup::CleanupCoordinator;
use crate::executor::{ExecutionResult, Executor};
use crate::session::RemoteSession;
use crate::{Result, WinrxError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use winrx_wsman::{OutputSink, TransportError};

/// Describes one file push: source bytes, remote destination, chunk bound
#[derive(Debug, Clone)]
pub struct FileTransferDescriptor {
    /// File content to push
    pub content: Bytes,
    /// Remote destination directory
    pub destination_directory: String,
    /// Destination filename
    pub filename: String,
    /// Byte-chunk size bound for one append command
    pub chunk_size: usize,
}

impl FileTransferDescriptor {
    /// Create a descriptor with the default chunk bound
    pub fn new(
        content: impl Into<Bytes>,
        destination_directory: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            destination_directory: destination_directory.into(),
            filename: filename.into(),
            chunk_size: DEFAULT_FILE_CHUNK_SIZE,
        }
    }

    /// Override the byte-chunk size bound
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Final path of the pushed file
    pub fn destination_path(&self) -> String {
        format!("{}\\{}", self.destination_directory, self.filename)
    }

    /// Path of the remote staging artifact accumulating encoded chunks
    pub fn staging_path(&self) -> String {
        format!("{}.winrx.staging.b64", self.destination_path())
    }
}

/// Pushes one file to the remote host
pub struct FileTransferExecutor<'s> {
    session: &'s mut RemoteSession,
    descriptor: FileTransferDescriptor,
    cancel: Option<CancellationToken>,
}

impl<'s> FileTransferExecutor<'s> {
    /// Create an executor for the given descriptor
    pub fn new(session: &'s mut RemoteSession, descriptor: FileTransferDescriptor) -> Self {
        Self {
            session,
            descriptor,
            cancel: None,
        }
    }

    /// Legacy entry point taking explicit content and destination
    /// parameters; converges on the descriptor path
    pub fn from_parts(
        session: &'s mut RemoteSession,
        content: &[u8],
        destination_directory: impl Into<String>,
        filename: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        let descriptor =
            FileTransferDescriptor::new(Bytes::copy_from_slice(content), destination_directory, filename)
                .with_chunk_size(chunk_size);
        Self::new(session, descriptor)
    }

    /// Honor a cancellation token between append round trips
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[async_trait]
impl Executor for FileTransferExecutor<'_> {
    async fn execute(
        &mut self,
        stdout: &mut dyn OutputSink,
        stderr: &mut dyn OutputSink,
    ) -> Result<ExecutionResult> {
        let staging = self.descriptor.staging_path();
        let destination = self.descriptor.destination_path();

        let mut encoded_chunks =
            batch::split_file_payload(&self.descriptor.content, self.descriptor.chunk_size);
        // An empty payload still creates the staging file so the decode step
        // can produce an empty destination file
        if encoded_chunks.is_empty() {
            encoded_chunks.push(String::new());
        }
        debug!(
            destination = %destination,
            bytes = self.descriptor.content.len(),
            chunks = encoded_chunks.len(),
            "transferring file"
        );

        let mut outcome: Result<i32> = Ok(0);
        for (index, encoded) in encoded_chunks.iter().enumerate() {
            if index > 0 && self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                outcome = Err(WinrxError::Session("cancelled between chunks".to_string()));
                break;
            }
            let append = batch::append_text_command(&staging, encoded);
            match self
                .session
                .execute_command_string(&append, stdout, stderr, true)
                .await
            {
                Ok(0) => {}
                other => {
                    // A failed append means the staged content is incomplete;
                    // the materialize step must not run
                    outcome = other;
                    break;
                }
            }
        }

        if matches!(outcome, Ok(0)) {
            let materialize = batch::materialize_command(&staging, &destination);
            outcome = self
                .session
                .execute_command_string(&materialize, stdout, stderr, true)
                .await;
        }

        // The staging artifact is removed on every exit path
        let cleanup_error = CleanupCoordinator::new()
            .remove_remote_file(self.session, &staging)
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

        info!(destination = %destination, status = ?result.status, "file transfer finished");
        Ok(result.with_cleanup_error(cleanup_error))
    }
}

/// Fetch a remote file's content.
///
/// The remote side prints the file as a single base64 literal; the decoded
/// bytes are returned directly instead of going through the caller sinks.
pub async fn fetch_file(session: &mut RemoteSession, remote_path: &str) -> Result<Bytes> {
    let command = batch::read_base64_command(remote_path);
    let mut stdout = String::new();
    let mut stderr = String::new();

    let code = session
        .execute_command_string(&command, &mut stdout, &mut stderr, true)
        .await?;
    if code != 0 {
        return Err(WinrxError::CommandFailed {
            code,
            stderr: stderr.trim().to_string(),
        });
    }

    let decoded = BASE64.decode(stdout.trim()).map_err(|e| {
        WinrxError::Transport(TransportError::Protocol(format!(
            "fetched content of {} is not valid base64: {}",
            remote_path, e
        )))
    })?;
    debug!(remote_path = %remote_path, bytes = decoded.len(), "file fetched");
    Ok(Bytes::from(decoded))
}
