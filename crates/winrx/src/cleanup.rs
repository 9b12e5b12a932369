//! Remote temporary-artifact cleanup

use crate::batch;
use crate::session::RemoteSession;
use crate::{Result, WinrxError};
use tracing::warn;

/// Removes remote temporary files after a logical operation.
///
/// Runs once per operation, on every exit path, over the same session that
/// created the artifacts. The removal command tolerates a file that was
/// never created (an empty script produces zero chunks and no file).
/// Failures are logged and reported as a secondary cleanup error; the
/// caller must never let them overwrite the primary result.
pub struct CleanupCoordinator;

impl CleanupCoordinator {
    /// Create a coordinator
    pub fn new() -> Self {
        Self
    }

    /// Remove one remote file, tolerant of it not existing
    pub async fn remove_remote_file(&self, session: &mut RemoteSession, path: &str) -> Result<()> {
        let command = batch::delete_file_command(path);
        let mut stdout = String::new();
        let mut stderr = String::new();

        match session
            .execute_command_string(&command, &mut stdout, &mut stderr, false)
            .await
        {
            Ok(0) => Ok(()),
            Ok(code) => {
                warn!(path = %path, exit_code = code, stderr = %stderr.trim(),
                    "removal of remote temporary file failed");
                Err(WinrxError::Cleanup(format!(
                    "removal of {} exited with {}",
                    path, code
                )))
            }
            Err(e) => {
                warn!(path = %path, error = %e, "removal of remote temporary file failed");
                Err(WinrxError::Cleanup(format!(
                    "removal of {} failed: {}",
                    path, e
                )))
            }
        }
    }
}

impl Default for CleanupCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
