//! Script batching and remote command construction
//!
//! Turns an arbitrary script body or file payload into wire-size-bounded
//! remote commands. Chunking is greedy and stable: the same input with the
//! same budget always produces the same boundaries, and concatenating the
//! chunk payloads in order reproduces the input exactly.

use crate::config::CommandParameter;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Remote shell binary used for script invocation
pub const POWERSHELL: &str = "Powershell";

/// Default character budget for one remote command.
///
/// The WinRM single-command limit is 8191 characters; this leaves headroom
/// for the append-command wrapper and literal escaping.
pub const DEFAULT_COMMAND_BUDGET: usize = 6000;

/// Default byte-chunk bound for file transfers
pub const DEFAULT_FILE_CHUNK_SIZE: usize = 12288;

/// One wire-size-bounded unit of remote work: an ordered list of command
/// strings executed back to back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandChunk {
    /// Commands of this chunk, in execution order
    pub commands: Vec<String>,
}

impl CommandChunk {
    /// Create a chunk from one command
    pub fn single(command: String) -> Self {
        Self {
            commands: vec![command],
        }
    }
}

/// Escape characters meaningful to the remote command interpreter.
///
/// `&` is escaped with `^` only when immediately preceded by a
/// non-whitespace character; a standalone `&` used as an operator is left
/// alone.
pub fn escape_interpreter_specials(script: &str) -> String {
    let mut escaped = String::with_capacity(script.len());
    let mut previous: Option<char> = None;
    for ch in script.chars() {
        if ch == '&' && previous.is_some_and(|p| !p.is_whitespace()) {
            escaped.push('^');
        }
        escaped.push(ch);
        previous = Some(ch);
    }
    escaped
}

/// Escape text for embedding in a PowerShell double-quoted literal
pub fn escape_powershell_literal(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '`' => escaped.push_str("``"),
            '"' => escaped.push_str("`\""),
            '$' => escaped.push_str("`$"),
            '\r' => escaped.push_str("`r"),
            '\n' => escaped.push_str("`n"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Greedily split text into chunks of at most `budget` characters.
///
/// Splits on char boundaries; an input that is an exact multiple of the
/// budget produces no empty trailing chunk.
pub fn split_by_budget(text: &str, budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        if count == budget {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split a file payload into base64 text chunks.
///
/// The byte bound is applied in whole base64 quanta (`4 * ceil(bound / 3)`
/// encoded characters per chunk), so the concatenation of all chunks is one
/// valid base64 stream the remote decode step can consume in a single pass.
pub fn split_file_payload(payload: &[u8], chunk_size: usize) -> Vec<String> {
    let encoded = BASE64.encode(payload);
    let quantum = chunk_size.max(1).div_ceil(3) * 4;
    split_by_budget(&encoded, quantum)
}

/// Append-text command growing a remote text artifact by one piece
pub fn append_text_command(path: &str, text: &str) -> String {
    format!(
        r#"[IO.File]::AppendAllText("{}", "{}", [Text.Encoding]::UTF8)"#,
        path,
        escape_powershell_literal(text)
    )
}

/// Command invoking a remote script file through the shell
pub fn script_executing_command(script_path: &str, no_profile: bool, extra_args: &[String]) -> String {
    let mut command = String::from(POWERSHELL);
    if no_profile {
        command.push_str(" -NoProfile");
    }
    command.push_str(&format!(" -f \"{}\"", script_path));
    for arg in extra_args {
        command.push(' ');
        command.push_str(arg);
    }
    command
}

/// Invoke-Command wrapper carrying per-invocation parameters verbatim, in
/// the order supplied
pub fn invoke_command_wrapper(
    payload: &str,
    no_profile: bool,
    parameters: &[CommandParameter],
) -> String {
    let mut command = String::from(POWERSHELL);
    if no_profile {
        command.push_str(" -NoProfile");
    }
    command.push_str(" Invoke-Command");
    for parameter in parameters {
        command.push_str(&format!(" -{} {}", parameter.name, parameter.value));
    }
    command.push_str(&format!(" -command {{{}}}", payload));
    command
}

/// Command decoding a base64 literal and writing it to a remote file
pub fn decode_write_command(encoded: &str, path: &str) -> String {
    format!(
        r#"$ds = [System.Text.Encoding]::UTF8.GetString([System.Convert]::FromBase64String("{}")); [IO.File]::WriteAllText("{}", $ds, [Text.Encoding]::UTF8)"#,
        encoded, path
    )
}

/// Command decoding an accumulated base64 staging file into the destination
pub fn materialize_command(staging_path: &str, destination_path: &str) -> String {
    format!(
        r#"$fc = [IO.File]::ReadAllText("{}"); [IO.File]::WriteAllBytes("{}", [Convert]::FromBase64String($fc))"#,
        staging_path, destination_path
    )
}

/// Command removing a remote file, tolerant of the file not existing
pub fn delete_file_command(path: &str) -> String {
    format!(r#"Remove-Item -Force -ErrorAction SilentlyContinue "{}""#, path)
}

/// Command printing a remote file as one base64 literal on stdout
pub fn read_base64_command(path: &str) -> String {
    format!(
        r#"[Convert]::ToBase64String([IO.File]::ReadAllBytes("{}"))"#,
        path
    )
}

/// Batches one script into wire-size-bounded command chunks
#[derive(Debug, Clone)]
pub struct ScriptBatcher {
    command_budget: usize,
    no_profile: bool,
}

impl ScriptBatcher {
    /// Create a batcher with the given single-command character budget
    pub fn new(command_budget: usize) -> Self {
        Self {
            command_budget,
            no_profile: false,
        }
    }

    /// Invoke the remote interpreter with -NoProfile
    pub fn with_no_profile(mut self, no_profile: bool) -> Self {
        self.no_profile = no_profile;
        self
    }

    /// Payload characters available to one append command, assuming the
    /// worst-case two-fold expansion of literal escaping
    fn payload_budget(&self, script_path: &str) -> usize {
        let overhead = append_text_command(script_path, "").len();
        self.command_budget.saturating_sub(overhead).max(2) / 2
    }

    /// Default mode: escape the script, then write it to the remote script
    /// file through sized append commands. The invocation command is
    /// produced separately by [`ScriptBatcher::invocation_command`] and runs
    /// once, after the last chunk.
    pub fn plain_chunks(&self, script: &str, script_path: &str) -> Vec<CommandChunk> {
        let escaped = escape_interpreter_specials(script);
        split_by_budget(&escaped, self.payload_budget(script_path))
            .into_iter()
            .map(|piece| CommandChunk::single(append_text_command(script_path, &piece)))
            .collect()
    }

    /// Command that executes the assembled remote script file
    pub fn invocation_command(
        &self,
        script_path: &str,
        parameters: &[CommandParameter],
    ) -> String {
        let invoke = script_executing_command(script_path, self.no_profile, &[]);
        if parameters.is_empty() {
            invoke
        } else {
            invoke_command_wrapper(&invoke, self.no_profile, parameters)
        }
    }

    /// Disable-encoding mode: wrap the whole payload as one base64 literal
    /// and produce the decode-and-write plus invoke commands. The matching
    /// removal runs through the cleanup step so it is issued even when the
    /// invocation fails.
    pub fn encoded_chunks(
        &self,
        script: &str,
        script_path: &str,
        parameters: &[CommandParameter],
    ) -> Vec<CommandChunk> {
        let encoded = BASE64.encode(script.as_bytes());
        let commands = vec![
            decode_write_command(&encoded, script_path),
            self.invocation_command(script_path, parameters),
        ];
        vec![CommandChunk { commands }]
    }

    /// Cleanup command removing the temporary script file
    pub fn cleanup_command(&self, script_path: &str) -> String {
        delete_file_command(script_path)
    }
}

impl Default for ScriptBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_BUDGET)
    }
}
