//! SOAP envelope construction and response extraction
//!
//! WS-Man envelopes are assembled from templates and responses are read with
//! targeted string scans; the handful of elements this layer cares about
//! (shell id, command id, stream blocks, exit code, command state) does not
//! justify a full XML stack.

use crate::{ShellOptions, TransportError};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use uuid::Uuid;

const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
const WSA_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const SHELL_NS: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";

const SHELL_RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
const ANONYMOUS_ADDRESS: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";

/// Escape text for embedding in an XML element or attribute
pub fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Which output stream a receive block belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// One decoded output block from a Receive response, in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBlock {
    /// Stream the block belongs to
    pub kind: StreamKind,
    /// Decoded text content
    pub text: String,
}

/// Parsed content of one Receive response
#[derive(Debug, Clone, Default)]
pub struct ReceiveOutput {
    /// Output blocks in the order they appear in the response
    pub blocks: Vec<StreamBlock>,
    /// Exit code, present once the command has finished
    pub exit_code: Option<i32>,
    /// Whether the command reached the Done state
    pub done: bool,
}

/// Builds WS-Man SOAP envelopes for one endpoint
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    endpoint: String,
    max_envelope_size: u32,
    operation_timeout: String,
    codepage: u32,
}

impl EnvelopeBuilder {
    /// Create a builder for the given endpoint
    pub fn new(endpoint: impl Into<String>, max_envelope_size: u32, timeout_secs: u64, codepage: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_envelope_size,
            operation_timeout: format!("PT{}S", timeout_secs),
            codepage,
        }
    }

    fn header(&self, action: &str, selectors: &str, options: &str) -> String {
        format!(
            r#"<s:Header>
    <a:To>{to}</a:To>
    <w:ResourceURI s:mustUnderstand="true">{resource}</w:ResourceURI>
    <a:ReplyTo>
      <a:Address s:mustUnderstand="true">{anonymous}</a:Address>
    </a:ReplyTo>
    <a:Action s:mustUnderstand="true">{action}</a:Action>
    <a:MessageID>uuid:{message_id}</a:MessageID>
    <w:MaxEnvelopeSize s:mustUnderstand="true">{max_size}</w:MaxEnvelopeSize>
    <w:OperationTimeout>{timeout}</w:OperationTimeout>{selectors}{options}
  </s:Header>"#,
            to = self.endpoint,
            resource = SHELL_RESOURCE_URI,
            anonymous = ANONYMOUS_ADDRESS,
            action = action,
            message_id = Uuid::new_v4(),
            max_size = self.max_envelope_size,
            timeout = self.operation_timeout,
            selectors = selectors,
            options = options,
        )
    }

    fn wrap(&self, header: String, body: String) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:a="{WSA_NS}" xmlns:w="{WSMAN_NS}" xmlns:rsp="{SHELL_NS}">
  {header}
  <s:Body>{body}</s:Body>
</s:Envelope>"#,
        )
    }

    fn shell_selector(shell_id: &str) -> String {
        format!(
            r#"
    <w:SelectorSet>
      <w:Selector Name="ShellId">{}</w:Selector>
    </w:SelectorSet>"#,
            xml_escape(shell_id)
        )
    }

    /// Envelope creating a remote shell with the given options
    pub fn create_shell(&self, options: &ShellOptions) -> String {
        let no_profile = if options.no_profile { "TRUE" } else { "FALSE" };
        let option_set = format!(
            r#"
    <w:OptionSet xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
      <w:Option Name="WINRS_NOPROFILE">{}</w:Option>
      <w:Option Name="WINRS_CODEPAGE">{}</w:Option>
    </w:OptionSet>"#,
            no_profile, self.codepage
        );

        let mut shell = String::new();
        shell.push_str("\n    <rsp:Shell>");
        if !options.environment.is_empty() {
            // Deterministic variable order keeps envelopes reproducible
            let mut vars: Vec<_> = options.environment.iter().collect();
            vars.sort_by(|a, b| a.0.cmp(b.0));
            shell.push_str("\n      <rsp:Environment>");
            for (name, value) in vars {
                shell.push_str(&format!(
                    r#"<rsp:Variable Name="{}">{}</rsp:Variable>"#,
                    xml_escape(name),
                    xml_escape(value)
                ));
            }
            shell.push_str("</rsp:Environment>");
        }
        if let Some(dir) = &options.working_directory {
            shell.push_str(&format!(
                "\n      <rsp:WorkingDirectory>{}</rsp:WorkingDirectory>",
                xml_escape(dir)
            ));
        }
        if let Some(idle) = options.idle_timeout_secs {
            shell.push_str(&format!(
                "\n      <rsp:IdleTimeOut>PT{}S</rsp:IdleTimeOut>",
                idle
            ));
        }
        shell.push_str("\n      <rsp:InputStreams>stdin</rsp:InputStreams>");
        shell.push_str("\n      <rsp:OutputStreams>stdout stderr</rsp:OutputStreams>");
        shell.push_str("\n    </rsp:Shell>\n  ");

        self.wrap(self.header(ACTION_CREATE, "", &option_set), shell)
    }

    /// Envelope starting a command in the shell
    pub fn command(&self, shell_id: &str, command: &str) -> String {
        let body = format!(
            r#"
    <rsp:CommandLine>
      <rsp:Command>{}</rsp:Command>
    </rsp:CommandLine>
  "#,
            xml_escape(command)
        );
        self.wrap(
            self.header(ACTION_COMMAND, &Self::shell_selector(shell_id), ""),
            body,
        )
    }

    /// Envelope requesting pending output for a command
    pub fn receive(&self, shell_id: &str, command_id: &str) -> String {
        let body = format!(
            r#"
    <rsp:Receive>
      <rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream>
    </rsp:Receive>
  "#,
            xml_escape(command_id)
        );
        self.wrap(
            self.header(ACTION_RECEIVE, &Self::shell_selector(shell_id), ""),
            body,
        )
    }

    /// Envelope acknowledging command completion
    pub fn signal_terminate(&self, shell_id: &str, command_id: &str) -> String {
        let body = format!(
            r#"
    <rsp:Signal CommandId="{}">
      <rsp:Code>{}</rsp:Code>
    </rsp:Signal>
  "#,
            xml_escape(command_id),
            SIGNAL_TERMINATE
        );
        self.wrap(
            self.header(ACTION_SIGNAL, &Self::shell_selector(shell_id), ""),
            body,
        )
    }

    /// Envelope deleting the shell
    pub fn delete_shell(&self, shell_id: &str) -> String {
        self.wrap(
            self.header(ACTION_DELETE, &Self::shell_selector(shell_id), ""),
            String::new(),
        )
    }
}

fn extract_element(response: &str, open_needle: &str, close: &str) -> Option<String> {
    let start = response.find(open_needle)? + open_needle.len();
    let end = response[start..].find(close)?;
    Some(response[start..start + end].to_string())
}

/// Extract the shell id from a Create response
pub fn extract_shell_id(response: &str) -> Result<String, TransportError> {
    if let Some(id) = extract_element(response, "<rsp:ShellId>", "</rsp:ShellId>") {
        return Ok(id);
    }
    // Some stacks only return the id through the selector set
    if let Some(id) = extract_element(response, "ShellId\">", "</") {
        return Ok(id);
    }
    Err(TransportError::Protocol(
        "no shell id in create response".to_string(),
    ))
}

/// Extract the command id from a Command response
pub fn extract_command_id(response: &str) -> Result<String, TransportError> {
    extract_element(response, "<rsp:CommandId>", "</rsp:CommandId>").ok_or_else(|| {
        TransportError::Protocol("no command id in command response".to_string())
    })
}

/// Parse a Receive response into decoded stream blocks, exit code and state.
///
/// Blocks are returned in document order so interleaved stdout/stderr output
/// can be forwarded to the sinks in the order the remote shell produced it.
pub fn parse_receive(response: &str) -> Result<ReceiveOutput, TransportError> {
    let mut output = ReceiveOutput {
        done: response.contains("CommandState/Done") || response.contains("State=\"Done\""),
        ..Default::default()
    };

    let mut pos = 0;
    while let Some(found) = response[pos..].find("<rsp:Stream Name=\"") {
        let name_start = pos + found + "<rsp:Stream Name=\"".len();
        let Some(name_len) = response[name_start..].find('"') else {
            break;
        };
        let kind = match &response[name_start..name_start + name_len] {
            "stdout" => StreamKind::Stdout,
            "stderr" => StreamKind::Stderr,
            _ => {
                pos = name_start + name_len;
                continue;
            }
        };
        let Some(tag_end) = response[name_start..].find('>') else {
            break;
        };
        let content_start = name_start + tag_end + 1;
        // Self-closing stream elements carry no content
        if response[name_start..name_start + tag_end].ends_with('/') {
            pos = content_start;
            continue;
        }
        let Some(content_len) = response[content_start..].find("</rsp:Stream>") else {
            break;
        };
        let content = response[content_start..content_start + content_len].trim();
        if !content.is_empty() {
            let decoded = BASE64.decode(content).map_err(|e| {
                TransportError::Protocol(format!("invalid stream encoding: {}", e))
            })?;
            output.blocks.push(StreamBlock {
                kind,
                text: String::from_utf8_lossy(&decoded).into_owned(),
            });
        }
        pos = content_start + content_len;
    }

    if let Some(code) = extract_element(response, "<rsp:ExitCode>", "</rsp:ExitCode>") {
        output.exit_code = code
            .trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|e| TransportError::Protocol(format!("invalid exit code: {}", e)))?;
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::new("http://host:5985/wsman", 153600, 60, 65001)
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape(r#"a<b>&"c'"#), "a&lt;b&gt;&amp;&quot;c&apos;");
        assert_eq!(xml_escape("plain"), "plain");
    }

    #[test]
    fn test_create_shell_envelope_options() {
        let mut env = HashMap::new();
        env.insert("KRB5CCNAME".to_string(), "FILE:/tmp/krb5cc_x".to_string());
        let options = ShellOptions {
            working_directory: Some("C:\\work".to_string()),
            environment: env,
            no_profile: true,
            idle_timeout_secs: Some(180),
        };
        let envelope = builder().create_shell(&options);

        assert!(envelope.contains(r#"<w:Option Name="WINRS_NOPROFILE">TRUE</w:Option>"#));
        assert!(envelope.contains(r#"<w:Option Name="WINRS_CODEPAGE">65001</w:Option>"#));
        assert!(envelope
            .contains(r#"<rsp:Variable Name="KRB5CCNAME">FILE:/tmp/krb5cc_x</rsp:Variable>"#));
        assert!(envelope.contains("<rsp:WorkingDirectory>C:\\work</rsp:WorkingDirectory>"));
        assert!(envelope.contains("<rsp:IdleTimeOut>PT180S</rsp:IdleTimeOut>"));
        assert!(envelope.contains(ACTION_CREATE));
    }

    #[test]
    fn test_command_envelope_escapes_payload() {
        let envelope = builder().command("shell-1", r#"echo "a & b""#);
        assert!(envelope.contains("echo &quot;a &amp; b&quot;"));
        assert!(envelope.contains(r#"<w:Selector Name="ShellId">shell-1</w:Selector>"#));
    }

    #[test]
    fn test_extract_shell_id() {
        let response = "<x><rsp:ShellId>ABC-123</rsp:ShellId></x>";
        assert_eq!(extract_shell_id(response).unwrap(), "ABC-123");

        let selector_only = r#"<w:Selector Name="ShellId">DEF-456</w:Selector>"#;
        assert_eq!(extract_shell_id(selector_only).unwrap(), "DEF-456");

        assert!(extract_shell_id("<x/>").is_err());
    }

    #[test]
    fn test_extract_command_id() {
        let response = "<rsp:CommandId>CMD-9</rsp:CommandId>";
        assert_eq!(extract_command_id(response).unwrap(), "CMD-9");
        assert!(extract_command_id("<x/>").is_err());
    }

    #[test]
    fn test_parse_receive_interleaved_streams() {
        let out1 = BASE64.encode("hello ");
        let err1 = BASE64.encode("warn\n");
        let out2 = BASE64.encode("world");
        let response = format!(
            r#"<rsp:ReceiveResponse>
              <rsp:Stream Name="stdout" CommandId="c">{out1}</rsp:Stream>
              <rsp:Stream Name="stderr" CommandId="c">{err1}</rsp:Stream>
              <rsp:Stream Name="stdout" CommandId="c">{out2}</rsp:Stream>
              <rsp:CommandState CommandId="c" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done">
                <rsp:ExitCode>0</rsp:ExitCode>
              </rsp:CommandState>
            </rsp:ReceiveResponse>"#
        );

        let parsed = parse_receive(&response).unwrap();
        assert!(parsed.done);
        assert_eq!(parsed.exit_code, Some(0));
        assert_eq!(
            parsed.blocks,
            vec![
                StreamBlock { kind: StreamKind::Stdout, text: "hello ".to_string() },
                StreamBlock { kind: StreamKind::Stderr, text: "warn\n".to_string() },
                StreamBlock { kind: StreamKind::Stdout, text: "world".to_string() },
            ]
        );
    }

    #[test]
    fn test_parse_receive_pending_command() {
        let response = r#"<rsp:ReceiveResponse>
          <rsp:CommandState CommandId="c" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Running"/>
        </rsp:ReceiveResponse>"#;
        let parsed = parse_receive(response).unwrap();
        assert!(!parsed.done);
        assert!(parsed.blocks.is_empty());
        assert_eq!(parsed.exit_code, None);
    }

    #[test]
    fn test_parse_receive_nonzero_exit() {
        let response = r#"<rsp:CommandState State="http://x/CommandState/Done"><rsp:ExitCode>5</rsp:ExitCode></rsp:CommandState>"#;
        let parsed = parse_receive(response).unwrap();
        assert!(parsed.done);
        assert_eq!(parsed.exit_code, Some(5));
    }

    #[test]
    fn test_parse_receive_rejects_bad_stream_encoding() {
        let response = r#"<rsp:Stream Name="stdout">not-base64!!</rsp:Stream>"#;
        assert!(parse_receive(response).is_err());
    }
}
