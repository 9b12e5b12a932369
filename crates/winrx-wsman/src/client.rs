//! Default reqwest-based WS-Man transport client

use crate::envelope::{self, EnvelopeBuilder, StreamKind};
use crate::{
    AuthScheme, NtlmExchange, OutputSink, ShellId, ShellOptions, ShellTransport, TransportError,
    WsmanConfig,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, Response};
use secrecy::ExposeSecret;
use tracing::{debug, warn};

const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";

/// WS-Man shell transport over HTTP(S)
pub struct WsmanClient {
    config: WsmanConfig,
    http: Client,
    envelopes: EnvelopeBuilder,
    ntlm: Option<NtlmExchange>,
}

impl WsmanClient {
    /// Build a client for the configured endpoint
    pub fn new(config: WsmanConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.skip_cert_validation);

        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                TransportError::Configuration(format!("invalid proxy {}: {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|e| TransportError::Connection(format!("failed to build HTTP client: {}", e)))?;

        let ntlm = match config.auth.scheme {
            AuthScheme::Ntlm => Some(NtlmExchange::new(
                config.auth.username.clone(),
                config.auth.password.clone(),
                config.auth.domain.clone(),
            )),
            _ => None,
        };

        let envelopes = EnvelopeBuilder::new(
            config.endpoint_url(),
            config.max_envelope_size,
            config.operation_timeout_secs,
            config.codepage,
        );

        Ok(Self {
            config,
            http,
            envelopes,
            ntlm,
        })
    }

    fn map_request_error(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connection(format!("failed to reach endpoint: {}", e))
        } else {
            TransportError::Connection(format!("HTTP request failed: {}", e))
        }
    }

    /// Send an envelope with the configured authentication and return the
    /// response body of a successful exchange
    async fn send(&self, body: &str) -> Result<String, TransportError> {
        let response = match self.config.auth.scheme {
            AuthScheme::Basic => self.send_basic(body).await?,
            AuthScheme::Ntlm => self.send_ntlm(body).await?,
            AuthScheme::Kerberos | AuthScheme::CredSsp => {
                // SPNEGO/CredSSP token exchange needs platform GSSAPI; inject a
                // capable ShellTransport implementation for these schemes.
                return Err(TransportError::Authentication(format!(
                    "{:?} HTTP negotiation is not supported by the default client",
                    self.config.auth.scheme
                )));
            }
        };

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(TransportError::Authentication(format!(
                "endpoint rejected {:?} credentials for {}",
                self.config.auth.scheme, self.config.auth.username
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| TransportError::Connection(format!("failed to read response: {}", e)))
    }

    async fn send_basic(&self, body: &str) -> Result<Response, TransportError> {
        self.http
            .post(self.config.endpoint_url())
            .basic_auth(
                &self.config.auth.username,
                Some(self.config.auth.password.expose_secret()),
            )
            .header("Content-Type", SOAP_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .await
            .map_err(Self::map_request_error)
    }

    async fn send_ntlm(&self, body: &str) -> Result<Response, TransportError> {
        let url = self.config.endpoint_url();
        let ntlm = self.ntlm.as_ref().ok_or_else(|| {
            TransportError::Authentication("NTLM exchange not initialized".to_string())
        })?;

        // Leg 1: negotiate
        let negotiate = BASE64.encode(ntlm.negotiate_message());
        let challenge_response = self
            .http
            .post(&url)
            .header("Authorization", format!("Negotiate {}", negotiate))
            .header("Content-Type", SOAP_CONTENT_TYPE)
            .header("Content-Length", "0")
            .send()
            .await
            .map_err(Self::map_request_error)?;

        // Leg 2: the endpoint answers 401 with the server challenge
        if challenge_response.status().as_u16() != 401 {
            return Err(TransportError::Authentication(format!(
                "expected NTLM challenge, got HTTP {}",
                challenge_response.status()
            )));
        }
        let challenge_header = challenge_response
            .headers()
            .get("WWW-Authenticate")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Negotiate "))
            .ok_or_else(|| {
                TransportError::Authentication("no NTLM challenge in 401 response".to_string())
            })?;
        let challenge = BASE64.decode(challenge_header.trim()).map_err(|e| {
            TransportError::Authentication(format!("invalid challenge encoding: {}", e))
        })?;

        // Leg 3: authenticate, carrying the actual request body
        let authenticate = BASE64.encode(ntlm.authenticate_message(&challenge)?);
        self.http
            .post(&url)
            .header("Authorization", format!("Negotiate {}", authenticate))
            .header("Content-Type", SOAP_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .await
            .map_err(Self::map_request_error)
    }
}

#[async_trait]
impl ShellTransport for WsmanClient {
    async fn create_shell(&mut self, options: &ShellOptions) -> Result<ShellId, TransportError> {
        debug!(host = %self.config.host, "creating remote shell");
        let envelope = self.envelopes.create_shell(options);
        let response = self.send(&envelope).await?;
        let shell_id = envelope::extract_shell_id(&response)?;
        debug!(shell_id = %shell_id, "remote shell created");
        Ok(ShellId::new(shell_id))
    }

    async fn run_command(
        &mut self,
        shell: &ShellId,
        command: &str,
        stdout: &mut dyn OutputSink,
        stderr: &mut dyn OutputSink,
    ) -> Result<i32, TransportError> {
        let envelope = self.envelopes.command(shell.as_str(), command);
        let response = self.send(&envelope).await?;
        let command_id = envelope::extract_command_id(&response)?;
        debug!(shell_id = %shell, command_id = %command_id, "command dispatched");

        let mut exit_code = 0;
        loop {
            let receive = self.envelopes.receive(shell.as_str(), &command_id);
            let response = self.send(&receive).await?;
            let output = envelope::parse_receive(&response)?;

            for block in output.blocks {
                match block.kind {
                    StreamKind::Stdout => stdout.append(&block.text),
                    StreamKind::Stderr => stderr.append(&block.text),
                }
            }
            if let Some(code) = output.exit_code {
                exit_code = code;
            }
            if output.done {
                break;
            }
        }

        // Best-effort acknowledgement; the command already finished
        let signal = self.envelopes.signal_terminate(shell.as_str(), &command_id);
        if let Err(e) = self.send(&signal).await {
            warn!(shell_id = %shell, command_id = %command_id, error = %e,
                "failed to signal command completion");
        }

        Ok(exit_code)
    }

    async fn close_shell(&mut self, shell: &ShellId) -> Result<(), TransportError> {
        debug!(shell_id = %shell, "deleting remote shell");
        let envelope = self.envelopes.delete_shell(shell.as_str());
        self.send(&envelope).await?;
        Ok(())
    }
}

impl std::fmt::Debug for WsmanClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsmanClient")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("use_tls", &self.config.use_tls)
            .field("scheme", &self.config.auth.scheme)
            .finish()
    }
}
