//! Session configuration and validation

use crate::{Result, WinrxError};
use secrecy::SecretString;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use winrx_wsman::{WsmanAuth, WsmanConfig};

pub use winrx_wsman::AuthScheme;

/// Default remote working directory for temporary artifacts
pub const DEFAULT_WORKING_DIRECTORY: &str = "%TEMP%";

// Characters Windows rejects in paths; '%' stays legal for env expansion
const INVALID_PATH_CHARS: &[char] = &['<', '>', '"', '|', '?', '*'];

/// One name/value pair appended to the remote invocation, e.g. the target
/// computer or configuration name for nested remoting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParameter {
    /// Parameter name, without the leading dash
    pub name: String,
    /// Parameter value, passed verbatim
    pub value: String,
}

impl CommandParameter {
    /// Create a parameter pair
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Immutable descriptor of a remote target and one logical execution.
///
/// Built through [`SessionConfigBuilder`], which enforces the construction
/// invariants (Kerberos requires username and domain; the working directory
/// must be a plausible Windows path) before any network or process activity.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote hostname or IP
    pub hostname: String,
    /// Remote WS-Man port
    pub port: u16,
    /// Use HTTPS for the transport
    pub use_tls: bool,
    /// Account domain
    pub domain: Option<String>,
    /// Account name
    pub username: String,
    /// Password or token
    pub password: SecretString,
    /// Authentication scheme
    pub auth_scheme: AuthScheme,
    /// Remote working directory for temporary artifacts
    pub working_directory: String,
    /// Accept invalid/self-signed certificates
    pub skip_cert_validation: bool,
    /// Invoke the remote interpreter with -NoProfile
    pub use_no_profile: bool,
    /// Use the base64-literal command path instead of chunked script appends
    pub disable_command_encoding: bool,
    /// Execute all chunks of an operation as one command sequence
    pub bulk_command_list: bool,
    /// Per-invocation environment variables for the remote shell
    pub environment: HashMap<String, String>,
    /// Ordered parameters appended to the remote invocation
    pub parameters: Vec<CommandParameter>,
    /// Identifier of this logical execution
    pub execution_id: String,
    /// Connect/reachability timeout
    pub connect_timeout: Duration,
    /// Per-request transport timeout
    pub request_timeout: Duration,
    /// Optional HTTP(S) proxy URL
    pub proxy: Option<String>,
    /// Execution-scoped Kerberos cache file, when unique-cache mode is on
    pub cache_file_path: Option<PathBuf>,
}

impl SessionConfig {
    /// Start building a configuration for the given host
    pub fn builder(hostname: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder::new(hostname)
    }

    /// Transport configuration derived from this session configuration
    pub fn wsman_config(&self) -> WsmanConfig {
        WsmanConfig {
            host: self.hostname.clone(),
            port: self.port,
            use_tls: self.use_tls,
            skip_cert_validation: self.skip_cert_validation,
            auth: WsmanAuth {
                scheme: self.auth_scheme,
                username: self.username.clone(),
                domain: self.domain.clone(),
                password: self.password.clone(),
            },
            proxy: self.proxy.clone(),
            request_timeout: self.request_timeout,
            ..Default::default()
        }
    }
}

/// Builder for [`SessionConfig`]
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    hostname: String,
    port: u16,
    use_tls: bool,
    domain: Option<String>,
    username: String,
    password: SecretString,
    auth_scheme: AuthScheme,
    working_directory: String,
    skip_cert_validation: bool,
    use_no_profile: bool,
    disable_command_encoding: bool,
    bulk_command_list: bool,
    environment: HashMap<String, String>,
    parameters: Vec<CommandParameter>,
    execution_id: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    proxy: Option<String>,
    kerberos_unique_cache_file: bool,
}

impl SessionConfigBuilder {
    /// Create a builder with defaults for the given host
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: winrx_wsman::transport::DEFAULT_WSMAN_PORT,
            use_tls: false,
            domain: None,
            username: String::new(),
            password: SecretString::new(String::new()),
            auth_scheme: AuthScheme::Basic,
            working_directory: DEFAULT_WORKING_DIRECTORY.to_string(),
            skip_cert_validation: false,
            use_no_profile: false,
            disable_command_encoding: false,
            bulk_command_list: true,
            environment: HashMap::new(),
            parameters: Vec::new(),
            execution_id: String::new(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            proxy: None,
            kerberos_unique_cache_file: false,
        }
    }

    /// Set the WS-Man port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use HTTPS for the transport
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Set the account credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.username = username.into();
        self.password = password;
        self
    }

    /// Set the account domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the authentication scheme
    pub fn with_auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.auth_scheme = scheme;
        self
    }

    /// Set the remote working directory
    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = dir.into();
        self
    }

    /// Accept invalid/self-signed certificates
    pub fn with_skip_cert_validation(mut self, skip: bool) -> Self {
        self.skip_cert_validation = skip;
        self
    }

    /// Invoke the remote interpreter with -NoProfile
    pub fn with_no_profile(mut self, no_profile: bool) -> Self {
        self.use_no_profile = no_profile;
        self
    }

    /// Select the base64-literal command path
    pub fn with_disable_command_encoding(mut self, disable: bool) -> Self {
        self.disable_command_encoding = disable;
        self
    }

    /// Execute all chunks as one command sequence instead of one round trip
    /// per chunk
    pub fn with_bulk_command_list(mut self, bulk: bool) -> Self {
        self.bulk_command_list = bulk;
        self
    }

    /// Add an environment variable for the remote shell
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    /// Append a command parameter, preserving insertion order
    pub fn with_parameter(mut self, parameter: CommandParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Set the execution identifier
    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = id.into();
        self
    }

    /// Set the connect/reachability timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-request transport timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Route the transport through an HTTP(S) proxy
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Scope the Kerberos credential cache to this execution
    pub fn with_kerberos_unique_cache_file(mut self, unique: bool) -> Self {
        self.kerberos_unique_cache_file = unique;
        self
    }

    /// Validate the invariants and build the immutable configuration
    pub fn build(self) -> Result<SessionConfig> {
        if self.hostname.trim().is_empty() {
            return Err(WinrxError::Configuration("hostname is required".to_string()));
        }
        if self.execution_id.trim().is_empty() {
            return Err(WinrxError::Configuration(
                "execution id is required".to_string(),
            ));
        }
        if self.working_directory.trim().is_empty()
            || self.working_directory.contains(INVALID_PATH_CHARS)
        {
            return Err(WinrxError::Configuration(format!(
                "invalid working directory: {:?}",
                self.working_directory
            )));
        }
        if self.auth_scheme == AuthScheme::Kerberos {
            if self.username.trim().is_empty() {
                return Err(WinrxError::Configuration(
                    "username is required for Kerberos".to_string(),
                ));
            }
            if self.domain.as_deref().map_or(true, |d| d.trim().is_empty()) {
                return Err(WinrxError::Configuration(
                    "domain is required for Kerberos".to_string(),
                ));
            }
        }

        let cache_file_path = if self.auth_scheme == AuthScheme::Kerberos
            && self.kerberos_unique_cache_file
        {
            Some(crate::kerberos::unique_cache_path(&self.execution_id))
        } else {
            None
        };

        Ok(SessionConfig {
            hostname: self.hostname,
            port: self.port,
            use_tls: self.use_tls,
            domain: self.domain,
            username: self.username,
            password: self.password,
            auth_scheme: self.auth_scheme,
            working_directory: self.working_directory,
            skip_cert_validation: self.skip_cert_validation,
            use_no_profile: self.use_no_profile,
            disable_command_encoding: self.disable_command_encoding,
            bulk_command_list: self.bulk_command_list,
            environment: self.environment,
            parameters: self.parameters,
            execution_id: self.execution_id,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            proxy: self.proxy,
            cache_file_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn base_builder() -> SessionConfigBuilder {
        SessionConfig::builder("host.example.com")
            .with_credentials("jdoe", Secret::new("hunter2".to_string()))
            .with_execution_id("exec-1")
    }

    #[test]
    fn test_build_defaults() {
        let config = base_builder().build().unwrap();
        assert_eq!(config.hostname, "host.example.com");
        assert_eq!(config.port, 5985);
        assert_eq!(config.working_directory, DEFAULT_WORKING_DIRECTORY);
        assert_eq!(config.auth_scheme, AuthScheme::Basic);
        assert!(config.bulk_command_list);
        assert!(config.cache_file_path.is_none());
    }

    #[test]
    fn test_kerberos_requires_domain() {
        let result = base_builder()
            .with_auth_scheme(AuthScheme::Kerberos)
            .build();
        assert!(matches!(result, Err(WinrxError::Configuration(_))));
    }

    #[test]
    fn test_kerberos_requires_username() {
        let result = SessionConfig::builder("host")
            .with_execution_id("exec-1")
            .with_domain("CORP")
            .with_auth_scheme(AuthScheme::Kerberos)
            .build();
        assert!(matches!(result, Err(WinrxError::Configuration(_))));
    }

    #[test]
    fn test_kerberos_with_domain_and_username_builds() {
        let config = base_builder()
            .with_domain("CORP")
            .with_auth_scheme(AuthScheme::Kerberos)
            .build()
            .unwrap();
        assert_eq!(config.domain.as_deref(), Some("CORP"));
        assert!(config.cache_file_path.is_none());
    }

    #[test]
    fn test_unique_cache_path_derivation() {
        let config = base_builder()
            .with_domain("CORP")
            .with_auth_scheme(AuthScheme::Kerberos)
            .with_kerberos_unique_cache_file(true)
            .build()
            .unwrap();
        let path = config.cache_file_path.unwrap();
        assert!(path.to_string_lossy().contains("exec-1"));
    }

    #[test]
    fn test_unique_cache_ignored_for_other_schemes() {
        let config = base_builder()
            .with_kerberos_unique_cache_file(true)
            .build()
            .unwrap();
        assert!(config.cache_file_path.is_none());
    }

    #[test]
    fn test_invalid_working_directory_rejected() {
        let result = base_builder().with_working_directory("C:\\bad|dir").build();
        assert!(matches!(result, Err(WinrxError::Configuration(_))));

        let result = base_builder().with_working_directory("  ").build();
        assert!(matches!(result, Err(WinrxError::Configuration(_))));
    }

    #[test]
    fn test_missing_execution_id_rejected() {
        let result = SessionConfig::builder("host")
            .with_credentials("jdoe", Secret::new("pw".to_string()))
            .build();
        assert!(matches!(result, Err(WinrxError::Configuration(_))));
    }

    #[test]
    fn test_parameters_preserve_order() {
        let config = base_builder()
            .with_parameter(CommandParameter::new("ComputerName", "nested-vm"))
            .with_parameter(CommandParameter::new("ConfigurationName", "JEA"))
            .build()
            .unwrap();
        assert_eq!(config.parameters[0].name, "ComputerName");
        assert_eq!(config.parameters[1].name, "ConfigurationName");
    }

    #[test]
    fn test_wsman_config_projection() {
        let config = base_builder()
            .with_tls(true)
            .with_port(5986)
            .with_skip_cert_validation(true)
            .build()
            .unwrap();
        let wsman = config.wsman_config();
        assert_eq!(wsman.endpoint_url(), "https://host.example.com:5986/wsman");
        assert!(wsman.skip_cert_validation);
        assert_eq!(wsman.auth.username, "jdoe");
    }
}
