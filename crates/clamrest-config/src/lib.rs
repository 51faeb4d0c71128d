#![deny(unsafe_code)]

//! Configuration loading and validation for clamrest.
//!
//! Loads TOML configuration files, overlays `CLAMAV_`-prefixed environment
//! variables, and validates the result. [`AppConfig`] is the central
//! configuration structure shared by the HTTP service and the CLI.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default clamd Unix socket path, used when no TCP endpoint is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/clamd.sock";

/// Prefix of the environment variables read by [`AppConfig::apply_env`].
pub const ENV_PREFIX: &str = "CLAMAV_";

/// Terminator names accepted in `clamd.terminator`.
pub const TERMINATORS: [&str; 2] = ["nul", "newline"];

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid value {value:?} for environment variable {var}: {reason}")]
    Env {
        var: String,
        value: String,
        reason: String,
    },
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP service configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Connection to the clamd daemon.
    #[serde(default)]
    pub clamd: ClamdConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the HTTP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP service binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port the HTTP service binds to.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Largest request body accepted by the scan endpoint, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Include the daemon's raw reply in scan responses. Debugging only.
    #[serde(default)]
    pub include_raw_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            max_upload_bytes: default_max_upload_bytes(),
            include_raw_data: false,
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024 // 512 MiB
}

/// How to reach the clamd daemon.
///
/// When both `host` and `port` are set the daemon is reached over TCP,
/// otherwise over the Unix socket at `socket_path`.
///
/// ## TOML Example
///
/// ```toml
/// [clamd]
/// socket_path = "/run/clamav/clamd.ctl"
/// timeout_secs = 60
/// terminator = "newline"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClamdConfig {
    /// Path of the clamd Unix socket (`LocalSocket` in clamd.conf).
    #[serde(default)]
    pub socket_path: Option<String>,

    /// clamd TCP host (`TCPAddr` in clamd.conf).
    #[serde(default)]
    pub host: Option<String>,

    /// clamd TCP port (`TCPSocket` in clamd.conf).
    #[serde(default)]
    pub port: Option<u16>,

    /// Connect/read/write timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Command terminator: "nul" or "newline".
    #[serde(default = "default_terminator")]
    pub terminator: String,

    /// Socket buffer size in bytes. Defaults depend on the transport.
    #[serde(default)]
    pub buffer_size: Option<usize>,
}

impl Default for ClamdConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            host: None,
            port: None,
            timeout_secs: default_timeout_secs(),
            terminator: default_terminator(),
            buffer_size: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_terminator() -> String {
    "nul".to_string()
}

/// Resolved clamd endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClamdEndpoint {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

impl std::fmt::Display for ClamdEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClamdEndpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            ClamdEndpoint::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
        }
    }
}

impl ClamdConfig {
    /// Resolve which endpoint to connect to.
    pub fn endpoint(&self) -> ClamdEndpoint {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => ClamdEndpoint::Tcp {
                host: host.clone(),
                port,
            },
            _ => ClamdEndpoint::Unix(PathBuf::from(
                self.socket_path.as_deref().unwrap_or(DEFAULT_SOCKET_PATH),
            )),
        }
    }

    /// The configured timeout as a [`std::time::Duration`].
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `CLAMAV_`-prefixed variables from the process environment.
    pub fn with_process_env(mut self) -> Result<Self, ConfigError> {
        self.apply_env(std::env::vars())?;
        Ok(self)
    }

    /// Overlay `CLAMAV_`-prefixed variables from `vars` and re-validate.
    ///
    /// Unknown `CLAMAV_` variables are ignored.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match name {
                "CLAMD_SOCKET_PATH" => self.clamd.socket_path = Some(value.to_string()),
                "CLAMD_HOST" => self.clamd.host = Some(value.to_string()),
                "CLAMD_PORT" => self.clamd.port = Some(parse_env(key.as_ref(), value)?),
                "CLAMD_TIMEOUT" => self.clamd.timeout_secs = parse_env(key.as_ref(), value)?,
                "CLAMD_TERMINATOR" => self.clamd.terminator = value.trim().to_lowercase(),
                "CLAMD_BUFFER_SIZE" => {
                    self.clamd.buffer_size = Some(parse_env(key.as_ref(), value)?)
                }
                "INCLUDE_RAW_DATA" => self.server.include_raw_data = parse_bool(value),
                "LISTEN_ADDR" => self.server.listen_addr = value.to_string(),
                "LISTEN_PORT" => self.server.listen_port = parse_env(key.as_ref(), value)?,
                "MAX_UPLOAD_BYTES" => {
                    self.server.max_upload_bytes = parse_env(key.as_ref(), value)?
                }
                "LOG_LEVEL" => self.logging.level = value.to_string(),
                _ => continue,
            }
            debug!(var = key.as_ref(), "Applied environment override");
        }
        self.validate()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen_port == 0 {
            return Err(ConfigError::Validation(
                "server.listen_port must be non-zero".to_string(),
            ));
        }
        if self.server.listen_addr.is_empty() {
            return Err(ConfigError::Validation(
                "server.listen_addr must not be empty".to_string(),
            ));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.max_upload_bytes must be non-zero".to_string(),
            ));
        }

        let clamd = &self.clamd;
        match (&clamd.host, clamd.port) {
            (Some(host), Some(_)) if host.is_empty() => {
                return Err(ConfigError::Validation(
                    "clamd.host must not be empty".to_string(),
                ));
            }
            (Some(_), None) => {
                return Err(ConfigError::Validation(
                    "clamd.port is required when clamd.host is set".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(ConfigError::Validation(
                    "clamd.host is required when clamd.port is set".to_string(),
                ));
            }
            (_, Some(0)) => {
                return Err(ConfigError::Validation(
                    "clamd.port must be non-zero".to_string(),
                ));
            }
            _ => {}
        }
        if clamd.socket_path.as_deref() == Some("") {
            return Err(ConfigError::Validation(
                "clamd.socket_path must not be empty".to_string(),
            ));
        }
        if clamd.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "clamd.timeout_secs must be non-zero".to_string(),
            ));
        }
        if !TERMINATORS.contains(&clamd.terminator.as_str()) {
            return Err(ConfigError::Validation(format!(
                "clamd.terminator must be one of {:?}, got {:?}",
                TERMINATORS, clamd.terminator
            )));
        }
        if let Some(size) = clamd.buffer_size
            && size <= 4
        {
            return Err(ConfigError::Validation(format!(
                "clamd.buffer_size must be greater than 4, got {size}"
            )));
        }

        Ok(())
    }
}

fn parse_env<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Interpret a configuration flag. Anything unrecognised is `false`.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "enable" | "enabled"
    )
}
