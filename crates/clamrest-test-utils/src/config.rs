//! Configuration builders and fixtures for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values
//! without repeating boilerplate across crate boundaries, and
//! [`TestConfigFile`] when the code under test loads a file from disk.

use std::path::{Path, PathBuf};

use clamrest_config::AppConfig;
use tempfile::TempDir;

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .clamd_socket(fake.socket_path().unwrap())
///     .include_raw_data(true)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn listen_addr(mut self, addr: &str) -> Self {
        self.config.server.listen_addr = addr.to_string();
        self
    }

    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.server.listen_port = port;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.server.max_upload_bytes = bytes;
        self
    }

    pub fn include_raw_data(mut self, include: bool) -> Self {
        self.config.server.include_raw_data = include;
        self
    }

    /// Point the client at a Unix socket, clearing any TCP endpoint.
    pub fn clamd_socket(mut self, path: &Path) -> Self {
        self.config.clamd.socket_path = Some(path.display().to_string());
        self.config.clamd.host = None;
        self.config.clamd.port = None;
        self
    }

    pub fn clamd_tcp(mut self, host: &str, port: u16) -> Self {
        self.config.clamd.host = Some(host.to_string());
        self.config.clamd.port = Some(port);
        self
    }

    pub fn clamd_timeout_secs(mut self, secs: u64) -> Self {
        self.config.clamd.timeout_secs = secs;
        self
    }

    pub fn terminator(mut self, terminator: &str) -> Self {
        self.config.clamd.terminator = terminator.to_string();
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.clamd.buffer_size = Some(size);
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A config file in a temp directory that is deleted on drop.
pub struct TestConfigFile {
    pub path: PathBuf,
    _temp_dir: TempDir,
}

impl TestConfigFile {
    /// Write `toml_content` to a fresh `clamrest.toml`.
    pub async fn with_toml(toml_content: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("clamrest.toml");
        tokio::fs::write(&path, toml_content)
            .await
            .expect("failed to write test config");
        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Load the file through [`AppConfig::load`].
    pub async fn load(&self) -> AppConfig {
        AppConfig::load(&self.path)
            .await
            .expect("failed to parse test config")
    }
}
