//! Global configuration parsing, validation, and defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

fn default_sandbox_root() -> PathBuf {
    std::env::temp_dir().join("repl-relay")
}

fn default_engine_command() -> String {
    "node".into()
}

fn default_engine_args() -> Vec<String> {
    vec!["--interactive".into()]
}

fn default_installer_command() -> String {
    "npm".into()
}

fn default_http_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

fn default_max_output_chunks() -> usize {
    9999
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

/// Global configuration parsed from `config.toml`.
///
/// Every field has a default so the server can start without a config
/// file; a TOML file and CLI flags override individual values.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory under which per-session sandboxes are created.
    /// Each session gets `<sandbox_root>/<token>`.
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: PathBuf,
    /// Evaluation engine binary launched per session (e.g. `node`).
    #[serde(default = "default_engine_command")]
    pub engine_command: String,
    /// Arguments passed to the engine binary.
    #[serde(default = "default_engine_args")]
    pub engine_args: Vec<String>,
    /// Package installer binary used for dependency resolution.
    #[serde(default = "default_installer_command")]
    pub installer_command: String,
    /// Optional package registry URL forwarded to the installer via
    /// `--registry=<url>`.
    #[serde(default)]
    pub installer_registry: Option<String>,
    /// Module names considered loadable without any install (globally
    /// available to the engine). Resolution short-circuits for these.
    #[serde(default)]
    pub preinstalled_modules: Vec<String>,
    /// HTTP port for the session API.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Milliseconds a submission waits before draining captured output.
    /// Zero matches the engine's own pace but risks missing late output.
    #[serde(default)]
    pub settle_delay_ms: u64,
    /// Maximum retained output chunks per capture epoch before the
    /// truncation marker is emitted.
    #[serde(default = "default_max_output_chunks")]
    pub max_output_chunks: usize,
    /// Seconds to wait for an engine to exit on its own before killing it.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            sandbox_root: default_sandbox_root(),
            engine_command: default_engine_command(),
            engine_args: default_engine_args(),
            installer_command: default_installer_command(),
            installer_registry: None,
            preinstalled_modules: Vec::new(),
            http_port: default_http_port(),
            bind_address: default_bind_address(),
            settle_delay_ms: 0,
            max_output_chunks: default_max_output_chunks(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Settle delay applied by the request handlers on every submission.
    #[must_use]
    pub fn settle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.settle_delay_ms)
    }

    /// Grace period granted to an engine before it is force-killed.
    #[must_use]
    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Sandbox directory for the given session token.
    #[must_use]
    pub fn sandbox_dir(&self, token: &str) -> PathBuf {
        self.sandbox_root.join(token)
    }

    fn validate(&self) -> Result<()> {
        if self.engine_command.is_empty() {
            return Err(AppError::Config("engine_command must not be empty".into()));
        }

        if self.installer_command.is_empty() {
            return Err(AppError::Config(
                "installer_command must not be empty".into(),
            ));
        }

        if self.max_output_chunks == 0 {
            return Err(AppError::Config(
                "max_output_chunks must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
