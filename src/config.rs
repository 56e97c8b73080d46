//! Client configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::{AppError, Result};

/// Environment variable the access token is read from.
pub const ACCESS_TOKEN_ENV: &str = "SRC_ACCESS_TOKEN";

/// Wire framing used on the agent stream.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FramingKind {
    /// `Content-Length: N\r\n\r\n<body>` headers, as used by LSP.
    #[default]
    ContentLength,
    /// One JSON document per `\n`-terminated line.
    Lines,
}

/// Timeouts and retry bounds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Per-request response deadline; 0 means wait until the connection closes.
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
    /// Grace period granted to the agent process before it is force-killed.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Fixed delay between refused TCP connect attempts.
    #[serde(default = "default_connect_retry_millis")]
    pub connect_retry_millis: u64,
    /// Maximum TCP connect attempts; 0 retries until cancelled.
    #[serde(default = "default_connect_max_attempts")]
    pub connect_max_attempts: u32,
}

fn default_request_seconds() -> u64 {
    120
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

fn default_connect_retry_millis() -> u64 {
    100
}

fn default_connect_max_attempts() -> u32 {
    300
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_seconds: default_request_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            connect_retry_millis: default_connect_retry_millis(),
            connect_max_attempts: default_connect_max_attempts(),
        }
    }
}

impl TimeoutConfig {
    /// Response deadline for a single request, if any.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_seconds > 0).then(|| Duration::from_secs(self.request_seconds))
    }

    /// Grace period before the agent process is force-killed.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Delay between refused connect attempts.
    #[must_use]
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_retry_millis)
    }

    /// Attempt bound for TCP connect, `None` when unbounded.
    #[must_use]
    pub fn connect_attempt_limit(&self) -> Option<u32> {
        (self.connect_max_attempts > 0).then_some(self.connect_max_attempts)
    }
}

/// Extension settings forwarded to the agent in the `initialize` descriptor.
///
/// The access token is loaded at runtime from the environment, never from
/// the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExtensionConfig {
    /// Sourcegraph instance the agent talks to.
    #[serde(default = "default_server_endpoint")]
    pub server_endpoint: String,
    /// Root URI of the workspace the agent operates on.
    #[serde(default)]
    pub workspace_root_uri: String,
    /// Access token (populated at runtime).
    #[serde(skip)]
    pub access_token: String,
}

fn default_server_endpoint() -> String {
    "https://sourcegraph.com".into()
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            server_endpoint: default_server_endpoint(),
            workspace_root_uri: String::new(),
            access_token: String::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_runtime() -> String {
    "node".into()
}

fn default_script_name() -> String {
    "index.js".into()
}

fn default_server_address() -> String {
    "127.0.0.1:3113".into()
}

/// Client configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Agent binary, or the directory holding the agent script.
    #[serde(default)]
    pub binary_path: Option<PathBuf>,
    /// Launch `binary_path` directly instead of running a script via `runtime`.
    #[serde(default = "default_true")]
    pub use_binary: bool,
    /// Script runtime used when `use_binary` is false.
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// Script file inside `binary_path` started by `runtime`.
    #[serde(default = "default_script_name")]
    pub script_name: String,
    /// Talk to the agent over TCP instead of its stdio pipes.
    #[serde(default)]
    pub use_tcp: bool,
    /// `host:port` of the agent's TCP listener.
    #[serde(default = "default_server_address")]
    pub server_address: String,
    /// Launch the agent process; false attaches to a running agent over TCP.
    #[serde(default = "default_true")]
    pub spawn_agent: bool,
    /// Verbose diagnostics.
    #[serde(default)]
    pub debug: bool,
    /// Message framing on the stream.
    #[serde(default)]
    pub framing: FramingKind,
    /// Timeouts and retry bounds.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Settings forwarded in the client descriptor.
    #[serde(default)]
    pub extension: ExtensionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            use_binary: true,
            runtime: default_runtime(),
            script_name: default_script_name(),
            use_tcp: false,
            server_address: default_server_address(),
            spawn_agent: true,
            debug: false,
            framing: FramingKind::default(),
            timeouts: TimeoutConfig::default(),
            extension: ExtensionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read_from_path(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating it, so that overrides can be
    /// applied before [`validate`](Self::validate) runs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or parsed.
    pub fn read_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Ok(toml::from_str(&raw)?)
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

    /// Populate the access token from [`ACCESS_TOKEN_ENV`], if set.
    ///
    /// A missing token is not an error; the agent decides whether it can
    /// operate anonymously.
    pub fn load_credentials(&mut self) {
        match env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.is_empty() => self.extension.access_token = token,
            _ => debug!(env = ACCESS_TOKEN_ENV, "no access token in environment"),
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.spawn_agent {
            let missing = self
                .binary_path
                .as_ref()
                .map_or(true, |path| path.as_os_str().is_empty());
            if missing {
                return Err(AppError::Config(
                    "binary_path must be set to the agent binary or to the directory \
                     containing the agent script"
                        .into(),
                ));
            }
            if !self.use_binary && self.runtime.trim().is_empty() {
                return Err(AppError::Config(
                    "runtime must not be empty when use_binary is false".into(),
                ));
            }
        }

        if !self.use_tcp && !self.spawn_agent {
            return Err(AppError::Config(
                "stdio transport requires spawn_agent = true".into(),
            ));
        }

        if self.use_tcp {
            validate_address(&self.server_address)?;
        }

        if self.timeouts.connect_retry_millis == 0 {
            return Err(AppError::Config(
                "timeouts.connect_retry_millis must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Require `host:port` with a numeric port.
fn validate_address(address: &str) -> Result<()> {
    let Some((host, port)) = address.rsplit_once(':') else {
        return Err(AppError::Config(format!(
            "server_address '{address}' must be host:port"
        )));
    };
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(AppError::Config(format!(
            "server_address '{address}' must be host:port"
        )));
    }
    Ok(())
}
