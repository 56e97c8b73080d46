//! Error types shared across the client.

use std::fmt::{Display, Formatter};

/// Shared client result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Client error enumeration covering every failure mode of a connection.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure. Fatal before startup.
    Config(String),
    /// The agent process could not be launched (missing binary or script).
    Spawn(String),
    /// Initial connection could not be established.
    Connection(String),
    /// A connect attempt was aborted through its cancellation token.
    Cancelled(String),
    /// An established stream broke (reset, broken pipe, write failure).
    Transport(String),
    /// The connection closed while a request was outstanding, or was
    /// already closed when a request was issued.
    Closed(String),
    /// Malformed message, unmatched response id, or unexpected result shape.
    Protocol(String),
    /// The agent answered with a JSON-RPC error object.
    Server {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable error message.
        message: String,
        /// Optional structured error payload.
        data: Option<serde_json::Value>,
    },
    /// A pending request was not answered within its deadline.
    Timeout(String),
    /// Session operation issued out of order.
    InvalidState(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether this error means the underlying connection is unusable.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Closed(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Connection(msg) => write!(f, "connection: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Closed(msg) => write!(f, "connection closed: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Server { code, message, .. } => write!(f, "server error {code}: {message}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
