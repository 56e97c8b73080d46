//! Byte-stream transport to the agent.
//!
//! Two modes are supported:
//! - **stdio**: the agent is spawned and protocol traffic flows over its
//!   stdin/stdout pipes.
//! - **TCP**: the agent (spawned here or already running) listens on
//!   `server_address`, and the client connects with bounded retry.
//!
//! Submodules:
//! - `spawner`: launch command resolution and process spawning.
//! - `process`: [`AgentProcess`] graceful-then-forced termination.
//! - `tcp`: cancellable connect retry.

pub mod process;
pub mod spawner;
pub mod tcp;

use std::fmt::{Display, Formatter};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::{AppError, Result};

pub use process::AgentProcess;
pub use spawner::{spawn_agent, LaunchSpec, SpawnedAgent};
pub use tcp::{connect_with_retry, RetryPolicy};

/// Read half of a transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of a transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How the byte stream was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    /// Agent stdio pipes.
    Stdio,
    /// TCP connection to the given address.
    Tcp(String),
    /// Caller-supplied streams.
    Streams,
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Tcp(address) => write!(f, "tcp://{address}"),
            Self::Streams => write!(f, "streams"),
        }
    }
}

/// An open duplex byte stream plus the agent process behind it, if owned.
pub struct Transport {
    reader: BoxedReader,
    writer: BoxedWriter,
    process: Option<AgentProcess>,
    kind: TransportKind,
}

impl Transport {
    /// Open the transport described by `config`.
    ///
    /// Spawns the agent when `spawn_agent` is set. In TCP mode, connect
    /// retries honour `cancel`; if the connection cannot be made the spawned
    /// process is terminated before the error is returned.
    ///
    /// # Errors
    ///
    /// `AppError::Config`, `AppError::Spawn`, `AppError::Connection`, or
    /// `AppError::Cancelled`.
    pub async fn open(config: &ClientConfig, cancel: &CancellationToken) -> Result<Self> {
        config.validate()?;

        let spawned = if config.spawn_agent {
            Some(spawn_agent(&LaunchSpec::from_config(config)?)?)
        } else {
            None
        };

        if !config.use_tcp {
            let Some(SpawnedAgent {
                process,
                stdin: Some(stdin),
                stdout: Some(stdout),
            }) = spawned
            else {
                return Err(AppError::Spawn("agent stdio pipes were not captured".into()));
            };
            info!(pid = ?process.id(), "stdio transport open");
            return Ok(Self {
                reader: Box::new(stdout),
                writer: Box::new(stdin),
                process: Some(process),
                kind: TransportKind::Stdio,
            });
        }

        let mut process = spawned.map(|agent| {
            let mut process = agent.process;
            process.hold_stdin(agent.stdin);
            process
        });

        let policy = RetryPolicy::from_config(&config.timeouts);
        match connect_with_retry(&config.server_address, &policy, cancel).await {
            Ok((stream, _attempts)) => {
                let (reader, writer) = stream.into_split();
                Ok(Self {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    process,
                    kind: TransportKind::Tcp(config.server_address.clone()),
                })
            }
            Err(err) => {
                if let Some(process) = process.as_mut() {
                    if let Err(close_err) = process.close(config.timeouts.shutdown_grace()).await {
                        warn!(%close_err, "failed to stop agent after connect failure");
                    }
                }
                Err(err)
            }
        }
    }

    /// Wrap caller-supplied streams; no process is owned.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            process: None,
            kind: TransportKind::Streams,
        }
    }

    /// How the stream was obtained.
    #[must_use]
    pub fn kind(&self) -> &TransportKind {
        &self.kind
    }

    /// Split into the stream halves and the owned process.
    #[must_use]
    pub fn into_parts(self) -> (BoxedReader, BoxedWriter, Option<AgentProcess>) {
        (self.reader, self.writer, self.process)
    }

    /// Shut down the write half and terminate the owned process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the process could not be stopped.
    pub async fn close(mut self, grace: Duration) -> Result<()> {
        if let Err(err) = self.writer.shutdown().await {
            warn!(%err, "transport write half shutdown failed");
        }
        drop(self.reader);
        if let Some(process) = self.process.as_mut() {
            process.close(grace).await?;
        }
        Ok(())
    }
}
