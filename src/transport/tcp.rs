//! TCP connect with bounded, cancellable retry.
//!
//! An agent started in remote mode needs a moment before its listener is
//! up. Refused connections are retried at a fixed interval; any other
//! failure is reported at once.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::TimeoutConfig;
use crate::{AppError, Result};

/// Retry schedule for [`connect_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts.
    pub backoff: Duration,
    /// Upper bound on attempts; `None` retries until cancelled.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Schedule taken from the configured timeouts.
    #[must_use]
    pub fn from_config(timeouts: &TimeoutConfig) -> Self {
        Self {
            backoff: timeouts.connect_backoff(),
            max_attempts: timeouts.connect_attempt_limit(),
        }
    }
}

/// Connect to `address`, retrying while the connection is refused.
///
/// Returns the stream together with the number of attempts made.
///
/// # Errors
///
/// - `AppError::Cancelled` when `cancel` fires first.
/// - `AppError::Connection` when attempts are exhausted or the failure is not
///   a refusal.
pub async fn connect_with_retry(
    address: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<(TcpStream, u32)> {
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(AppError::Cancelled(format!(
                    "connect to {address} cancelled after {attempts} attempt(s)"
                )));
            }
            outcome = TcpStream::connect(address) => outcome,
        };

        match outcome {
            Ok(stream) => {
                info!(address, attempts, "connected to agent");
                return Ok((stream, attempts));
            }
            Err(err) if err.kind() == ErrorKind::ConnectionRefused => {
                if policy.max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(AppError::Connection(format!(
                        "{address} refused {attempts} connection attempt(s)"
                    )));
                }
                debug!(address, attempts, "connection refused, retrying");
            }
            Err(err) => {
                return Err(AppError::Connection(format!(
                    "failed to connect to {address}: {err}"
                )));
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(AppError::Cancelled(format!(
                    "connect to {address} cancelled after {attempts} attempt(s)"
                )));
            }
            () = tokio::time::sleep(policy.backoff) => {}
        }
    }
}
