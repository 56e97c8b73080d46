//! Agent process lifecycle.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, ChildStdin};
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Handle to a spawned agent process.
///
/// Dropping the handle kills the process. [`close`](Self::close) terminates
/// it gracefully instead.
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
    /// Held open in TCP mode; some agents exit when stdin reaches EOF.
    stdin_guard: Option<ChildStdin>,
    pid: Option<u32>,
    exit: Option<ExitStatus>,
    closed: bool,
}

impl AgentProcess {
    pub(crate) fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            stdin_guard: None,
            pid,
            exit: None,
            closed: false,
        }
    }

    /// Keep the agent's stdin open until the process is closed.
    pub fn hold_stdin(&mut self, stdin: Option<ChildStdin>) {
        self.stdin_guard = stdin;
    }

    /// OS process id captured at spawn time.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Whether [`close`](Self::close) has already run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Exit status if the process has already terminated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the status cannot be queried.
    pub fn try_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        if self.exit.is_none() {
            self.exit = self.child.try_wait()?;
        }
        Ok(self.exit)
    }

    /// Terminate the process: request termination, wait up to `grace`, then
    /// force-kill.
    ///
    /// Idempotent: later calls return the recorded exit status without
    /// signalling again.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if waiting on or killing the process fails.
    pub async fn close(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        if self.closed {
            return Ok(self.exit);
        }
        self.closed = true;
        drop(self.stdin_guard.take());

        if let Some(status) = self.try_exit_status()? {
            info!(pid = ?self.pid, %status, "agent process already exited");
            return Ok(Some(status));
        }

        request_termination(&mut self.child);

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = ?self.pid, %status, "agent process exited");
                self.exit = Some(status);
            }
            Ok(Err(err)) => {
                return Err(AppError::Io(format!("failed to wait for agent process: {err}")));
            }
            Err(_elapsed) => {
                warn!(pid = ?self.pid, ?grace, "agent ignored termination, killing");
                self.child
                    .kill()
                    .await
                    .map_err(|err| AppError::Io(format!("failed to kill agent process: {err}")))?;
                let status = self.child.wait().await?;
                info!(pid = ?self.pid, %status, "agent process killed");
                self.exit = Some(status);
            }
        }

        Ok(self.exit)
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, %err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(%err, "termination request failed");
    }
}
