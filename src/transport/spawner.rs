//! Agent process spawner.
//!
//! Launches the agent either as a standalone binary (`<binary> jsonrpc`) or
//! as a script under a runtime (`<runtime> <binary_path>/<script_name>`).
//! The child is spawned with:
//! - `kill_on_drop(true)` so an abandoned process never outlives the client.
//! - The parent environment plus `CODY_AGENT_DEBUG_REMOTE`, which tells the
//!   agent whether to listen on TCP instead of speaking on its stdio.
//! - stderr inherited only when debugging.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::transport::process::AgentProcess;
use crate::{AppError, Result};

/// Environment variable switching the agent into TCP listening mode.
pub const DEBUG_REMOTE_ENV: &str = "CODY_AGENT_DEBUG_REMOTE";

/// Argument selecting the agent's JSON-RPC mode when launched as a binary.
const JSONRPC_ARG: &str = "jsonrpc";

/// Fully resolved launch command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program to execute.
    pub program: OsString,
    /// Arguments passed to `program`.
    pub args: Vec<OsString>,
    /// Variables added on top of the inherited environment.
    pub envs: Vec<(String, String)>,
    /// Script that must exist before launch, when running under a runtime.
    pub script: Option<PathBuf>,
    /// Pipe stdout for protocol traffic; false in TCP mode.
    pub capture_stdout: bool,
    /// Show agent stderr on the client's terminal.
    pub inherit_stderr: bool,
}

impl LaunchSpec {
    /// Derive the launch command from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `binary_path` is unset.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let binary_path = config
            .binary_path
            .clone()
            .ok_or_else(|| AppError::Config("binary_path is required to spawn the agent".into()))?;

        let (program, args, script) = if config.use_binary {
            (
                binary_path.into_os_string(),
                vec![OsString::from(JSONRPC_ARG)],
                None,
            )
        } else {
            let script = binary_path.join(&config.script_name);
            (
                OsString::from(&config.runtime),
                vec![script.clone().into_os_string()],
                Some(script),
            )
        };

        Ok(Self {
            program,
            args,
            envs: vec![(DEBUG_REMOTE_ENV.to_owned(), config.use_tcp.to_string())],
            script,
            capture_stdout: !config.use_tcp,
            inherit_stderr: config.debug,
        })
    }
}

/// A freshly spawned agent and the pipes not yet handed to a transport.
#[derive(Debug)]
pub struct SpawnedAgent {
    /// Process handle.
    pub process: AgentProcess,
    /// Agent stdin.
    pub stdin: Option<ChildStdin>,
    /// Agent stdout; `None` when not captured.
    pub stdout: Option<ChildStdout>,
}

/// Spawn the agent described by `launch`.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the script is missing or the OS refuses to
/// start the program.
pub fn spawn_agent(launch: &LaunchSpec) -> Result<SpawnedAgent> {
    if let Some(script) = &launch.script {
        if !script.is_file() {
            return Err(AppError::Spawn(format!(
                "agent script not found: {}",
                script.display()
            )));
        }
    }

    let mut cmd = Command::new(&launch.program);
    cmd.args(&launch.args);
    for (key, value) in &launch.envs {
        cmd.env(key, value);
    }

    cmd.stdin(Stdio::piped())
        .stdout(if launch.capture_stdout {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stderr(if launch.inherit_stderr {
            Stdio::inherit()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to launch {}: {err}",
            launch.program.to_string_lossy()
        ))
    })?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let process = AgentProcess::new(child);

    info!(
        pid = ?process.id(),
        program = %launch.program.to_string_lossy(),
        "agent process spawned"
    );
    debug!(args = ?launch.args, envs = ?launch.envs, "agent launch details");

    Ok(SpawnedAgent {
        process,
        stdin,
        stdout,
    })
}
