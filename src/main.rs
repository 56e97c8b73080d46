#![forbid(unsafe_code)]

//! `cody-agent-client`: one-shot chat with a Cody agent.
//!
//! Loads configuration, launches or connects to the agent, performs the
//! `initialize` handshake, opens a chat, submits one message, and prints the
//! answer. The agent is always shut down before exit.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use cody_agent_client::config::FramingKind;
use cody_agent_client::session::{AgentSession, ChatModel, ClientInfo};
use cody_agent_client::{AppError, ClientConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum FramingArg {
    ContentLength,
    Lines,
}

impl From<FramingArg> for FramingKind {
    fn from(value: FramingArg) -> Self {
        match value {
            FramingArg::ContentLength => Self::ContentLength,
            FramingArg::Lines => Self::Lines,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "cody-agent-client", about = "Chat with a Cody agent over JSON-RPC", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Agent binary, or the directory holding the agent script.
    #[arg(long)]
    binary_path: Option<PathBuf>,

    /// Run the agent script through this runtime instead of the binary.
    #[arg(long, value_name = "RUNTIME")]
    use_runtime: Option<String>,

    /// Talk to the agent over TCP.
    #[arg(long)]
    tcp: bool,

    /// Agent TCP address (`host:port`); implies --tcp.
    #[arg(long)]
    address: Option<String>,

    /// Connect to an already running agent instead of spawning one.
    #[arg(long)]
    no_spawn: bool,

    /// Verbose diagnostics.
    #[arg(long)]
    debug: bool,

    /// Message framing on the agent stream.
    #[arg(long, value_enum)]
    framing: Option<FramingArg>,

    /// Chat model id or name.
    #[arg(long)]
    model: Option<String>,

    /// Message to send.
    message: String,
}

fn main() -> ExitCode {
    let args = Cli::parse();

    // Configuration problems end the run before tracing or any connection.
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("cody-agent-client: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init_tracing(args.log_format, config.debug) {
        eprintln!("cody-agent-client: {err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "chat failed");
            eprintln!("cody-agent-client: {err}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Cli) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::read_from_path(path)?,
        None => ClientConfig::default(),
    };

    if let Some(path) = &args.binary_path {
        config.binary_path = Some(path.clone());
    }
    if let Some(runtime) = &args.use_runtime {
        config.use_binary = false;
        config.runtime.clone_from(runtime);
    }
    if let Some(address) = &args.address {
        config.use_tcp = true;
        config.server_address.clone_from(address);
    }
    if args.tcp {
        config.use_tcp = true;
    }
    if args.no_spawn {
        config.spawn_agent = false;
    }
    if args.debug {
        config.debug = true;
    }
    if let Some(framing) = args.framing {
        config.framing = framing.into();
    }

    config.validate()?;
    config.load_credentials();
    Ok(config)
}

async fn run(args: Cli, config: ClientConfig) -> Result<()> {
    let model = args
        .model
        .as_deref()
        .map(str::parse::<ChatModel>)
        .transpose()
        .map_err(AppError::Config)?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let mut session = AgentSession::new(&config);
    session.connect(&cancel).await?;

    let outcome = tokio::select! {
        outcome = converse(&mut session, &config, model, &args.message) => outcome,
        () = cancel.cancelled() => Err(AppError::Cancelled("interrupted".into())),
    };

    if let Err(err) = session.shutdown().await {
        warn!(%err, "agent shutdown failed");
    }
    signal_task.abort();

    let answer = outcome?;
    println!("{answer}");
    Ok(())
}

async fn converse(
    session: &mut AgentSession,
    config: &ClientConfig,
    model: Option<ChatModel>,
    message: &str,
) -> Result<String> {
    let server = session.initialize(&ClientInfo::from_config(config)).await?;
    info!(agent = %server.name, "handshake complete");

    let chat = session.new_chat().await?;
    if let Some(model) = model {
        session.set_model(&chat, model).await?;
    }

    let transcript = session.submit_message(&chat, message).await?;
    transcript
        .answer()
        .map(str::to_owned)
        .ok_or_else(|| AppError::Protocol("transcript has no assistant message".into()))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat, debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
