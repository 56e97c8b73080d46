//! Session client state machine.
//!
//! [`AgentSession`] sequences the protocol operations on top of an
//! [`RpcConnection`]:
//!
//! ```text
//! Disconnected ─connect─▶ Connected ─initialize─▶ Initialized ─new_chat─▶ SessionOpen
//!                              │                       │                      │
//!                              └───────────────────────┴──────shutdown────────┴─▶ Closed
//! ```
//!
//! States only advance. Each operation checks its precondition before any
//! byte is written, so an out-of-order call fails with
//! [`AppError::InvalidState`] and never reaches the agent. A broken or closed
//! connection aborts the whole session: the connection and process are torn
//! down and the state moves to `Closed`.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::rpc::{ConnectionOptions, RpcConnection, ServerEvent, WireFraming};
use crate::session::models::{
    ChatModel, ChatSession, ClientInfo, ServerInfo, SubmitOptions, Transcript,
};
use crate::transport::{AgentProcess, Transport};
use crate::{AppError, Result};

const METHOD_INITIALIZE: &str = "initialize";
const METHOD_CHAT_NEW: &str = "chat/new";
const METHOD_SUBMIT: &str = "chat/submitMessage";
const METHOD_WEBVIEW: &str = "webview/receiveMessage";
const METHOD_EXIT: &str = "exit";

/// Lifecycle state of an [`AgentSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// No transport yet.
    Disconnected,
    /// Transport open, handshake pending.
    Connected,
    /// `initialize` completed.
    Initialized,
    /// At least one chat is open.
    SessionOpen,
    /// Shut down; terminal.
    Closed,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Initialized => "initialized",
            Self::SessionOpen => "session open",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Serialize)]
struct SubmitParams<'a> {
    id: &'a str,
    message: SubmitCommand<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitCommand<'a> {
    command: &'static str,
    text: &'a str,
    submit_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    add_enhanced_context: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_files: Option<&'a [Value]>,
}

/// Client for one agent conversation.
pub struct AgentSession {
    config: ClientConfig,
    state: SessionState,
    connection: Option<RpcConnection>,
    process: Option<AgentProcess>,
    server_info: Option<ServerInfo>,
    /// Repositories last sent as context, per chat id.
    repo_context: HashMap<String, Vec<Value>>,
}

impl AgentSession {
    /// Create a disconnected session.
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            config: config.clone(),
            state: SessionState::Disconnected,
            connection: None,
            process: None,
            server_info: None,
            repo_context: HashMap::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Descriptor received from `initialize`.
    #[must_use]
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Underlying connection, for answering agent requests.
    #[must_use]
    pub fn connection(&self) -> Option<&RpcConnection> {
        self.connection.as_ref()
    }

    /// Take the receiver of agent notifications and requests.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.connection.as_mut()?.take_events()
    }

    /// Open the configured transport.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidState` unless disconnected, otherwise any error of
    /// [`Transport::open`].
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.require(&[SessionState::Disconnected], "connect")?;
        let transport = Transport::open(&self.config, cancel).await?;
        info!(transport = %transport.kind(), "transport open");
        self.attach(transport)
    }

    /// Run the session over an already open transport.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidState` unless disconnected.
    pub fn attach(&mut self, transport: Transport) -> Result<()> {
        self.require(&[SessionState::Disconnected], "attach")?;
        let (reader, writer, process) = transport.into_parts();
        self.connection = Some(RpcConnection::start(
            reader,
            writer,
            WireFraming::from_kind(self.config.framing),
            ConnectionOptions::from_config(&self.config),
        ));
        self.process = process;
        self.state = SessionState::Connected;
        Ok(())
    }

    /// Perform the `initialize` handshake.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidState` unless connected.
    /// - `AppError::Protocol` if the result is not a descriptor with a
    ///   non-empty agent name.
    /// - Any correlator error.
    pub async fn initialize(&mut self, client_info: &ClientInfo) -> Result<ServerInfo> {
        self.require(&[SessionState::Connected], "initialize")?;

        let params = serde_json::to_value(client_info)
            .map_err(|e| AppError::Protocol(format!("failed to serialise client info: {e}")))?;
        let result = self.call(METHOD_INITIALIZE, Some(params)).await?;
        let server: ServerInfo = serde_json::from_value(result)
            .map_err(|e| AppError::Protocol(format!("unexpected initialize result: {e}")))?;
        if server.name.trim().is_empty() {
            return Err(AppError::Protocol("agent reported an empty name".into()));
        }

        info!(
            agent = %server.name,
            version = server.cody_version.as_deref().unwrap_or("unknown"),
            authenticated = ?server.authenticated,
            "agent initialized"
        );
        self.server_info = Some(server.clone());
        self.state = SessionState::Initialized;
        Ok(server)
    }

    /// Open a new chat.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidState` before `initialize`.
    /// - `AppError::Protocol` if the result is not a string id.
    /// - Any correlator error.
    pub async fn new_chat(&mut self) -> Result<ChatSession> {
        self.require(
            &[SessionState::Initialized, SessionState::SessionOpen],
            "new_chat",
        )?;

        let result = self.call(METHOD_CHAT_NEW, None).await?;
        let id = match result {
            Value::String(id) => id,
            other => {
                return Err(AppError::Protocol(format!(
                    "chat/new returned a non-string id: {other}"
                )));
            }
        };

        debug!(chat = %id, "chat opened");
        self.state = SessionState::SessionOpen;
        Ok(ChatSession::new(id))
    }

    /// Submit a user message and return the updated transcript.
    ///
    /// # Errors
    ///
    /// See [`submit_message_with`](Self::submit_message_with).
    pub async fn submit_message(&mut self, chat: &ChatSession, text: &str) -> Result<Transcript> {
        self.submit_message_with(chat, text, &SubmitOptions::default())
            .await
    }

    /// Submit a user message with explicit options.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidState` before a chat is open.
    /// - `AppError::Protocol` if the result is not a transcript.
    /// - Any correlator error.
    pub async fn submit_message_with(
        &mut self,
        chat: &ChatSession,
        text: &str,
        options: &SubmitOptions,
    ) -> Result<Transcript> {
        self.require(&[SessionState::SessionOpen], "submit_message")?;

        let params = SubmitParams {
            id: chat.as_str(),
            message: SubmitCommand {
                command: "submit",
                text,
                submit_type: "user",
                add_enhanced_context: options.add_enhanced_context,
                context_files: options.context_files.as_deref(),
            },
        };
        let params = serde_json::to_value(&params)
            .map_err(|e| AppError::Protocol(format!("failed to serialise message: {e}")))?;

        let result = self.call(METHOD_SUBMIT, Some(params)).await?;
        let transcript: Transcript = serde_json::from_value(result)
            .map_err(|e| AppError::Protocol(format!("unexpected submit result: {e}")))?;

        debug!(
            chat = %chat,
            messages = transcript.messages.len(),
            in_progress = transcript.is_message_in_progress,
            "transcript received"
        );
        Ok(transcript)
    }

    /// Select the model used by `chat`.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidState` before a chat is open, or any correlator
    /// error.
    pub async fn set_model(&mut self, chat: &ChatSession, model: ChatModel) -> Result<Value> {
        self.require(&[SessionState::SessionOpen], "set_model")?;

        let params = json!({
            "id": chat.as_str(),
            "message": { "command": "chatModel", "model": model.id() },
        });
        let result = self.call(METHOD_WEBVIEW, Some(params)).await?;
        info!(chat = %chat, model = model.id(), "chat model selected");
        Ok(result)
    }

    /// Use `repos` as the remote search context of `chat`.
    ///
    /// `repos` are repository objects as the agent reports them (`{"name",
    /// "id"}`). Nothing is sent when the set matches the one last applied to
    /// this chat.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidState` before a chat is open, or any correlator
    /// error.
    pub async fn set_context_repo(&mut self, chat: &ChatSession, repos: &[Value]) -> Result<()> {
        self.require(&[SessionState::SessionOpen], "set_context_repo")?;

        if self
            .repo_context
            .get(chat.as_str())
            .is_some_and(|current| current.as_slice() == repos)
        {
            debug!(chat = %chat, "repository context unchanged");
            return Ok(());
        }

        let params = json!({
            "id": chat.as_str(),
            "message": {
                "command": "context/choose-remote-search-repo",
                "explicitRepos": repos,
            },
        });
        self.call(METHOD_WEBVIEW, Some(params)).await?;
        self.repo_context
            .insert(chat.as_str().to_owned(), repos.to_vec());
        info!(chat = %chat, repos = repos.len(), "repository context set");
        Ok(())
    }

    /// Send `exit`, close the connection, and stop the agent process.
    ///
    /// Valid from any state after connect; repeated calls are no-ops.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidState` when never connected.
    /// - `AppError::Io` if the agent process could not be stopped.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.state {
            SessionState::Disconnected => {
                return Err(AppError::InvalidState(
                    "shutdown requires a connected session".into(),
                ));
            }
            SessionState::Closed => return Ok(()),
            _ => {}
        }

        if let Some(connection) = &self.connection {
            if let Err(err) = connection.notify(METHOD_EXIT, None).await {
                debug!(%err, "exit notification not delivered");
            }
        }

        self.teardown().await?;
        info!("session closed");
        Ok(())
    }

    fn require(&self, allowed: &[SessionState], operation: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(AppError::InvalidState(format!(
                "{operation} is not valid while {}",
                self.state
            )))
        }
    }

    async fn call(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| AppError::InvalidState(format!("{method} without a connection")))?;

        let outcome = connection.call(method, params).await;
        match outcome {
            Err(err) if err.is_connection_lost() => {
                warn!(method, %err, "connection lost, aborting session");
                if let Err(teardown_err) = self.teardown().await {
                    warn!(%teardown_err, "session teardown failed");
                }
                Err(err)
            }
            other => other,
        }
    }

    async fn teardown(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        self.state = SessionState::Closed;
        if let Some(mut process) = self.process.take() {
            process.close(self.config.timeouts.shutdown_grace()).await?;
        }
        Ok(())
    }
}
