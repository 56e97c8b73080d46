//! Wire payloads exchanged with the agent during a session.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ClientConfig;

/// Format of the transcript `chatID` timestamp, e.g. `Tue, 02 Apr 2024 09:15:00 GMT`.
const CHAT_ID_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

// ── Client descriptor ────────────────────────────────────────────────────────

/// Extension settings sent with `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionConfiguration {
    /// Token used to talk to the Sourcegraph instance.
    pub access_token: String,
    /// Sourcegraph instance URL.
    pub server_endpoint: String,
    /// Codebase hint.
    #[serde(default)]
    pub codebase: String,
    /// Extra HTTP headers the agent attaches to its requests.
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    /// Proxy URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Stable identifier used in telemetry events.
    #[serde(default, rename = "anonymousUserID", skip_serializing_if = "Option::is_none")]
    pub anonymous_user_id: Option<String>,
    /// Autocomplete provider override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autocomplete_advanced_provider: Option<String>,
    /// Autocomplete model override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autocomplete_advanced_model: Option<String>,
    /// Agent-side debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    /// Agent-side verbose debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose_debug: Option<bool>,
    /// Free-form agent configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_configuration: Option<Value>,
}

impl Default for ExtensionConfiguration {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            server_endpoint: "https://sourcegraph.com".into(),
            codebase: String::new(),
            custom_headers: BTreeMap::new(),
            proxy: None,
            anonymous_user_id: None,
            autocomplete_advanced_provider: None,
            autocomplete_advanced_model: None,
            debug: None,
            verbose_debug: None,
            custom_configuration: None,
        }
    }
}

/// Two-state capability flag.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Toggle {
    /// Not supported by this client.
    #[default]
    None,
    /// Supported by this client.
    Enabled,
}

/// Chat capability.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatCapability {
    /// Whole transcripts only.
    #[default]
    None,
    /// Incremental transcript updates.
    Streaming,
}

/// Git capability.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GitCapability {
    /// Not advertised.
    #[default]
    None,
    /// Explicitly disabled.
    Disabled,
}

/// How the agent delivers window messages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WindowMessageCapability {
    /// As notifications.
    #[default]
    Notification,
    /// As requests awaiting a reply.
    Request,
}

/// Capabilities advertised by the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Code completions; this client never requests them.
    pub completions: Toggle,
    /// Chat delivery.
    pub chat: ChatCapability,
    /// Git integration.
    pub git: GitCapability,
    /// Progress bar notifications.
    pub progress_bars: Toggle,
    /// Edit commands.
    pub edit: Toggle,
    /// Workspace edits.
    pub edit_workspace: Toggle,
    /// Untitled documents.
    pub untitled_documents: Toggle,
    /// `window/showDocument`.
    pub show_document: Toggle,
    /// Code lenses.
    pub code_lenses: Toggle,
    /// Window messages.
    pub show_window_message: WindowMessageCapability,
}

/// Client descriptor sent as the `initialize` params.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
    /// Workspace root URI.
    #[serde(default)]
    pub workspace_root_uri: String,
    /// Extension settings.
    #[serde(default)]
    pub extension_configuration: ExtensionConfiguration,
    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: ClientCapabilities,
}

impl ClientInfo {
    /// Descriptor with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            workspace_root_uri: String::new(),
            extension_configuration: ExtensionConfiguration::default(),
            capabilities: ClientCapabilities::default(),
        }
    }

    /// Descriptor for this crate, filled from configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut info = Self::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        info.workspace_root_uri = config.extension.workspace_root_uri.clone();
        info.extension_configuration.access_token = config.extension.access_token.clone();
        info.extension_configuration.server_endpoint = config.extension.server_endpoint.clone();
        if config.debug {
            info.extension_configuration.debug = Some(true);
        }
        info
    }
}

// ── Server descriptor ────────────────────────────────────────────────────────

/// Authentication state reported by the agent. Every field is optional on
/// the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthStatus {
    /// Sourcegraph endpoint in use.
    pub endpoint: String,
    /// Whether the endpoint is sourcegraph.com.
    pub is_dot_com: bool,
    /// Whether a user is logged in.
    pub is_logged_in: bool,
    /// Whether the token was accepted.
    pub authenticated: bool,
    /// Whether the instance has Cody enabled.
    pub site_has_cody_enabled: bool,
    /// Instance version.
    pub site_version: String,
    /// Logged-in user.
    pub username: String,
    /// Primary email address.
    pub primary_email: String,
    /// Display name.
    pub display_name: Option<String>,
}

/// Capability descriptor returned by `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Agent name.
    pub name: String,
    /// Whether the agent authenticated against its endpoint.
    #[serde(default)]
    pub authenticated: Option<bool>,
    /// Whether Cody is enabled for the account.
    #[serde(default)]
    pub cody_enabled: Option<bool>,
    /// Agent version.
    #[serde(default)]
    pub cody_version: Option<String>,
    /// Detailed authentication state.
    #[serde(default)]
    pub auth_status: Option<AuthStatus>,
}

// ── Chat ─────────────────────────────────────────────────────────────────────

/// Opaque chat identifier returned by `chat/new`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatSession(String);

impl ChatSession {
    /// Wrap an identifier received from the agent.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChatSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The user.
    Human,
    /// The model.
    Assistant,
    /// A speaker this client does not know.
    #[serde(other)]
    Unknown,
}

/// One message of a chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Author.
    pub speaker: Speaker,
    /// Message text; absent while a reply is still being generated.
    #[serde(default)]
    pub text: String,
    /// Context items the answer drew on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_files: Option<Vec<Value>>,
}

/// Result of `chat/submitMessage`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    /// Payload discriminator; `"transcript"`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Conversation so far, oldest first.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Whether the final message is still being generated.
    #[serde(default)]
    pub is_message_in_progress: bool,
    /// Chat timestamp string.
    #[serde(rename = "chatID", default)]
    pub chat_id: String,
}

impl Transcript {
    /// Most recent message.
    #[must_use]
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Text of the most recent assistant message.
    #[must_use]
    pub fn answer(&self) -> Option<&str> {
        self.last_from(Speaker::Assistant)
    }

    /// Text of the most recent human message.
    #[must_use]
    pub fn question(&self) -> Option<&str> {
        self.last_from(Speaker::Human)
    }

    /// `chatID` parsed as a UTC timestamp.
    #[must_use]
    pub fn chat_timestamp(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.chat_id, CHAT_ID_FORMAT)
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    fn last_from(&self, speaker: Speaker) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.speaker == speaker)
            .map(|message| message.text.as_str())
    }
}

/// Optional fields of a `submit` command.
///
/// Unset fields are omitted from the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitOptions {
    /// Let the agent gather additional context.
    pub add_enhanced_context: Option<bool>,
    /// Explicit context items.
    pub context_files: Option<Vec<Value>>,
}

// ── Models ───────────────────────────────────────────────────────────────────

/// Chat models known to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatModel {
    /// Claude 2.0.
    Claude2,
    /// Claude 2.1.
    Claude2_1,
    /// Claude Instant 1.2.
    ClaudeInstant1_2,
    /// Claude 3 Haiku.
    Claude3Haiku,
    /// Claude 3 Sonnet.
    Claude3Sonnet,
    /// Claude 3 Opus.
    Claude3Opus,
    /// GPT-3.5 Turbo.
    Gpt35Turbo,
    /// GPT-4o.
    Gpt4o,
    /// Mixtral 8x7b.
    Mixtral8x7b,
    /// Mixtral 8x22b preview.
    Mixtral8x22b,
}

impl ChatModel {
    /// Every known model.
    pub const ALL: [Self; 10] = [
        Self::Claude2,
        Self::Claude2_1,
        Self::ClaudeInstant1_2,
        Self::Claude3Haiku,
        Self::Claude3Sonnet,
        Self::Claude3Opus,
        Self::Gpt35Turbo,
        Self::Gpt4o,
        Self::Mixtral8x7b,
        Self::Mixtral8x22b,
    ];

    /// Identifier the agent expects.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Claude2 => "anthropic/claude-2.0",
            Self::Claude2_1 => "anthropic/claude-2.1",
            Self::ClaudeInstant1_2 => "anthropic/claude-instant-1.2",
            Self::Claude3Haiku => "anthropic/claude-3-haiku-20240307",
            Self::Claude3Sonnet => "anthropic/claude-3-sonnet-20240229",
            Self::Claude3Opus => "anthropic/claude-3-opus-20240229",
            Self::Gpt35Turbo => "openai/gpt-3.5-turbo",
            Self::Gpt4o => "openai::unknown::gpt-4o",
            Self::Mixtral8x7b => "fireworks/accounts/fireworks/models/mixtral-8x7b-instruct",
            Self::Mixtral8x22b => {
                "fireworks/accounts/fireworks/models/mixtral-8x22b-instruct-preview"
            }
        }
    }

    /// Human-readable name.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Claude2 => "Claude 2.0",
            Self::Claude2_1 => "Claude 2.1",
            Self::ClaudeInstant1_2 => "Claude 1.2 Instant",
            Self::Claude3Haiku => "Claude 3 Haiku",
            Self::Claude3Sonnet => "Claude 3 Sonnet",
            Self::Claude3Opus => "Claude 3 Opus",
            Self::Gpt35Turbo => "GPT-3.5 Turbo",
            Self::Gpt4o => "GPT-4o",
            Self::Mixtral8x7b => "Mixtral 8x7b",
            Self::Mixtral8x22b => "Mixtral 8x22b Preview",
        }
    }
}

impl Display for ChatModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ChatModel {
    type Err = String;

    /// Accepts the model id or its display name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|model| {
                model.id().eq_ignore_ascii_case(wanted)
                    || model.display_name().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| format!("unknown chat model: {wanted}"))
    }
}
