use chrono::{Datelike, Timelike};
use serde_json::json;

use cody_agent_client::session::models::{AuthStatus, ChatCapability, Toggle};
use cody_agent_client::session::{
    ChatMessage, ChatModel, ClientInfo, ServerInfo, Speaker, Transcript,
};
use cody_agent_client::ClientConfig;

fn transcript() -> Transcript {
    serde_json::from_value(json!({
        "type": "transcript",
        "messages": [
            {"speaker": "human", "text": "What is 2 + 2?"},
            {"speaker": "assistant", "text": "4", "contextFiles": [{"type": "file"}]},
            {"speaker": "human", "text": "And times 3?"},
            {"speaker": "assistant", "text": "12"}
        ],
        "isMessageInProgress": false,
        "chatID": "Tue, 02 Apr 2024 09:15:07 GMT"
    }))
    .expect("valid transcript")
}

#[test]
fn transcript_projections_pick_latest_per_speaker() {
    let transcript = transcript();

    assert_eq!(transcript.kind, "transcript");
    assert_eq!(transcript.answer(), Some("12"));
    assert_eq!(transcript.question(), Some("And times 3?"));
    assert_eq!(
        transcript.last_message().map(|m| m.speaker),
        Some(Speaker::Assistant)
    );
    assert_eq!(
        transcript.messages[1].context_files.as_ref().map(Vec::len),
        Some(1)
    );
}

#[test]
fn chat_timestamp_parses_http_date() {
    let ts = transcript().chat_timestamp().expect("parseable chatID");
    assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 4, 2));
    assert_eq!((ts.hour(), ts.minute(), ts.second()), (9, 15, 7));
}

#[test]
fn chat_timestamp_is_none_for_opaque_ids() {
    let mut transcript = transcript();
    transcript.chat_id = "8c3f-opaque".into();
    assert!(transcript.chat_timestamp().is_none());
}

#[test]
fn in_progress_message_may_lack_text() {
    let transcript: Transcript = serde_json::from_value(json!({
        "type": "transcript",
        "messages": [{"speaker": "human", "text": "hi"}, {"speaker": "assistant"}],
        "isMessageInProgress": true,
        "chatID": "x"
    }))
    .expect("valid transcript");

    assert!(transcript.is_message_in_progress);
    assert_eq!(transcript.answer(), Some(""));
}

#[test]
fn unknown_speaker_is_tolerated() {
    let message: ChatMessage =
        serde_json::from_value(json!({"speaker": "system", "text": "note"})).expect("lenient");
    assert_eq!(message.speaker, Speaker::Unknown);
}

#[test]
fn answer_is_none_without_assistant_messages() {
    let transcript: Transcript = serde_json::from_value(json!({
        "messages": [{"speaker": "human", "text": "hello"}]
    }))
    .expect("valid transcript");
    assert_eq!(transcript.answer(), None);
    assert_eq!(transcript.question(), Some("hello"));
}

#[test]
fn server_info_requires_only_a_name() {
    let info: ServerInfo = serde_json::from_value(json!({"name": "cody-agent"})).expect("minimal");
    assert_eq!(info.name, "cody-agent");
    assert!(info.auth_status.is_none());
}

#[test]
fn server_info_auth_status_is_lenient() {
    let info: ServerInfo = serde_json::from_value(json!({
        "name": "cody-agent",
        "authenticated": true,
        "codyEnabled": true,
        "codyVersion": "5.5.0",
        "authStatus": {"endpoint": "https://sourcegraph.com", "isLoggedIn": true, "username": "dev"}
    }))
    .expect("partial authStatus");

    assert_eq!(info.cody_version.as_deref(), Some("5.5.0"));
    let status = info.auth_status.expect("auth status");
    assert!(status.is_logged_in);
    assert_eq!(status.username, "dev");
    assert_eq!(status.site_version, AuthStatus::default().site_version);
}

#[test]
fn client_info_serialises_camel_case() {
    let mut info = ClientInfo::new("test-client", "0.1");
    info.extension_configuration.access_token = "sgp_abc".into();
    info.capabilities.chat = ChatCapability::Streaming;
    info.capabilities.edit = Toggle::Enabled;

    let value = serde_json::to_value(&info).expect("serialise");

    assert_eq!(value["name"], "test-client");
    assert_eq!(value["version"], "0.1");
    assert_eq!(value["workspaceRootUri"], "");
    assert_eq!(value["extensionConfiguration"]["accessToken"], "sgp_abc");
    assert_eq!(
        value["extensionConfiguration"]["serverEndpoint"],
        "https://sourcegraph.com"
    );
    assert!(value["extensionConfiguration"].get("proxy").is_none());
    assert_eq!(value["capabilities"]["chat"], "streaming");
    assert_eq!(value["capabilities"]["edit"], "enabled");
    assert_eq!(value["capabilities"]["completions"], "none");
    assert_eq!(value["capabilities"]["showWindowMessage"], "notification");
}

#[test]
fn client_info_from_config_forwards_extension_settings() {
    let mut config = ClientConfig::default();
    config.extension.access_token = "sgp_env".into();
    config.extension.workspace_root_uri = "file:///repo".into();
    config.debug = true;

    let info = ClientInfo::from_config(&config);

    assert_eq!(info.name, "cody-agent-client");
    assert_eq!(info.workspace_root_uri, "file:///repo");
    assert_eq!(info.extension_configuration.access_token, "sgp_env");
    assert_eq!(info.extension_configuration.debug, Some(true));
}

#[test]
fn chat_model_parses_ids_and_names() {
    assert_eq!(
        "anthropic/claude-3-haiku-20240307".parse::<ChatModel>(),
        Ok(ChatModel::Claude3Haiku)
    );
    assert_eq!("claude 3 opus".parse::<ChatModel>(), Ok(ChatModel::Claude3Opus));
    assert!("gpt-2".parse::<ChatModel>().is_err());
}

#[test]
fn chat_model_ids_are_unique() {
    let mut ids: Vec<&str> = ChatModel::ALL.iter().map(|m| m.id()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), ChatModel::ALL.len());
}
