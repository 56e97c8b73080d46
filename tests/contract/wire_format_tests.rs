//! Contract tests for the bytes the client puts on the wire.
//!
//! The agent side here is a raw byte reader, independent of the crate's
//! decoder, so the framing and JSON shapes are checked exactly as an agent
//! would see them.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use cody_agent_client::config::FramingKind;
use cody_agent_client::session::{AgentSession, ChatSession, ClientInfo, SubmitOptions};
use cody_agent_client::transport::Transport;
use cody_agent_client::ClientConfig;

/// Raw agent end of a duplex stream.
struct RawAgent {
    stream: DuplexStream,
    buf: Vec<u8>,
}

impl RawAgent {
    /// Read one `Content-Length` frame and return its header block and body.
    async fn read_content_length_frame(&mut self) -> (String, Value) {
        loop {
            if let Some(pos) = find(&self.buf, b"\r\n\r\n") {
                let header = String::from_utf8(self.buf[..pos].to_vec()).expect("utf-8 header");
                let len: usize = header
                    .strip_prefix("Content-Length: ")
                    .expect("Content-Length header first")
                    .parse()
                    .expect("numeric length");
                let start = pos + 4;
                if self.buf.len() >= start + len {
                    let body: Value =
                        serde_json::from_slice(&self.buf[start..start + len]).expect("json body");
                    self.buf.drain(..start + len);
                    return (header, body);
                }
            }
            self.fill().await;
        }
    }

    /// Read one newline-terminated line.
    async fn read_line(&mut self) -> String {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line = String::from_utf8(self.buf[..pos].to_vec()).expect("utf-8 line");
                self.buf.drain(..=pos);
                return line;
            }
            self.fill().await;
        }
    }

    async fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut chunk))
            .await
            .expect("client wrote nothing in time")
            .expect("read");
        assert!(n > 0, "client closed the stream");
        self.buf.extend_from_slice(&chunk[..n]);
    }

    async fn write_content_length(&mut self, body: &Value) {
        let body = body.to_string();
        let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());
        self.stream.write_all(frame.as_bytes()).await.expect("write");
    }

    async fn write_line(&mut self, body: &Value) {
        let line = format!("{body}\n");
        self.stream.write_all(line.as_bytes()).await.expect("write");
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn raw_session(framing: FramingKind) -> (AgentSession, RawAgent) {
    let (client, agent) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(client);
    let config = ClientConfig {
        framing,
        ..ClientConfig::default()
    };
    let mut session = AgentSession::new(&config);
    session
        .attach(Transport::from_streams(reader, writer))
        .expect("attach");
    (
        session,
        RawAgent {
            stream: agent,
            buf: Vec::new(),
        },
    )
}

#[tokio::test]
async fn initialize_is_one_content_length_frame() {
    let (mut session, mut agent) = raw_session(FramingKind::ContentLength);

    let agent_task = tokio::spawn(async move {
        let (header, body) = agent.read_content_length_frame().await;
        assert!(header.starts_with("Content-Length: "));
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], 1);
        assert_eq!(body["method"], "initialize");
        assert_eq!(body["params"]["name"], "test-client");
        assert_eq!(body["params"]["version"], "0.1");
        assert!(body["params"]["extensionConfiguration"].is_object());
        assert!(body["params"]["capabilities"].is_object());

        agent
            .write_content_length(&json!({"jsonrpc":"2.0","id":1,"result":{"name":"cody-agent"}}))
            .await;
        agent
    });

    let server = session
        .initialize(&ClientInfo::new("test-client", "0.1"))
        .await
        .expect("initialize");
    assert_eq!(server.name, "cody-agent");
    drop(agent_task.await.expect("agent"));
}

#[tokio::test]
async fn line_framing_writes_one_json_document_per_line() {
    let (mut session, mut agent) = raw_session(FramingKind::Lines);

    let agent_task = tokio::spawn(async move {
        let line = agent.read_line().await;
        let body: Value = serde_json::from_str(&line).expect("one document per line");
        assert_eq!(body["method"], "initialize");
        agent
            .write_line(&json!({"jsonrpc":"2.0","id":1,"result":{"name":"cody-agent"}}))
            .await;

        let line = agent.read_line().await;
        let body: Value = serde_json::from_str(&line).expect("one document per line");
        assert_eq!(body, json!({"jsonrpc":"2.0","id":2,"method":"chat/new"}));
        agent.write_line(&json!({"jsonrpc":"2.0","id":2,"result":"c-1"})).await;
        agent
    });

    session
        .initialize(&ClientInfo::new("test-client", "0.1"))
        .await
        .expect("initialize");
    let chat = session.new_chat().await.expect("new chat");
    assert_eq!(chat.as_str(), "c-1");
    drop(agent_task.await.expect("agent"));
}

#[tokio::test]
async fn submit_options_are_appended_only_when_set() {
    let (mut session, mut agent) = raw_session(FramingKind::ContentLength);

    let agent_task = tokio::spawn(async move {
        let (_, init) = agent.read_content_length_frame().await;
        agent
            .write_content_length(&json!({"jsonrpc":"2.0","id":init["id"],"result":{"name":"a"}}))
            .await;
        let (_, new_chat) = agent.read_content_length_frame().await;
        agent
            .write_content_length(&json!({"jsonrpc":"2.0","id":new_chat["id"],"result":"chat-1"}))
            .await;

        let (_, submit) = agent.read_content_length_frame().await;
        assert_eq!(
            submit["params"],
            json!({
                "id": "chat-1",
                "message": {
                    "command": "submit",
                    "text": "explain main.rs",
                    "submitType": "user",
                    "addEnhancedContext": false,
                    "contextFiles": [{"type": "file", "uri": "file:///main.rs"}]
                }
            })
        );
        agent
            .write_content_length(&json!({
                "jsonrpc": "2.0",
                "id": submit["id"],
                "result": {"type": "transcript", "messages": [], "isMessageInProgress": false, "chatID": ""}
            }))
            .await;
        agent
    });

    session
        .initialize(&ClientInfo::new("test-client", "0.1"))
        .await
        .expect("initialize");
    let chat: ChatSession = session.new_chat().await.expect("new chat");
    let options = SubmitOptions {
        add_enhanced_context: Some(false),
        context_files: Some(vec![json!({"type": "file", "uri": "file:///main.rs"})]),
    };
    let transcript = session
        .submit_message_with(&chat, "explain main.rs", &options)
        .await
        .expect("submit");
    assert!(transcript.messages.is_empty());
    drop(agent_task.await.expect("agent"));
}

#[tokio::test]
async fn exit_is_a_notification_without_id_or_params() {
    let (mut session, mut agent) = raw_session(FramingKind::ContentLength);

    session.shutdown().await.expect("shutdown");

    let (_, exit) = agent.read_content_length_frame().await;
    assert_eq!(exit, json!({"jsonrpc": "2.0", "method": "exit"}));
}

#[tokio::test]
async fn context_repos_are_sent_once_per_change() {
    let (mut session, mut agent) = raw_session(FramingKind::ContentLength);
    let repos = vec![json!({"name": "github.com/sourcegraph/cody", "id": "UmVwbzox"})];

    let expected = repos.clone();
    let agent_task = tokio::spawn(async move {
        let (_, init) = agent.read_content_length_frame().await;
        agent
            .write_content_length(&json!({"jsonrpc":"2.0","id":init["id"],"result":{"name":"a"}}))
            .await;
        let (_, new_chat) = agent.read_content_length_frame().await;
        agent
            .write_content_length(&json!({"jsonrpc":"2.0","id":new_chat["id"],"result":"chat-1"}))
            .await;

        let (_, choose) = agent.read_content_length_frame().await;
        assert_eq!(choose["method"], "webview/receiveMessage");
        assert_eq!(
            choose["params"],
            json!({
                "id": "chat-1",
                "message": {
                    "command": "context/choose-remote-search-repo",
                    "explicitRepos": expected,
                }
            })
        );
        agent
            .write_content_length(&json!({"jsonrpc":"2.0","id":choose["id"],"result":null}))
            .await;

        // The repeated call must not reach the wire; the next frame is the
        // cleared context.
        let (_, cleared) = agent.read_content_length_frame().await;
        assert_eq!(cleared["params"]["message"]["explicitRepos"], json!([]));
        agent
            .write_content_length(&json!({"jsonrpc":"2.0","id":cleared["id"],"result":null}))
            .await;
        agent
    });

    session
        .initialize(&ClientInfo::new("test-client", "0.1"))
        .await
        .expect("initialize");
    let chat = session.new_chat().await.expect("new chat");
    session
        .set_context_repo(&chat, &repos)
        .await
        .expect("set repos");
    session
        .set_context_repo(&chat, &repos)
        .await
        .expect("unchanged repos");
    session.set_context_repo(&chat, &[]).await.expect("clear repos");
    drop(agent_task.await.expect("agent"));
}
