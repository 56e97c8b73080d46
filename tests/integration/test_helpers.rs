//! Shared test helpers for connection-level integration tests.
//!
//! A [`FakeAgent`] sits on the far end of an in-memory duplex stream and
//! speaks `Content-Length` framed JSON-RPC using the crate's own codec, so
//! tests can script exactly what the agent reads and writes.

use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{Encoder, FramedRead};

use cody_agent_client::rpc::{
    ConnectionOptions, ContentLengthFraming, Decoded, Message, MessageCodec, Notification,
    Request, RequestId, RpcConnection,
};
use cody_agent_client::session::AgentSession;
use cody_agent_client::transport::Transport;
use cody_agent_client::ClientConfig;

/// How long a fake agent waits for the client before failing the test.
pub const AGENT_WAIT: Duration = Duration::from_secs(5);

/// Scripted agent on the far side of a duplex stream.
pub struct FakeAgent {
    reader: FramedRead<ReadHalf<DuplexStream>, MessageCodec<ContentLengthFraming>>,
    writer: WriteHalf<DuplexStream>,
    codec: MessageCodec<ContentLengthFraming>,
}

impl FakeAgent {
    /// Next message written by the client.
    pub async fn recv(&mut self) -> Message {
        let item = tokio::time::timeout(AGENT_WAIT, self.reader.next())
            .await
            .expect("client wrote nothing in time")
            .expect("client closed the stream")
            .expect("agent-side decode failed");
        match item {
            Decoded::Message(message) => message,
            Decoded::Malformed { reason, raw } => {
                panic!("client wrote a malformed message ({reason}): {raw}")
            }
        }
    }

    /// Next message, which must be a request.
    pub async fn recv_request(&mut self) -> Request {
        match self.recv().await {
            Message::Request(request) => request,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    /// Next message, which must be a notification.
    pub async fn recv_notification(&mut self) -> Notification {
        match self.recv().await {
            Message::Notification(notification) => notification,
            other => panic!("expected a notification, got {other:?}"),
        }
    }

    /// Whatever the client writes within `wait`, if anything.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Message> {
        match tokio::time::timeout(wait, self.reader.next()).await {
            Ok(Some(Ok(Decoded::Message(message)))) => Some(message),
            _ => None,
        }
    }

    /// Whether the client has closed its side of the stream.
    pub async fn client_closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(AGENT_WAIT, self.reader.next()).await,
            Ok(None)
        )
    }

    /// Write `message` to the client.
    pub async fn send(&mut self, message: &Message) {
        let mut buf = BytesMut::new();
        Encoder::<&Message>::encode(&mut self.codec, message, &mut buf).expect("encode");
        self.send_raw(&buf).await;
    }

    /// Write raw bytes to the client.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("agent write");
        self.writer.flush().await.expect("agent flush");
    }

    /// Answer `id` with `result`.
    pub async fn reply(&mut self, id: RequestId, result: Value) {
        self.send(&Message::result(id, result)).await;
    }
}

fn duplex_pair() -> (
    ReadHalf<DuplexStream>,
    WriteHalf<DuplexStream>,
    FakeAgent,
) {
    let (client, agent) = tokio::io::duplex(64 * 1024);
    let (client_reader, client_writer) = tokio::io::split(client);
    let (agent_reader, agent_writer) = tokio::io::split(agent);
    let agent = FakeAgent {
        reader: FramedRead::new(agent_reader, MessageCodec::new(ContentLengthFraming::new())),
        writer: agent_writer,
        codec: MessageCodec::new(ContentLengthFraming::new()),
    };
    (client_reader, client_writer, agent)
}

/// A transport whose far end is a [`FakeAgent`].
pub fn fake_transport() -> (Transport, FakeAgent) {
    let (reader, writer, agent) = duplex_pair();
    (Transport::from_streams(reader, writer), agent)
}

/// A running correlator wired to a [`FakeAgent`].
pub fn fake_connection(options: ConnectionOptions) -> (RpcConnection, FakeAgent) {
    let (reader, writer, agent) = duplex_pair();
    let connection = RpcConnection::start(reader, writer, ContentLengthFraming::new(), options);
    (connection, agent)
}

/// A connected session wired to a [`FakeAgent`].
pub fn fake_session() -> (AgentSession, FakeAgent) {
    let (transport, agent) = fake_transport();
    let mut session = AgentSession::new(&ClientConfig::default());
    session.attach(transport).expect("attach");
    (session, agent)
}
