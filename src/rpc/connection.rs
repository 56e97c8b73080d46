//! Request/response correlator.
//!
//! An [`RpcConnection`] owns two background tasks over one duplex stream:
//!
//! - **reader** drives a [`FramedRead`] with [`MessageCodec`], routes every
//!   inbound response to its pending slot regardless of arrival order, and
//!   forwards notifications and server-initiated requests to the event
//!   channel.
//! - **writer** receives outbound messages over an [`mpsc`] channel and
//!   writes each as one complete frame, acknowledging the result to the
//!   issuer.
//!
//! Reading and writing are independent suspension points, so a blocked write
//! never stalls response dispatch and vice versa.
//!
//! # Pending table
//!
//! `request id → oneshot sender`, shared between issuers and the reader
//! behind an async mutex. A slot is created before its request is written
//! and removed the moment the matching response arrives, the request times
//! out, or the connection closes. Once closed the table rejects new slots,
//! so no request can be left waiting on a dead stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{Encoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::rpc::codec::{Decoded, MessageCodec};
use crate::rpc::framing::Framing;
use crate::rpc::message::{Message, Notification, Request, RequestId, Response, RpcError};
use crate::{AppError, Result};

/// Outbound queue depth.
const OUTBOUND_CAPACITY: usize = 64;

/// Default event channel depth.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Tunables for an [`RpcConnection`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Deadline applied by [`RpcConnection::await_response`]; `None` waits
    /// until the response arrives or the connection closes.
    pub request_timeout: Option<Duration>,
    /// Capacity of the server event channel.
    pub event_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            request_timeout: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ConnectionOptions {
    /// Options derived from client configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            request_timeout: config.timeouts.request_timeout(),
            ..Self::default()
        }
    }
}

/// Unsolicited traffic from the agent, delivered off the response path.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Fire-and-forget message from the agent.
    Notification(Notification),
    /// Agent-initiated call; answer it with [`RpcConnection::respond`].
    Request(Request),
    /// Malformed message or response with no matching request.
    ProtocolViolation(String),
}

type Outcome = Result<Value>;

struct PendingSlot {
    method: String,
    tx: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct PendingTable {
    slots: HashMap<RequestId, PendingSlot>,
    /// Reason the connection closed; set once, never cleared.
    closed: Option<String>,
}

type SharedPending = Arc<Mutex<PendingTable>>;

struct Outbound {
    message: Message,
    written: oneshot::Sender<Result<()>>,
}

/// Handle to a request that has been written and awaits its response.
#[derive(Debug)]
#[must_use = "a pending response does nothing unless awaited"]
pub struct PendingResponse {
    id: RequestId,
    method: String,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingResponse {
    /// Identifier assigned to the request.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Method the request invoked.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// JSON-RPC connection over a duplex byte stream.
pub struct RpcConnection {
    next_id: AtomicI64,
    pending: SharedPending,
    outbound: mpsc::Sender<Outbound>,
    events: Option<mpsc::Receiver<ServerEvent>>,
    subscribed: Arc<AtomicBool>,
    cancel: CancellationToken,
    request_timeout: Option<Duration>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RpcConnection {
    /// Start the reader and writer tasks over `reader`/`writer`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<R, W, F>(reader: R, writer: W, framing: F, options: ConnectionOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        F: Framing + Clone,
    {
        let pending: SharedPending = Arc::new(Mutex::new(PendingTable::default()));
        let cancel = CancellationToken::new();
        let subscribed = Arc::new(AtomicBool::new(false));
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(options.event_capacity.max(1));

        let writer_task = tokio::spawn(run_writer(
            writer,
            MessageCodec::new(framing.clone()),
            outbound_rx,
            cancel.clone(),
        ));

        let dispatcher = Dispatcher {
            pending: Arc::clone(&pending),
            outbound: outbound_tx.clone(),
            events: event_tx,
            subscribed: Arc::clone(&subscribed),
        };
        let reader_task = tokio::spawn(run_reader(
            FramedRead::new(reader, MessageCodec::new(framing)),
            dispatcher,
            cancel.clone(),
        ));

        Self {
            next_id: AtomicI64::new(1),
            pending,
            outbound: outbound_tx,
            events: Some(event_rx),
            subscribed,
            cancel,
            request_timeout: options.request_timeout,
            tasks: Mutex::new(vec![reader_task, writer_task]),
        }
    }

    /// Take the server event receiver.
    ///
    /// Until this is called, notifications are only logged and agent
    /// requests are answered with `Method not found`. Returns `None` on
    /// subsequent calls.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        let events = self.events.take();
        if events.is_some() {
            self.subscribed.store(true, Ordering::SeqCst);
        }
        events
    }

    /// Allocate the next id, register a pending slot, and write the request.
    ///
    /// Safe to call while earlier requests are still outstanding.
    ///
    /// # Errors
    ///
    /// - [`AppError::Closed`] if the connection has closed.
    /// - [`AppError::Transport`] if the write fails.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<PendingResponse> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();

        {
            let mut table = self.pending.lock().await;
            if let Some(reason) = &table.closed {
                return Err(AppError::Closed(reason.clone()));
            }
            table.slots.insert(
                id.clone(),
                PendingSlot {
                    method: method.to_owned(),
                    tx,
                },
            );
        }

        if let Err(err) = self.write(Message::request(id.clone(), method, params)).await {
            self.pending.lock().await.slots.remove(&id);
            return Err(err);
        }

        debug!(%id, method, "rpc: request sent");
        Ok(PendingResponse {
            id,
            method: method.to_owned(),
            rx,
        })
    }

    /// Wait for the response correlated with `pending`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Server`] if the agent answered with an error object.
    /// - [`AppError::Timeout`] if the configured deadline elapsed; the
    ///   pending slot is reclaimed.
    /// - [`AppError::Closed`] if the connection closed first.
    pub async fn await_response(&self, pending: PendingResponse) -> Result<Value> {
        let PendingResponse { id, method, rx } = pending;

        let received = match self.request_timeout {
            None => rx.await,
            Some(limit) => {
                if let Ok(received) = tokio::time::timeout(limit, rx).await {
                    received
                } else {
                    self.pending.lock().await.slots.remove(&id);
                    warn!(%id, %method, ?limit, "rpc: request timed out");
                    return Err(AppError::Timeout(format!(
                        "no response to '{method}' (id {id}) within {limit:?}"
                    )));
                }
            }
        };

        received.map_err(|_| {
            AppError::Closed(format!("'{method}' (id {id}) was dropped without a response"))
        })?
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// Any error from [`send_request`](Self::send_request) or
    /// [`await_response`](Self::await_response).
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let pending = self.send_request(method, params).await?;
        self.await_response(pending).await
    }

    /// Send a notification; no response is expected.
    ///
    /// # Errors
    ///
    /// [`AppError::Closed`] or [`AppError::Transport`] if it cannot be written.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.write(Message::notification(method, params)).await?;
        debug!(method, "rpc: notification sent");
        Ok(())
    }

    /// Answer an agent-initiated request received as [`ServerEvent::Request`].
    ///
    /// # Errors
    ///
    /// [`AppError::Closed`] or [`AppError::Transport`] if it cannot be written.
    pub async fn respond(
        &self,
        id: RequestId,
        outcome: std::result::Result<Value, RpcError>,
    ) -> Result<()> {
        let message = match outcome {
            Ok(result) => Message::result(id, result),
            Err(error) => Message::error(Some(id), error),
        };
        self.write(message).await
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.slots.len()
    }

    /// Whether the connection has closed.
    pub async fn is_closed(&self) -> bool {
        self.pending.lock().await.closed.is_some()
    }

    /// Close the connection.
    ///
    /// Stops both tasks, fails every pending request with
    /// [`AppError::Closed`], and drops the write half. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        fail_pending(&self.pending, "connection closed by client").await;

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(err) = task.await {
                warn!(%err, "rpc: connection task ended abnormally");
            }
        }
    }

    async fn write(&self, message: Message) -> Result<()> {
        let (written_tx, written_rx) = oneshot::channel();
        self.outbound
            .send(Outbound {
                message,
                written: written_tx,
            })
            .await
            .map_err(|_| AppError::Closed("writer has stopped".into()))?;

        written_rx
            .await
            .map_err(|_| AppError::Closed("writer stopped before the message was written".into()))?
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Reader-side routing state.
struct Dispatcher {
    pending: SharedPending,
    outbound: mpsc::Sender<Outbound>,
    events: mpsc::Sender<ServerEvent>,
    subscribed: Arc<AtomicBool>,
}

impl Dispatcher {
    async fn dispatch(&self, message: Message) {
        match message {
            Message::Response(response) => self.resolve(response).await,
            Message::Notification(notification) => {
                debug!(method = %notification.method, "rpc reader: notification received");
                if let Err(event) = self.emit(ServerEvent::Notification(notification)) {
                    debug!(?event, "rpc reader: no event consumer, notification dropped");
                }
            }
            Message::Request(request) => {
                debug!(id = %request.id, method = %request.method, "rpc reader: agent request received");
                if let Err(ServerEvent::Request(request)) = self.emit(ServerEvent::Request(request)) {
                    self.reject_request(request);
                }
            }
        }
    }

    async fn resolve(&self, response: Response) {
        let Some(id) = response.id else {
            let detail = match &response.outcome {
                Ok(_) => "response without id".to_owned(),
                Err(err) => format!("error without id: {} ({})", err.message, err.code),
            };
            warn!(%detail, "rpc reader: uncorrelatable response");
            self.violation(detail);
            return;
        };

        let slot = self.pending.lock().await.slots.remove(&id);
        let Some(slot) = slot else {
            warn!(%id, "rpc reader: response matches no pending request");
            self.violation(format!("response id {id} matches no pending request"));
            return;
        };

        debug!(%id, method = %slot.method, outcome = ?response.outcome, "rpc reader: response correlated");
        let outcome = response.outcome.map_err(|err| AppError::Server {
            code: err.code,
            message: err.message,
            data: err.data,
        });
        if slot.tx.send(outcome).is_err() {
            debug!(%id, "rpc reader: waiter gone before the response arrived");
        }
    }

    /// Deliver an event to the consumer; hands it back if nobody can take it.
    fn emit(&self, event: ServerEvent) -> std::result::Result<(), ServerEvent> {
        if !self.subscribed.load(Ordering::SeqCst) {
            return Err(event);
        }
        self.events.try_send(event).map_err(|err| match err {
            TrySendError::Full(event) | TrySendError::Closed(event) => event,
        })
    }

    fn violation(&self, detail: String) {
        if self.emit(ServerEvent::ProtocolViolation(detail)).is_err() {
            debug!("rpc reader: protocol violation not delivered");
        }
    }

    /// Answer an agent request nobody is handling so the agent is not left
    /// waiting.
    ///
    /// Never blocks: the reader must keep draining the stream even when the
    /// writer is stuck on a stalled agent.
    fn reject_request(&self, request: Request) {
        debug!(id = %request.id, method = %request.method, "rpc reader: answering Method not found");
        let (written, _) = oneshot::channel();
        let message = Message::error(
            Some(request.id.clone()),
            RpcError::method_not_found(&request.method),
        );
        match self.outbound.try_send(Outbound { message, written }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(id = %request.id, method = %request.method, "rpc reader: outbound queue full, rejection dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("rpc reader: writer stopped, rejection not sent");
            }
        }
    }
}

async fn run_reader<R, F>(
    mut framed: FramedRead<R, MessageCodec<F>>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
    F: Framing,
{
    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("rpc reader: cancellation received, stopping");
                break "connection closed by client".to_owned();
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("rpc reader: EOF detected");
                        break "stream closed by agent".to_owned();
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "rpc reader: stream error, stopping");
                        break format!("stream error: {e}");
                    }
                    Some(Ok(Decoded::Malformed { raw, reason })) => {
                        warn!(%reason, raw_message = %raw, "rpc reader: malformed message, skipping");
                        dispatcher.violation(format!("malformed message: {reason}"));
                    }
                    Some(Ok(Decoded::Message(message))) => dispatcher.dispatch(message).await,
                }
            }
        }
    };

    fail_pending(&dispatcher.pending, &reason).await;
    // The stream is gone; stop the writer so queued sends fail fast.
    cancel.cancel();
}

/// Mark the table closed and fail every outstanding slot.
async fn fail_pending(pending: &SharedPending, reason: &str) {
    let drained: Vec<(RequestId, PendingSlot)> = {
        let mut table = pending.lock().await;
        if table.closed.is_none() {
            table.closed = Some(reason.to_owned());
        }
        table.slots.drain().collect()
    };

    if !drained.is_empty() {
        debug!(count = drained.len(), reason, "rpc: failing pending requests");
    }
    for (id, slot) in drained {
        let err = AppError::Closed(format!(
            "{reason} while awaiting '{}' (id {id})",
            slot.method
        ));
        // Receiver may already be gone after a timeout.
        let _ = slot.tx.send(Err(err));
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

async fn run_writer<W, F>(
    mut writer: W,
    mut codec: MessageCodec<F>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
    F: Framing,
{
    let mut buf = BytesMut::new();

    loop {
        let outbound = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("rpc writer: cancellation received, stopping");
                break;
            }

            next = outbound_rx.recv() => match next {
                Some(outbound) => outbound,
                None => {
                    debug!("rpc writer: outbound channel closed, stopping");
                    break;
                }
            },
        };

        buf.clear();
        let result = match Encoder::<&Message>::encode(&mut codec, &outbound.message, &mut buf) {
            Err(err) => Err(err),
            Ok(()) => tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    Err(AppError::Closed("connection closed while writing".into()))
                }

                written = write_frame(&mut writer, &buf) => written.map_err(|e| {
                    warn!(error = %e, "rpc writer: write failed");
                    AppError::Transport(format!("write failed: {e}"))
                }),
            },
        };

        // The issuer may have stopped waiting.
        let _ = outbound.written.send(result);
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}
