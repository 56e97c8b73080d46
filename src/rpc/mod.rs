//! JSON-RPC 2.0 plumbing over an agent byte stream.
//!
//! Submodules:
//! - `message`: the tagged [`Message`] model and its JSON classification.
//! - `framing`: newline and `Content-Length` frame delimiting.
//! - `codec`: [`MessageCodec`], the `tokio_util` codec joining the two.
//! - `connection`: [`RpcConnection`], the request/response correlator with
//!   its reader and writer tasks.

pub mod codec;
pub mod connection;
pub mod framing;
pub mod message;

pub use codec::{Decoded, MessageCodec};
pub use connection::{ConnectionOptions, PendingResponse, RpcConnection, ServerEvent};
pub use framing::{ContentLengthFraming, Framing, LineFraming, WireFraming};
pub use message::{Message, Notification, Request, RequestId, Response, RpcError};
