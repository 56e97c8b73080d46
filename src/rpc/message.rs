//! JSON-RPC 2.0 message model.
//!
//! Every inbound document is classified exactly once, at the codec boundary,
//! into one [`Message`] variant:
//!
//! | Shape                                  | Variant                    |
//! |----------------------------------------|----------------------------|
//! | `method` + non-null `id`               | [`Message::Request`]       |
//! | `method`, no `id` (or `id: null`)      | [`Message::Notification`]  |
//! | `id` + exactly one of `result`/`error` | [`Message::Response`]      |
//!
//! Anything else is rejected with a reason string and reported by the codec
//! as a malformed message.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Request identifier: integer or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric identifier.
    Number(i64),
    /// String identifier.
    String(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Error answering a server request the client does not implement.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }
}

/// A call expecting a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation identifier.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Optional parameters.
    pub params: Option<Value>,
}

/// A fire-and-forget message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Optional parameters.
    pub params: Option<Value>,
}

/// Answer to a [`Request`]; carries either a result or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Identifier of the request being answered. `None` when the peer could
    /// not determine it (`"id": null`).
    pub id: Option<RequestId>,
    /// Result value or error object.
    pub outcome: std::result::Result<Value, RpcError>,
}

/// Any JSON-RPC 2.0 message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Call expecting a response.
    Request(Request),
    /// Answer to an earlier call.
    Response(Response),
    /// Fire-and-forget message.
    Notification(Notification),
}

impl Message {
    /// Build a request message.
    #[must_use]
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(Request {
            id,
            method: method.into(),
            params,
        })
    }

    /// Build a notification message.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    /// Build a successful response.
    #[must_use]
    pub fn result(id: RequestId, result: Value) -> Self {
        Self::Response(Response {
            id: Some(id),
            outcome: Ok(result),
        })
    }

    /// Build an error response.
    #[must_use]
    pub fn error(id: Option<RequestId>, error: RpcError) -> Self {
        Self::Response(Response {
            id,
            outcome: Err(error),
        })
    }

    /// Parse raw text into a message.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the text is not JSON or does not
    /// have one of the three JSON-RPC shapes.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| format!("malformed json: {e}"))?;
        Self::from_value(value)
    }

    /// Classify an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the value is not a JSON-RPC
    /// message.
    pub fn from_value(value: Value) -> std::result::Result<Self, String> {
        let Value::Object(mut obj) = value else {
            return Err("message is not a JSON object".into());
        };

        if let Some(version) = obj.get("jsonrpc") {
            if version.as_str() != Some(JSONRPC_VERSION) {
                return Err(format!("unsupported jsonrpc version: {version}"));
            }
        }

        let has_id_key = obj.contains_key("id");
        let id = take_id(&mut obj)?;

        if let Some(method) = obj.remove("method") {
            let Value::String(method) = method else {
                return Err("`method` must be a string".into());
            };
            let params = obj.remove("params");
            return Ok(match id {
                Some(id) => Self::Request(Request { id, method, params }),
                None => Self::Notification(Notification { method, params }),
            });
        }

        let result = obj.remove("result");
        let error = obj.remove("error");

        let outcome = match (result, error) {
            (Some(_), Some(_)) => {
                return Err("response carries both `result` and `error`".into());
            }
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(serde_json::from_value::<RpcError>(error)
                .map_err(|e| format!("invalid error object: {e}"))?),
            (None, None) => {
                return Err("message has neither `method`, `result` nor `error`".into());
            }
        };

        if id.is_none() && !has_id_key {
            return Err("response is missing `id`".into());
        }

        Ok(Self::Response(Response { id, outcome }))
    }

    /// Render the message as a JSON value tagged with `"jsonrpc": "2.0"`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        match self {
            Self::Request(req) => {
                obj.insert("id".into(), id_value(Some(&req.id)));
                obj.insert("method".into(), Value::from(req.method.as_str()));
                if let Some(params) = &req.params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Notification(note) => {
                obj.insert("method".into(), Value::from(note.method.as_str()));
                if let Some(params) = &note.params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Response(resp) => {
                obj.insert("id".into(), id_value(resp.id.as_ref()));
                match &resp.outcome {
                    Ok(result) => {
                        obj.insert("result".into(), result.clone());
                    }
                    Err(error) => {
                        let error = serde_json::to_value(error).unwrap_or(Value::Null);
                        obj.insert("error".into(), error);
                    }
                }
            }
        }
        Value::Object(obj)
    }

    /// Method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(note) => Some(&note.method),
            Self::Response(_) => None,
        }
    }
}

fn take_id(obj: &mut Map<String, Value>) -> std::result::Result<Option<RequestId>, String> {
    match obj.remove("id") {
        None | Some(Value::Null) => Ok(None),
        Some(id) => serde_json::from_value::<RequestId>(id)
            .map(Some)
            .map_err(|_| "`id` must be an integer or a string".to_owned()),
    }
}

fn id_value(id: Option<&RequestId>) -> Value {
    match id {
        None => Value::Null,
        Some(RequestId::Number(n)) => Value::from(*n),
        Some(RequestId::String(s)) => Value::from(s.as_str()),
    }
}
