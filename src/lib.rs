#![forbid(unsafe_code)]

//! JSON-RPC client for the Cody coding agent.
//!
//! The crate is layered bottom-up:
//! - [`transport`]: spawns the agent and opens a stdio or TCP byte stream.
//! - [`rpc`]: frames, classifies, and correlates JSON-RPC 2.0 messages.
//! - [`session`]: the `initialize` / `chat/new` / `chat/submitMessage` /
//!   `exit` conversation.

pub mod config;
pub mod errors;
pub mod rpc;
pub mod session;
pub mod transport;

pub use config::ClientConfig;
pub use errors::{AppError, Result};
