//! Session layer: protocol operations and their payloads.

pub mod client;
pub mod models;

pub use client::{AgentSession, SessionState};
pub use models::{
    ChatMessage, ChatModel, ChatSession, ClientInfo, ServerInfo, Speaker, SubmitOptions,
    Transcript,
};
