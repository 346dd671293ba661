//! ElevenLabs conversational-AI client for the outdial campaign dialer.
//!
//! Provides the signed-URL fetch and a WebSocket session against a
//! conversational agent, with typed client and server messages.

/// Signed-URL fetch and the agent WebSocket session.
pub mod client;
/// Error type for conversational-AI operations.
pub mod error;
pub mod messages;

pub use client::{AgentSession, AgentSink, AgentStream, ConvAIClient};
pub use error::ConvAIError;
pub use messages::client_messages::{
    AgentOverrideData, ConversationInitiationClientData, OverrideData, Pong, PromptOverrideData,
    UserAudioChunk,
};
pub use messages::server_messages::ServerMessage;

pub type Result<T> = std::result::Result<T, ConvAIError>;
