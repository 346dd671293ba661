/// Websocket messages sent to the agent.
pub mod client_messages;
/// Websocket messages the agent sends back.
pub mod server_messages;

pub(crate) use crate::error::ConvAIError;
pub(crate) use serde::{Deserialize, Serialize};
pub(crate) use tokio_tungstenite::tungstenite::protocol::Message;
