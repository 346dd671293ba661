use super::*;

/// A server frame from the agent session.
///
/// Only the four message types the bridge acts on are modeled; every other
/// `type` parses to [`ServerMessage::Unknown`] so new server messages never
/// break an in-flight call.
#[derive(Clone, Debug)]
pub enum ServerMessage {
    ConversationInitiationMetadata(ConversationInitiationMetadata),
    Audio(Audio),
    Interruption(Interruption),
    Ping(Ping),
    Unknown(String),
}

impl ServerMessage {
    pub fn is_audio(&self) -> bool {
        matches!(*self, ServerMessage::Audio(_))
    }

    pub fn as_audio(&self) -> Option<&Audio> {
        match self {
            ServerMessage::Audio(audio) => Some(audio),
            _ => None,
        }
    }

    pub fn is_ping(&self) -> bool {
        matches!(*self, ServerMessage::Ping(_))
    }

    pub fn as_ping(&self) -> Option<&Ping> {
        match self {
            ServerMessage::Ping(ping) => Some(ping),
            _ => None,
        }
    }
}

impl TryFrom<&str> for ServerMessage {
    type Error = ConvAIError;

    fn try_from(text: &str) -> Result<Self, Self::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let msg_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        let msg = match msg_type.as_str() {
            "conversation_initiation_metadata" => {
                ServerMessage::ConversationInitiationMetadata(serde_json::from_value(value)?)
            }
            "audio" => ServerMessage::Audio(serde_json::from_value(value)?),
            "interruption" => ServerMessage::Interruption(serde_json::from_value(value)?),
            "ping" => ServerMessage::Ping(serde_json::from_value(value)?),
            _ => ServerMessage::Unknown(msg_type),
        };
        Ok(msg)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConversationInitiationMetadata {
    pub conversation_initiation_metadata_event: ConversationInitiationMetadataEvent,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConversationInitiationMetadataEvent {
    pub conversation_id: String,
    pub agent_output_audio_format: Option<String>,
}

/// Agent audio. The chunk arrives either under `audio_event.audio_base_64`
/// or, from low-latency sessions, under `audio.chunk`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Audio {
    pub audio_event: Option<AudioEvent>,
    pub audio: Option<AudioChunk>,
}

impl Audio {
    /// The base64 chunk, whichever shape carried it. Forward verbatim; the
    /// payload is already encoded for the telephony stream.
    pub fn chunk(&self) -> Option<&str> {
        self.audio_event
            .as_ref()
            .map(|e| e.audio_base_64.as_str())
            .or_else(|| self.audio.as_ref().map(|a| a.chunk.as_str()))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AudioEvent {
    pub audio_base_64: String,
    pub event_id: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AudioChunk {
    pub chunk: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Interruption {
    pub interruption_event: InterruptionEvent,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InterruptionEvent {
    pub event_id: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Ping {
    pub ping_event: PingEvent,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PingEvent {
    pub event_id: u32,
    pub ping_ms: Option<u32>,
}
