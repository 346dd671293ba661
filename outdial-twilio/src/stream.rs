//! Media-stream WebSocket frame types.
//!
//! Inbound frames arrive as JSON objects tagged by `event`; outbound frames
//! are the `media` and `clear` messages the bridge writes back.

use crate::error::TwilioError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An inbound frame on the media-stream socket.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TwilioMessage {
    Connected(ConnectedMeta),
    Start(StartFrame),
    Media(MediaFrame),
    Mark(MarkFrame),
    Stop(StopFrame),
    Dtmf(DtmfFrame),
}

impl TryFrom<&str> for TwilioMessage {
    type Error = TwilioError;

    fn try_from(text: &str) -> Result<Self, Self::Error> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedMeta {
    pub protocol: Option<String>,
    pub version: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFrame {
    pub stream_sid: String,
    pub start: StartMeta,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub account_sid: Option<String>,
    pub call_sid: String,
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFrame {
    pub stream_sid: String,
    pub media: MediaMeta,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMeta {
    /// Base64-encoded audio. Forwarded as-is; never decoded or re-encoded.
    pub payload: String,
    pub track: Option<String>,
    pub chunk: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkFrame {
    pub stream_sid: String,
    pub mark: Option<MarkMeta>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MarkMeta {
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopFrame {
    pub stream_sid: String,
    pub stop: Option<StopMeta>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMeta {
    pub account_sid: Option<String>,
    pub call_sid: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtmfFrame {
    pub stream_sid: String,
    pub dtmf: DtmfMeta,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DtmfMeta {
    pub digit: String,
}

/// An outbound `media` frame carrying agent audio to the caller.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    event: &'static str,
    pub stream_sid: String,
    pub media: MediaPayload,
}

#[derive(Clone, Debug, Serialize)]
pub struct MediaPayload {
    pub payload: String,
}

impl MediaMessage {
    /// `payload` must already be base64; it is embedded untouched.
    pub fn new(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event: "media",
            stream_sid: stream_sid.into(),
            media: MediaPayload {
                payload: payload.into(),
            },
        }
    }
}

/// An outbound `clear` frame flushing audio the provider has buffered.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearMessage {
    event: &'static str,
    pub stream_sid: String,
}

impl ClearMessage {
    pub fn new(stream_sid: impl Into<String>) -> Self {
        Self {
            event: "clear",
            stream_sid: stream_sid.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_frame_with_custom_parameters() {
        let json = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ123",
            "start": {
                "accountSid": "AC1",
                "callSid": "CA1",
                "streamSid": "MZ123",
                "tracks": ["inbound"],
                "customParameters": {"campaign_id": "c1", "prompt": "be nice"},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            }
        }"#;

        match TwilioMessage::try_from(json).unwrap() {
            TwilioMessage::Start(frame) => {
                assert_eq!(frame.stream_sid, "MZ123");
                assert_eq!(frame.start.call_sid, "CA1");
                assert_eq!(
                    frame.start.custom_parameters.get("campaign_id"),
                    Some(&"c1".to_string())
                );
            }
            other => panic!("expected start frame, got {other:?}"),
        }
    }

    #[test]
    fn parses_media_frame() {
        let json = r#"{
            "event": "media",
            "sequenceNumber": "4",
            "streamSid": "MZ123",
            "media": {"track": "inbound", "chunk": "2", "timestamp": "5", "payload": "AAECAw=="}
        }"#;

        match TwilioMessage::try_from(json).unwrap() {
            TwilioMessage::Media(frame) => assert_eq!(frame.media.payload, "AAECAw=="),
            other => panic!("expected media frame, got {other:?}"),
        }
    }

    #[test]
    fn parses_stop_frame() {
        let json = r#"{"event": "stop", "streamSid": "MZ123", "stop": {"callSid": "CA1"}}"#;
        assert!(matches!(
            TwilioMessage::try_from(json).unwrap(),
            TwilioMessage::Stop(_)
        ));
    }

    #[test]
    fn unknown_event_is_an_error() {
        assert!(TwilioMessage::try_from(r#"{"event": "bogus"}"#).is_err());
    }

    #[test]
    fn media_message_serializes_payload_verbatim() {
        let msg = MediaMessage::new("MZ123", "AAECAw==");
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"event":"media","streamSid":"MZ123","media":{"payload":"AAECAw=="}}"#
        );
    }

    #[test]
    fn clear_message_serializes() {
        let msg = ClearMessage::new("MZ123");
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"event":"clear","streamSid":"MZ123"}"#
        );
    }
}
