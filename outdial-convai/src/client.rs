use crate::error::ConvAIError;
use crate::messages::client_messages::{ConversationInitiationClientData, Pong, UserAudioChunk};
use crate::messages::server_messages::ServerMessage;
use crate::Result;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::borrow::Cow;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::warn;

const DEFAULT_API_HOST: &str = "https://api.elevenlabs.io";
const SIGNED_URL_PATH: &str = "/v1/convai/conversation/get-signed-url";
const XI_API_KEY_HEADER: &str = "xi-api-key";

type WebSocketWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WebSocketReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// REST client for the conversational-AI API.
#[derive(Clone, Debug)]
pub struct ConvAIClient {
    inner: reqwest::Client,
    api_key: String,
    api_host: String,
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

impl ConvAIClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            inner: reqwest::Client::new(),
            api_key: api_key.into(),
            api_host: DEFAULT_API_HOST.to_string(),
        }
    }

    /// Creates a client from `ELEVENLABS_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(std::env::var("ELEVENLABS_API_KEY")?))
    }

    pub fn with_api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = host.into();
        self
    }

    /// Fetches a short-lived signed WebSocket URL for the agent.
    ///
    /// Signed URLs are single-use; fetch a fresh one per call.
    pub async fn get_signed_url(&self, agent_id: &str) -> Result<String> {
        let resp = self
            .inner
            .get(format!("{}{}", self.api_host, SIGNED_URL_PATH))
            .query(&[("agent_id", agent_id)])
            .header(XI_API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ConvAIError::SignedUrlError(resp.status().as_u16()));
        }

        let body: SignedUrlResponse = resp.json().await?;
        Ok(body.signed_url)
    }
}

/// A live WebSocket session against a conversational agent.
///
/// [`AgentSession::split`] hands the two halves to independent send and
/// receive tasks; the caller owns task lifetimes and shutdown.
#[derive(Debug)]
pub struct AgentSession {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl AgentSession {
    /// Dials the (signed) URL and sends the conversation initiation frame
    /// before any audio flows.
    pub async fn connect(url: &str, init: ConversationInitiationClientData) -> Result<Self> {
        let (mut socket, _) = connect_async(url)
            .await
            .map_err(ConvAIError::WebSocketError)?;

        socket
            .send(Message::try_from(init)?)
            .await
            .map_err(ConvAIError::WebSocketError)?;

        Ok(Self { socket })
    }

    pub fn split(self) -> (AgentSink, AgentStream) {
        let (writer, reader) = self.socket.split();
        (AgentSink { writer }, AgentStream { reader })
    }
}

/// The writing half of an agent session.
#[derive(Debug)]
pub struct AgentSink {
    writer: WebSocketWriter,
}

impl AgentSink {
    /// Forwards a caller audio chunk. `payload` must already be base64.
    pub async fn send_audio(&mut self, payload: impl Into<String>) -> Result<()> {
        self.send(Message::try_from(UserAudioChunk::new(payload))?)
            .await
    }

    pub async fn send_pong(&mut self, event_id: u32) -> Result<()> {
        self.send(Message::try_from(Pong::new(event_id))?).await
    }

    pub async fn send(&mut self, message: Message) -> Result<()> {
        self.writer
            .send(message)
            .await
            .map_err(ConvAIError::WebSocketError)
    }

    /// Closes the session cleanly.
    pub async fn close(&mut self) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::from("session ended"),
        };
        // A close error just means the peer beat us to it.
        if let Err(err) = self.writer.send(Message::Close(Some(frame))).await {
            warn!(error = %err, "agent socket close");
        }
        Ok(())
    }
}

/// The reading half of an agent session, yielding typed server messages.
#[derive(Debug)]
pub struct AgentStream {
    reader: WebSocketReader,
}

impl AgentStream {
    /// Next server message. `None` means the agent closed the socket.
    pub async fn next(&mut self) -> Option<Result<ServerMessage>> {
        loop {
            match self.reader.next().await? {
                Ok(Message::Text(text)) => return Some(ServerMessage::try_from(text.as_str())),
                Ok(Message::Close(_)) => return None,
                // Transport pings are answered by the protocol layer.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(other) => {
                    warn!(?other, "unexpected websocket message from agent");
                    return Some(Err(ConvAIError::UnexpectedMessageType));
                }
                Err(err) => return Some(Err(ConvAIError::WebSocketError(err))),
            }
        }
    }
}
