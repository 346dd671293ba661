use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum ConvAIError {
    #[error("json deserialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("environment variable error: {0}")]
    EnvError(#[from] std::env::VarError),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("signed url request failed with status {0}")]
    SignedUrlError(u16),

    #[error("websocket error: {0}")]
    WebSocketError(#[source] tungstenite::Error),

    #[error("unexpected websocket message type")]
    UnexpectedMessageType,
}
