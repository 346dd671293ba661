use crate::error::AppError;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_CALL_DELAY_MS: u64 = 10_000;
pub const DEFAULT_INACTIVITY_TIMEOUT_MS: u64 = 60_000;
/// Floor on the campaign cycle delay; anything faster risks provider rate
/// limits.
pub const MIN_CALL_DELAY_MS: u64 = 1_000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 30_000;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Externally reachable base URL, used to build TwiML and callback URLs.
    pub server_public_url: String,
    pub elevenlabs_agent_id: String,
    pub elevenlabs_api_key: String,
    pub elevenlabs_webhook_secret: Option<String>,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub twilio_validate_signature: bool,
    pub default_max_concurrent: usize,
    pub default_call_delay: Duration,
    pub min_call_delay: Duration,
    pub inactivity_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let bind_addr = match std::env::var("BIND_ADDR") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| AppError::Config(format!("invalid BIND_ADDR: {raw}")))?,
            Err(_) => {
                let port = opt_parse::<u16>("PORT")?.unwrap_or(8000);
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        Ok(Config {
            bind_addr,
            server_public_url: trim_trailing_slash(std::env::var("SERVER_PUBLIC_URL")?),
            elevenlabs_agent_id: std::env::var("ELEVENLABS_AGENT_ID")?,
            elevenlabs_api_key: std::env::var("ELEVENLABS_API_KEY")?,
            elevenlabs_webhook_secret: std::env::var("ELEVENLABS_WEBHOOK_SECRET").ok(),
            twilio_account_sid: std::env::var("TWILIO_ACCOUNT_SID")?,
            twilio_auth_token: std::env::var("TWILIO_AUTH_TOKEN")?,
            twilio_phone_number: std::env::var("TWILIO_PHONE_NUMBER")?,
            twilio_validate_signature: opt_parse::<bool>("TWILIO_VALIDATE_SIGNATURE")?
                .unwrap_or(false),
            default_max_concurrent: opt_parse("CAMPAIGN_DEFAULT_MAX_CONCURRENT")?
                .unwrap_or(DEFAULT_MAX_CONCURRENT),
            default_call_delay: Duration::from_millis(
                opt_parse("CAMPAIGN_DEFAULT_CALL_DELAY_MS")?
                    .unwrap_or(DEFAULT_CALL_DELAY_MS)
                    .max(MIN_CALL_DELAY_MS),
            ),
            min_call_delay: Duration::from_millis(MIN_CALL_DELAY_MS),
            inactivity_timeout: Duration::from_millis(
                opt_parse("CALL_INACTIVITY_TIMEOUT_MS")?.unwrap_or(DEFAULT_INACTIVITY_TIMEOUT_MS),
            ),
            shutdown_grace: Duration::from_millis(
                opt_parse("SHUTDOWN_GRACE_MS")?.unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS),
            ),
        })
    }

    /// The media-stream WebSocket URL handed to the provider in TwiML.
    pub fn media_stream_url(&self) -> String {
        let ws_base = if let Some(rest) = self.server_public_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.server_public_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.server_public_url.clone()
        };
        format!("{ws_base}/outbound-media-stream")
    }

    pub fn twilio_status_callback_url(&self) -> String {
        format!("{}/webhooks/twilio/status", self.server_public_url)
    }

    pub fn twiml_url(&self, campaign_id: &str, contact_id: &str) -> String {
        format!(
            "{}/campaigns/{}/twiml?contact_id={}",
            self.server_public_url, campaign_id, contact_id
        )
    }
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

fn opt_parse<T: std::str::FromStr>(var: &str) -> Result<Option<T>, AppError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| AppError::Config(format!("invalid {var}: {raw}"))),
        Err(_) => Ok(None),
    }
}
