use thiserror::Error;

#[derive(Debug, Error)]
pub enum TwilioError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("twilio api error: status {status}, code {code:?}: {message}")]
    Api {
        status: u16,
        code: Option<u32>,
        message: String,
    },

    #[error("environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("missing TWILIO_PHONE_NUMBER environment variable")]
    MissingPhoneNumberEnvVar,

    #[error("json deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
