use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use outdial_convai::ConvAIError;
use outdial_twilio::TwilioError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("contact not found: {0}")]
    ContactNotFound(String),

    #[error("call not found: {0}")]
    CallNotFound(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid phone number: {0:?}")]
    InvalidPhoneNumber(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("webhook signature rejected")]
    InvalidSignature,

    #[error("media bridge setup failed: {0}")]
    BridgeSetup(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("telephony error: {0}")]
    Telephony(#[from] TwilioError),

    #[error("agent error: {0}")]
    ConvAI(#[from] ConvAIError),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::CampaignNotFound(_)
            | AppError::ContactNotFound(_)
            | AppError::CallNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::InvalidPhoneNumber(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidSignature => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
        }

        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
