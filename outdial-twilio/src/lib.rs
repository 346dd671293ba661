//! Twilio voice client for the outdial campaign dialer.
//!
//! Covers the slice of Twilio's surface the dialer needs: placing and ending
//! calls against the 2010-04-01 REST API, rendering `<Connect><Stream>` TwiML,
//! the media-stream WebSocket frame types, and status-callback request
//! validation.

pub mod client;
pub mod error;
pub mod stream;
pub mod twiml;
pub mod webhook;

pub use client::{CallResponse, CreateCall, TwilioClient};
pub use error::TwilioError;
pub use stream::{ClearMessage, MediaMessage, StartMeta, TwilioMessage};
pub use twiml::{StreamNoun, VoiceResponse};
pub use webhook::{validate_signature, StatusCallbackParams};

pub type Result<T> = std::result::Result<T, TwilioError>;
