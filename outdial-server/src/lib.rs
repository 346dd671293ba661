//! Outbound campaign dialer.
//!
//! Drives campaigns that dial contact lists with bounded concurrency and
//! bridges each answered call's media stream to a conversational agent. The
//! two core pieces are the campaign engine ([`engine`]) and the per-call
//! media bridge ([`bridge`]); around them sit the stores, the webhook
//! router, and the event bus.

pub mod api;
pub mod bridge;
pub mod clients;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;
