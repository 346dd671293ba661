use crate::model::Call;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-memory runtime state for one active campaign.
pub struct CampaignRuntime {
    pub campaign_id: String,
    /// Call sid → in-flight call, bounded by `max_concurrent_calls`.
    pub active_calls: Mutex<HashMap<String, ActiveCall>>,
    /// Cycle guard: a tick landing while a cycle runs is dropped.
    pub cycle_running: AtomicBool,
    pub cancel: CancellationToken,
    pub call_delay: Duration,
}

#[derive(Clone, Debug)]
pub struct ActiveCall {
    pub contact_id: Option<String>,
    pub phone_number: String,
    pub name: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ActiveCall {
    pub fn from_call(call: &Call) -> Self {
        ActiveCall {
            contact_id: call.contact_id.clone(),
            phone_number: call.to.clone(),
            name: None,
            started_at: call.start_time,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
