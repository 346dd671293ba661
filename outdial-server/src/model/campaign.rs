use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Campaign lifecycle state. Terminal states are sticky.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Cancelled)
    }

    /// Permitted transitions: draft→active, active↔paused,
    /// active|paused→completed|cancelled.
    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Completed)
                | (Active, Cancelled)
                | (Paused, Completed)
                | (Paused, Cancelled)
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The fixed agent configuration a campaign dials with.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Overrides the process-wide default agent when set.
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub first_message: Option<String>,
    /// Caller id; falls back to the configured provider number.
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CampaignSettings {
    pub max_concurrent_calls: usize,
    pub call_delay_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl CampaignSettings {
    pub fn call_delay(&self) -> Duration {
        Duration::from_millis(self.call_delay_ms)
    }
}

impl Default for CampaignSettings {
    fn default() -> Self {
        CampaignSettings {
            max_concurrent_calls: crate::config::DEFAULT_MAX_CONCURRENT,
            call_delay_ms: crate::config::DEFAULT_CALL_DELAY_MS,
            retry_count: 0,
            retry_delay_ms: 0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total_contacts: u64,
    pub calls_placed: u64,
    pub calls_answered: u64,
    pub calls_completed: u64,
    pub calls_failed: u64,
    pub average_duration_secs: f64,
}

/// An additive stats update. The duration sample, when present, feeds the
/// running mean before the completed counter moves.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatsDelta {
    pub calls_placed: i64,
    pub calls_answered: i64,
    pub calls_completed: i64,
    pub calls_failed: i64,
    pub duration_sample_secs: Option<f64>,
}

impl CampaignStats {
    pub fn apply(&mut self, delta: StatsDelta) {
        if let Some(sample) = delta.duration_sample_secs {
            let prior_count = self.calls_completed as f64;
            self.average_duration_secs =
                (self.average_duration_secs * prior_count + sample) / (prior_count + 1.0);
        }
        self.calls_placed = add_signed(self.calls_placed, delta.calls_placed);
        self.calls_answered = add_signed(self.calls_answered, delta.calls_answered);
        self.calls_completed = add_signed(self.calls_completed, delta.calls_completed);
        self.calls_failed = add_signed(self.calls_failed, delta.calls_failed);
    }
}

fn add_signed(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub contact_ids: Vec<String>,
    pub agent: AgentConfig,
    pub settings: CampaignSettings,
    pub status: CampaignStatus,
    pub stats: CampaignStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_executed: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn new(id: String, name: String, agent: AgentConfig, settings: CampaignSettings) -> Self {
        let now = Utc::now();
        Campaign {
            id,
            name,
            contact_ids: Vec::new(),
            agent,
            settings,
            status: CampaignStatus::Draft,
            stats: CampaignStats::default(),
            created_at: now,
            updated_at: now,
            last_executed: None,
        }
    }
}
