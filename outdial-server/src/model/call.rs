use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider call status. Moves only forward through the lattice; the five
/// terminal states freeze the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    #[serde(rename = "initiated")]
    Initiated,
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "ringing")]
    Ringing,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "busy")]
    Busy,
    #[serde(rename = "no-answer")]
    NoAnswer,
    #[serde(rename = "canceled")]
    Canceled,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Failed
                | CallStatus::Busy
                | CallStatus::NoAnswer
                | CallStatus::Canceled
        )
    }

    /// Position in the forward-only lattice; terminals share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            CallStatus::Initiated => 0,
            CallStatus::Queued => 1,
            CallStatus::Ringing => 2,
            CallStatus::InProgress => 3,
            _ => 4,
        }
    }

    /// Maps a provider callback status string.
    pub fn from_provider(status: &str) -> Option<Self> {
        let status = match status {
            "initiated" => CallStatus::Initiated,
            "queued" => CallStatus::Queued,
            "ringing" => CallStatus::Ringing,
            "in-progress" | "answered" => CallStatus::InProgress,
            "completed" => CallStatus::Completed,
            "failed" => CallStatus::Failed,
            "busy" => CallStatus::Busy,
            "no-answer" => CallStatus::NoAnswer,
            "canceled" => CallStatus::Canceled,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Queued => "queued",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Busy => "busy",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnsweredBy {
    #[serde(rename = "human")]
    Human,
    #[serde(rename = "machine")]
    Machine,
    #[serde(rename = "fax")]
    Fax,
    #[serde(rename = "busy")]
    Busy,
    #[serde(rename = "no-answer")]
    NoAnswer,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "unknown")]
    Unknown,
}

impl AnsweredBy {
    /// Maps the provider's answering-machine-detection result.
    pub fn from_amd(value: &str) -> Self {
        match value {
            "human" => AnsweredBy::Human,
            "fax" => AnsweredBy::Fax,
            v if v.starts_with("machine") => AnsweredBy::Machine,
            _ => AnsweredBy::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatedBy {
    Agent,
    User,
    System,
    Timeout,
    ConversationCompleted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    #[serde(rename = "held")]
    Held,
    #[serde(rename = "voicemail")]
    Voicemail,
    #[serde(rename = "no-answer")]
    NoAnswer,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "unknown")]
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Outbound,
    Inbound,
}

/// One dial attempt, keyed by the provider-assigned call sid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Call {
    pub sid: String,
    pub conversation_id: Option<String>,
    pub status: CallStatus,
    pub from: String,
    pub to: String,
    pub direction: CallDirection,
    pub start_time: DateTime<Utc>,
    pub answer_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<u64>,
    pub answered_by: Option<AnsweredBy>,
    pub terminated_by: Option<TerminatedBy>,
    pub outcome: Option<CallOutcome>,
    pub campaign_id: Option<String>,
    pub contact_id: Option<String>,
}

impl Call {
    pub fn outbound(sid: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Call {
            sid: sid.into(),
            conversation_id: None,
            status: CallStatus::Initiated,
            from: from.into(),
            to: to.into(),
            direction: CallDirection::Outbound,
            start_time: Utc::now(),
            answer_time: None,
            end_time: None,
            duration_secs: None,
            answered_by: None,
            terminated_by: None,
            outcome: None,
            campaign_id: None,
            contact_id: None,
        }
    }

    pub fn for_campaign(mut self, campaign_id: impl Into<String>, contact_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self.contact_id = Some(contact_id.into());
        self
    }
}

/// Extra fields merged into a call on a status update. Fields already set on
/// the row win over late patches.
#[derive(Clone, Debug, Default)]
pub struct CallPatch {
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<u64>,
    pub answered_by: Option<AnsweredBy>,
    pub terminated_by: Option<TerminatedBy>,
    pub conversation_id: Option<String>,
}

/// Append-only timeline row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallEvent {
    pub call_sid: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub payload: serde_json::Value,
}
