use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A contact's lifecycle within one campaign.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "calling")]
    Calling,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "no-answer")]
    NoAnswer,
    #[serde(rename = "do-not-call")]
    DoNotCall,
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContactStatus::Pending => "pending",
            ContactStatus::Calling => "calling",
            ContactStatus::Completed => "completed",
            ContactStatus::Failed => "failed",
            ContactStatus::NoAnswer => "no-answer",
            ContactStatus::DoNotCall => "do-not-call",
        };
        f.write_str(s)
    }
}

/// The resolution of a claimed contact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContactOutcome {
    Completed,
    Failed,
    NoAnswer,
}

impl ContactOutcome {
    pub fn as_status(self) -> ContactStatus {
        match self {
            ContactOutcome::Completed => ContactStatus::Completed,
            ContactOutcome::Failed => ContactStatus::Failed,
            ContactOutcome::NoAnswer => ContactStatus::NoAnswer,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    /// Digits only, with an optional leading `+`.
    pub phone_number: String,
    pub name: String,
    pub priority: u8,
    /// Total claim count across campaigns; never decremented.
    pub call_count: u32,
    pub last_call_result: Option<String>,
    pub last_call_date: Option<DateTime<Utc>>,
    pub last_contacted: Option<DateTime<Utc>>,
    /// Per-campaign status, keyed by campaign id.
    pub campaigns: HashMap<String, ContactStatus>,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(
        id: String,
        phone_number: impl AsRef<str>,
        name: impl Into<String>,
        priority: u8,
    ) -> Result<Self, AppError> {
        Ok(Contact {
            id,
            phone_number: normalize_phone(phone_number.as_ref())?,
            name: name.into(),
            priority: priority.min(10),
            call_count: 0,
            last_call_result: None,
            last_call_date: None,
            last_contacted: None,
            campaigns: HashMap::new(),
            created_at: Utc::now(),
        })
    }

    pub fn status_in(&self, campaign_id: &str) -> Option<ContactStatus> {
        self.campaigns.get(campaign_id).copied()
    }
}

/// Normalizes a phone number to digits only, preserving a leading `+`.
pub fn normalize_phone(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(AppError::InvalidPhoneNumber(raw.to_string()));
    }
    if trimmed.starts_with('+') {
        Ok(format!("+{digits}"))
    } else {
        Ok(digits)
    }
}
