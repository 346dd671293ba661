pub mod call;
pub mod campaign;
pub mod contact;

pub use call::{
    AnsweredBy, Call, CallEvent, CallOutcome, CallPatch, CallStatus, TerminatedBy,
};
pub use campaign::{
    AgentConfig, Campaign, CampaignSettings, CampaignStats, CampaignStatus, StatsDelta,
};
pub use contact::{normalize_phone, Contact, ContactOutcome, ContactStatus};
