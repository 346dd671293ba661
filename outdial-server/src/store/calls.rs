use crate::error::AppError;
use crate::model::{
    AnsweredBy, Call, CallEvent, CallOutcome, CallPatch, CallStatus, TerminatedBy,
};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Calls shorter than this on teardown are taken as hung up by the callee.
const SHORT_CALL_SECS: u64 = 3;

/// What a status update actually did to the row.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusChange {
    pub changed: bool,
    pub became_in_progress: bool,
    pub became_terminal: bool,
}

#[derive(Default)]
pub struct CallStore {
    calls: RwLock<HashMap<String, Call>>,
    events: RwLock<HashMap<String, Vec<CallEvent>>>,
}

impl CallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the call row. Retried initial creates are idempotent: an
    /// existing row wins.
    pub fn save(&self, call: Call) -> Call {
        let mut calls = self.calls.write();
        if let Some(existing) = calls.get(&call.sid) {
            return existing.clone();
        }
        let sid = call.sid.clone();
        calls.insert(sid.clone(), call.clone());
        drop(calls);
        self.append_event(&sid, "call_created", serde_json::json!({ "to": call.to }));
        call
    }

    pub fn get(&self, call_sid: &str) -> Result<Call, AppError> {
        self.calls
            .read()
            .get(call_sid)
            .cloned()
            .ok_or_else(|| AppError::CallNotFound(call_sid.to_string()))
    }

    /// Moves the call forward through the status lattice and merges extras.
    ///
    /// Terminal rows are frozen: repeating a terminal update leaves the row
    /// byte-identical, and a conflicting late status is dropped. Backward
    /// transitions (a `ringing` callback arriving after `in-progress`) are
    /// dropped too.
    pub fn update_status(
        &self,
        call_sid: &str,
        new_status: CallStatus,
        patch: CallPatch,
    ) -> Result<(Call, StatusChange), AppError> {
        let mut calls = self.calls.write();
        let call = calls
            .get_mut(call_sid)
            .ok_or_else(|| AppError::CallNotFound(call_sid.to_string()))?;

        let mut change = StatusChange::default();

        if call.status.is_terminal() {
            if new_status != call.status {
                debug!(call_sid, current = %call.status, late = %new_status, "dropping status update for terminal call");
            }
            if call.conversation_id.is_none() {
                call.conversation_id = patch.conversation_id;
            }
            return Ok((call.clone(), change));
        }

        if new_status.rank() < call.status.rank() {
            debug!(call_sid, current = %call.status, stale = %new_status, "dropping backward status update");
            return Ok((call.clone(), change));
        }

        if new_status != call.status {
            change.changed = true;
            if new_status == CallStatus::InProgress && call.answer_time.is_none() {
                change.became_in_progress = true;
                call.answer_time = Some(Utc::now());
            }
            call.status = new_status;
        }

        merge_option(&mut call.conversation_id, patch.conversation_id);
        merge_option(&mut call.answered_by, patch.answered_by);
        merge_option(&mut call.terminated_by, patch.terminated_by);
        merge_option(&mut call.end_time, patch.end_time);
        merge_option(&mut call.duration_secs, patch.duration_secs);

        if new_status.is_terminal() {
            change.became_terminal = true;
            apply_terminal_defaults(call);
        }

        let snapshot = call.clone();
        drop(calls);

        if change.changed {
            self.append_event(
                call_sid,
                "status",
                serde_json::json!({ "status": new_status.to_string() }),
            );
        }
        Ok((snapshot, change))
    }

    /// Late linkage of the agent conversation id; allowed on frozen rows.
    pub fn link_conversation(&self, call_sid: &str, conversation_id: &str) -> Result<Call, AppError> {
        let mut calls = self.calls.write();
        let call = calls
            .get_mut(call_sid)
            .ok_or_else(|| AppError::CallNotFound(call_sid.to_string()))?;
        if call.conversation_id.is_none() {
            call.conversation_id = Some(conversation_id.to_string());
        }
        Ok(call.clone())
    }

    /// Merges terminator metadata ahead of the status reaching terminal, so
    /// an earlier, more specific attribution survives the generic teardown
    /// write.
    pub fn merge_patch(&self, call_sid: &str, patch: CallPatch) -> Result<Call, AppError> {
        let mut calls = self.calls.write();
        let call = calls
            .get_mut(call_sid)
            .ok_or_else(|| AppError::CallNotFound(call_sid.to_string()))?;
        merge_option(&mut call.conversation_id, patch.conversation_id);
        merge_option(&mut call.answered_by, patch.answered_by);
        merge_option(&mut call.terminated_by, patch.terminated_by);
        Ok(call.clone())
    }

    pub fn active_for_campaign(&self, campaign_id: &str) -> Vec<Call> {
        self.calls
            .read()
            .values()
            .filter(|c| !c.status.is_terminal() && c.campaign_id.as_deref() == Some(campaign_id))
            .cloned()
            .collect()
    }

    pub fn active_call_count(&self) -> usize {
        self.calls
            .read()
            .values()
            .filter(|c| !c.status.is_terminal())
            .count()
    }

    pub fn append_event(&self, call_sid: &str, event_type: &str, payload: serde_json::Value) {
        let mut events = self.events.write();
        events
            .entry(call_sid.to_string())
            .or_default()
            .push(CallEvent {
                call_sid: call_sid.to_string(),
                timestamp: Utc::now(),
                event_type: event_type.to_string(),
                payload,
            });
    }

    pub fn events_for(&self, call_sid: &str) -> Vec<CallEvent> {
        self.events
            .read()
            .get(call_sid)
            .cloned()
            .unwrap_or_default()
    }
}

fn merge_option<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if slot.is_none() {
        *slot = incoming;
    }
}

fn apply_terminal_defaults(call: &mut Call) {
    if call.end_time.is_none() {
        call.end_time = Some(Utc::now());
    }
    if call.duration_secs.is_none() {
        let end = call.end_time.unwrap_or_else(Utc::now);
        call.duration_secs = Some((end - call.start_time).num_seconds().max(0) as u64);
    }

    if call.answered_by.is_none() {
        call.answered_by = match call.status {
            CallStatus::Failed => Some(AnsweredBy::Failed),
            CallStatus::NoAnswer => Some(AnsweredBy::NoAnswer),
            CallStatus::Busy => Some(AnsweredBy::Busy),
            CallStatus::Canceled => Some(AnsweredBy::Unknown),
            _ => None,
        };
    }

    if call.terminated_by.is_none() {
        call.terminated_by = match call.status {
            CallStatus::Failed | CallStatus::Canceled => Some(TerminatedBy::System),
            CallStatus::NoAnswer => Some(TerminatedBy::Timeout),
            _ if call.duration_secs.unwrap_or(0) < SHORT_CALL_SECS => Some(TerminatedBy::User),
            _ => None,
        };
    }

    if call.outcome.is_none() {
        call.outcome = match call.status {
            CallStatus::Completed if call.answered_by == Some(AnsweredBy::Machine) => {
                Some(CallOutcome::Voicemail)
            }
            CallStatus::Completed => Some(CallOutcome::Held),
            CallStatus::NoAnswer => Some(CallOutcome::NoAnswer),
            CallStatus::Failed | CallStatus::Busy | CallStatus::Canceled => {
                Some(CallOutcome::Failed)
            }
            _ => None,
        };
    }
}
