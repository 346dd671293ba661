//! Campaign execution engine.
//!
//! Each active campaign owns one control task: a ticker that claims pending
//! contacts up to the concurrency cap and places calls. The engine owns only
//! in-memory runtime state (the active-call set per campaign); the stores
//! stay authoritative, and on restart the active-call set is rebuilt from
//! the call store.

use crate::clients::{PlaceCall, TelephonyApi};
use crate::config::Config;
use crate::error::AppError;
use crate::events::{EventBus, ServerEvent};
use crate::model::{
    Call, Campaign, CampaignStatus, ContactOutcome, Contact, StatsDelta,
};
use crate::store::{CallStore, CampaignStore, ContactStore, StatusChange};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod runtime;

pub use runtime::{ActiveCall, CampaignRuntime};

pub struct CampaignEngine {
    campaigns: DashMap<String, Arc<CampaignRuntime>>,
    contact_store: Arc<ContactStore>,
    campaign_store: Arc<CampaignStore>,
    call_store: Arc<CallStore>,
    telephony: Arc<dyn TelephonyApi>,
    events: EventBus,
    public_url: String,
    default_caller_id: String,
    min_call_delay: Duration,
}

impl CampaignEngine {
    pub fn new(
        config: &Config,
        contact_store: Arc<ContactStore>,
        campaign_store: Arc<CampaignStore>,
        call_store: Arc<CallStore>,
        telephony: Arc<dyn TelephonyApi>,
        events: EventBus,
    ) -> Self {
        CampaignEngine {
            campaigns: DashMap::new(),
            contact_store,
            campaign_store,
            call_store,
            telephony,
            events,
            public_url: config.server_public_url.clone(),
            default_caller_id: config.twilio_phone_number.clone(),
            min_call_delay: config.min_call_delay,
        }
    }

    pub fn is_running(&self, campaign_id: &str) -> bool {
        self.campaigns.contains_key(campaign_id)
    }

    pub fn active_call_count(&self, campaign_id: &str) -> usize {
        self.campaigns
            .get(campaign_id)
            .map(|rt| rt.active_calls.lock().len())
            .unwrap_or(0)
    }

    /// Starts (or re-adopts after a restart) a campaign. Idempotent: a
    /// campaign already running is a no-op. Refused for terminal campaigns.
    pub fn start(self: &Arc<Self>, campaign_id: &str) -> Result<Campaign, AppError> {
        if self.campaigns.contains_key(campaign_id) {
            return self.campaign_store.get(campaign_id);
        }

        let campaign = self.campaign_store.get(campaign_id)?;
        if campaign.status.is_terminal() {
            return Err(AppError::InvalidTransition {
                from: campaign.status.to_string(),
                to: CampaignStatus::Active.to_string(),
            });
        }

        let campaign = self
            .campaign_store
            .update_status(campaign_id, CampaignStatus::Active)?;

        // Rebuild the active-call set from durable state so a resume (or a
        // crash-restart) keeps counting in-flight calls against the cap.
        let mut active = HashMap::new();
        for call in self.call_store.active_for_campaign(campaign_id) {
            let mut entry = ActiveCall::from_call(&call);
            if let Some(contact_id) = call.contact_id.as_deref() {
                if let Ok(contact) = self.contact_store.get(contact_id) {
                    entry = entry.with_name(contact.name);
                }
            }
            active.insert(call.sid.clone(), entry);
        }

        let call_delay = campaign.settings.call_delay().max(self.min_call_delay);
        let runtime = Arc::new(CampaignRuntime {
            campaign_id: campaign_id.to_string(),
            active_calls: Mutex::new(active),
            cycle_running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            call_delay,
        });

        match self.campaigns.entry(campaign_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Ok(campaign),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&runtime));
            }
        }

        self.events.publish(ServerEvent::CampaignStatus {
            campaign_id: campaign_id.to_string(),
            status: CampaignStatus::Active,
        });
        info!(campaign_id, delay_ms = call_delay.as_millis() as u64, "campaign started");

        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_loop(runtime).await });
        Ok(campaign)
    }

    /// Resume is start on a paused campaign.
    pub fn resume(self: &Arc<Self>, campaign_id: &str) -> Result<Campaign, AppError> {
        let campaign = self.campaign_store.get(campaign_id)?;
        if campaign.status != CampaignStatus::Paused {
            return Err(AppError::InvalidTransition {
                from: campaign.status.to_string(),
                to: CampaignStatus::Active.to_string(),
            });
        }
        self.start(campaign_id)
    }

    /// Pauses the campaign. The runtime leaves the active set before the
    /// status is persisted, so once this returns no new cycle can place a
    /// call. In-flight calls drain naturally.
    pub fn pause(&self, campaign_id: &str) -> Result<Campaign, AppError> {
        self.detach(campaign_id);
        let campaign = self
            .campaign_store
            .update_status(campaign_id, CampaignStatus::Paused)?;
        self.events.publish(ServerEvent::CampaignStatus {
            campaign_id: campaign_id.to_string(),
            status: CampaignStatus::Paused,
        });
        info!(campaign_id, "campaign paused");
        Ok(campaign)
    }

    /// Stops the campaign for good: like pause, but terminal.
    pub fn stop(&self, campaign_id: &str) -> Result<Campaign, AppError> {
        self.detach(campaign_id);
        let campaign = self
            .campaign_store
            .update_status(campaign_id, CampaignStatus::Completed)?;
        self.events.publish(ServerEvent::CampaignStatus {
            campaign_id: campaign_id.to_string(),
            status: CampaignStatus::Completed,
        });
        info!(campaign_id, "campaign stopped");
        Ok(campaign)
    }

    pub fn cancel(&self, campaign_id: &str) -> Result<Campaign, AppError> {
        self.detach(campaign_id);
        let campaign = self
            .campaign_store
            .update_status(campaign_id, CampaignStatus::Cancelled)?;
        self.events.publish(ServerEvent::CampaignStatus {
            campaign_id: campaign_id.to_string(),
            status: CampaignStatus::Cancelled,
        });
        info!(campaign_id, "campaign cancelled");
        Ok(campaign)
    }

    /// Cancels all campaign loops (no new placements), then waits up to
    /// `grace` for in-flight calls to drain.
    pub async fn shutdown(&self, grace: Duration) {
        let ids: Vec<String> = self.campaigns.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.detach(&id);
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.call_store.active_call_count() == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("shutdown grace expired with calls still in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    fn detach(&self, campaign_id: &str) {
        if let Some((_, runtime)) = self.campaigns.remove(campaign_id) {
            runtime.cancel.cancel();
        }
    }

    async fn run_loop(self: Arc<Self>, runtime: Arc<CampaignRuntime>) {
        let mut ticker = tokio::time::interval(runtime.call_delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = runtime.cancel.cancelled() => break,
                _ = ticker.tick() => self.run_cycle(&runtime).await,
            }
        }
        debug!(campaign_id = %runtime.campaign_id, "campaign loop ended");
    }

    /// One cycle for one campaign. A compare-and-set flag keeps cycle bodies
    /// from overlapping; a tick landing mid-cycle is dropped, not queued.
    async fn run_cycle(&self, runtime: &Arc<CampaignRuntime>) {
        if runtime
            .cycle_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(campaign_id = %runtime.campaign_id, "cycle still running, dropping tick");
            return;
        }

        let result = self.cycle_inner(runtime).await;
        runtime.cycle_running.store(false, Ordering::SeqCst);

        if let Err(err) = result {
            error!(campaign_id = %runtime.campaign_id, error = %err, "campaign cycle failed");
        }
    }

    async fn cycle_inner(&self, runtime: &Arc<CampaignRuntime>) -> Result<(), AppError> {
        let campaign_id = runtime.campaign_id.as_str();

        // A tick can land after pause removed us from the active set.
        if !self.campaigns.contains_key(campaign_id) {
            return Ok(());
        }

        let campaign = self.campaign_store.get(campaign_id)?;
        if campaign.status != CampaignStatus::Active {
            return Ok(());
        }

        let in_flight = runtime.active_calls.lock().len();
        let available = campaign
            .settings
            .max_concurrent_calls
            .saturating_sub(in_flight);
        if available == 0 {
            return Ok(());
        }

        let mut claimed = 0usize;
        for _ in 0..available {
            if runtime.cancel.is_cancelled() {
                break;
            }
            let Some(contact) = self.contact_store.claim_next_for_calling(campaign_id) else {
                break;
            };
            claimed += 1;

            match self.place_call_for_contact(&campaign, &contact).await {
                Ok(call) => {
                    runtime.active_calls.lock().insert(
                        call.sid.clone(),
                        ActiveCall::from_call(&call).with_name(contact.name.clone()),
                    );
                    self.campaign_store.update_stats(
                        campaign_id,
                        StatsDelta {
                            calls_placed: 1,
                            ..Default::default()
                        },
                    )?;
                    self.events.publish(ServerEvent::NewCall {
                        call_sid: call.sid.clone(),
                        campaign_id: Some(campaign_id.to_string()),
                        to: call.to.clone(),
                    });
                }
                Err(err) => {
                    // The claim stays consumed: call_count keeps the contact
                    // out of the next scan, which is what prevents a retry
                    // storm against a failing number.
                    warn!(campaign_id, contact_id = %contact.id, error = %err, "call placement failed");
                    self.contact_store.resolve(
                        &contact.id,
                        campaign_id,
                        ContactOutcome::Failed,
                        "failed_to_initiate",
                    )?;
                }
            }
        }

        if claimed == 0 {
            self.completion_check(runtime)?;
        }
        Ok(())
    }

    /// Places the provider call for one claimed contact and persists the
    /// call row. The TwiML URL, once fetched by the provider, connects the
    /// call's media stream to the bridge with the campaign's agent
    /// parameters.
    async fn place_call_for_contact(
        &self,
        campaign: &Campaign,
        contact: &Contact,
    ) -> Result<Call, AppError> {
        let from = campaign
            .agent
            .caller_id
            .clone()
            .unwrap_or_else(|| self.default_caller_id.clone());
        let twiml_url = format!(
            "{}/campaigns/{}/twiml?contact_id={}",
            self.public_url, campaign.id, contact.id
        );
        let status_callback_url = format!("{}/webhooks/twilio/status", self.public_url);

        let sid = self
            .telephony
            .place_call(PlaceCall {
                to: contact.phone_number.clone(),
                from: from.clone(),
                region: campaign.agent.region.clone(),
                twiml_url,
                status_callback_url,
            })
            .await?;

        let call = self.call_store.save(
            Call::outbound(sid, from, contact.phone_number.clone())
                .for_campaign(campaign.id.clone(), contact.id.clone()),
        );
        Ok(call)
    }

    /// Runs after a cycle claims nothing and whenever a call goes terminal.
    /// The campaign completes only once no contact is pending or calling and
    /// the active set has drained.
    fn completion_check(&self, runtime: &Arc<CampaignRuntime>) -> Result<(), AppError> {
        let campaign_id = runtime.campaign_id.as_str();
        if !runtime.active_calls.lock().is_empty() {
            return Ok(());
        }

        let counts = self.contact_store.status_counts(campaign_id);
        if counts.pending == 0 && counts.calling == 0 {
            info!(campaign_id, "all contacts processed, completing campaign");
            self.stop(campaign_id)?;
        } else if counts.pending == 0 && counts.calling > 0 {
            // A contact claimed but never resolved (e.g. a crash between
            // claim and place) parks the campaign here; surfaced for the
            // operator rather than auto-recovered.
            warn!(
                campaign_id,
                stuck_calling = counts.calling,
                "campaign cannot complete: contacts stuck in calling"
            );
        }
        Ok(())
    }

    /// Applies the engine-side effects of a call status change committed to
    /// the call store: answered/terminal stats deltas, contact resolution,
    /// active-set removal, and the completion check.
    pub fn handle_call_transition(&self, call: &Call, change: &StatusChange) {
        if change.became_terminal {
            self.events.publish(ServerEvent::CallEnded {
                call_sid: call.sid.clone(),
                status: call.status,
                terminated_by: call.terminated_by,
                duration_secs: call.duration_secs,
            });
        }

        let Some(campaign_id) = call.campaign_id.as_deref() else {
            return;
        };

        if change.became_in_progress {
            if let Err(err) = self.campaign_store.update_stats(
                campaign_id,
                StatsDelta {
                    calls_answered: 1,
                    ..Default::default()
                },
            ) {
                warn!(campaign_id, error = %err, "stats update failed");
            }
            self.publish_stats(campaign_id);
        }

        if !change.became_terminal {
            return;
        }

        if let Some(contact_id) = call.contact_id.as_deref() {
            let outcome = match call.status {
                crate::model::CallStatus::Completed => ContactOutcome::Completed,
                crate::model::CallStatus::NoAnswer => ContactOutcome::NoAnswer,
                _ => ContactOutcome::Failed,
            };
            if let Err(err) =
                self.contact_store
                    .resolve(contact_id, campaign_id, outcome, &call.status.to_string())
            {
                warn!(contact_id, campaign_id, error = %err, "contact resolution failed");
            }
        }

        let delta = if call.status == crate::model::CallStatus::Completed {
            StatsDelta {
                calls_completed: 1,
                duration_sample_secs: Some(call.duration_secs.unwrap_or(0) as f64),
                ..Default::default()
            }
        } else {
            StatsDelta {
                calls_failed: 1,
                ..Default::default()
            }
        };
        if let Err(err) = self.campaign_store.update_stats(campaign_id, delta) {
            warn!(campaign_id, error = %err, "stats update failed");
        }

        self.publish_stats(campaign_id);

        if let Some(runtime) = self
            .campaigns
            .get(campaign_id)
            .map(|entry| Arc::clone(entry.value()))
        {
            runtime.active_calls.lock().remove(&call.sid);
            if let Err(err) = self.completion_check(&runtime) {
                warn!(campaign_id, error = %err, "completion check failed");
            }
        }
    }

    fn publish_stats(&self, campaign_id: &str) {
        if let Ok(campaign) = self.campaign_store.get(campaign_id) {
            self.events.publish(ServerEvent::CampaignStats {
                campaign_id: campaign_id.to_string(),
                stats: campaign.stats,
            });
        }
    }
}
