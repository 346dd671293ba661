#![allow(dead_code)]

use async_trait::async_trait;
use outdial_server::clients::{AgentGateway, PlaceCall, TelephonyApi};
use outdial_server::error::AppError;
use outdial_server::model::{AgentConfig, Campaign, CampaignSettings, Contact};
use outdial_server::{AppState, Config};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Telephony stub: hands out sequential call sids and records traffic.
#[derive(Default)]
pub struct MockTelephony {
    pub placed: Mutex<Vec<PlaceCall>>,
    pub hangups: Mutex<Vec<String>>,
    pub fail_numbers: Mutex<HashSet<String>>,
    counter: AtomicU64,
}

impl MockTelephony {
    pub fn fail_for(&self, number: &str) {
        self.fail_numbers.lock().insert(number.to_string());
    }

    pub fn placed_count(&self) -> usize {
        self.placed.lock().len()
    }
}

#[async_trait]
impl TelephonyApi for MockTelephony {
    async fn place_call(&self, call: PlaceCall) -> Result<String, AppError> {
        if self.fail_numbers.lock().contains(&call.to) {
            return Err(AppError::BadRequest("provider rejected call".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.placed.lock().push(call);
        Ok(format!("CA{n:08}"))
    }

    async fn hang_up(&self, call_sid: &str) -> Result<(), AppError> {
        self.hangups.lock().push(call_sid.to_string());
        Ok(())
    }
}

/// Agent gateway stub pointing at a test WebSocket server.
#[derive(Default)]
pub struct MockAgentGateway {
    pub url: Mutex<String>,
    pub fail: AtomicBool,
    pub requests: AtomicU64,
}

impl MockAgentGateway {
    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.lock() = url.into();
    }
}

#[async_trait]
impl AgentGateway for MockAgentGateway {
    async fn signed_url(&self, _agent_id: &str) -> Result<String, AppError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::BadRequest("signed url unavailable".to_string()));
        }
        Ok(self.url.lock().clone())
    }
}

pub fn test_config() -> Config {
    Config {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        server_public_url: "https://dialer.test".to_string(),
        elevenlabs_agent_id: "agent_default".to_string(),
        elevenlabs_api_key: "test-key".to_string(),
        elevenlabs_webhook_secret: None,
        twilio_account_sid: "AC_test".to_string(),
        twilio_auth_token: "twilio-token".to_string(),
        twilio_phone_number: "+15557654321".to_string(),
        twilio_validate_signature: false,
        default_max_concurrent: 5,
        default_call_delay: Duration::from_millis(50),
        min_call_delay: Duration::from_millis(10),
        inactivity_timeout: Duration::from_secs(60),
        shutdown_grace: Duration::from_secs(1),
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub telephony: Arc<MockTelephony>,
    pub agent_gateway: Arc<MockAgentGateway>,
}

pub fn harness() -> TestHarness {
    harness_with_config(test_config())
}

pub fn harness_with_config(config: Config) -> TestHarness {
    let telephony = Arc::new(MockTelephony::default());
    let agent_gateway = Arc::new(MockAgentGateway::default());
    let state = AppState::new(
        config,
        Arc::clone(&telephony) as Arc<dyn TelephonyApi>,
        Arc::clone(&agent_gateway) as Arc<dyn AgentGateway>,
    );
    TestHarness {
        state,
        telephony,
        agent_gateway,
    }
}

impl TestHarness {
    /// Seeds a campaign with `numbers.len()` contacts straight through the
    /// stores.
    pub fn seed_campaign(
        &self,
        id: &str,
        numbers: &[&str],
        max_concurrent: usize,
        call_delay_ms: u64,
    ) -> Campaign {
        let campaign = self.state.campaign_store.insert(Campaign::new(
            id.to_string(),
            format!("campaign {id}"),
            AgentConfig {
                prompt: Some("Be brief.".to_string()),
                first_message: Some("Hello!".to_string()),
                ..Default::default()
            },
            CampaignSettings {
                max_concurrent_calls: max_concurrent,
                call_delay_ms,
                ..Default::default()
            },
        ));

        let mut ids = Vec::new();
        for (i, number) in numbers.iter().enumerate() {
            let contact = self
                .state
                .contact_store
                .insert(Contact::new(format!("{id}-ct{i:03}"), number, format!("Contact {i}"), 0).unwrap());
            self.state.contact_store.enroll(&contact.id, id).unwrap();
            ids.push(contact.id);
        }
        self.state.campaign_store.add_contacts(id, &ids).unwrap()
    }
}

/// Polls until `predicate` holds or the timeout elapses.
pub async fn wait_until<F: FnMut() -> bool>(mut predicate: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
