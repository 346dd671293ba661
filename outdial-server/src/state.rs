use crate::bridge::{BridgeConfig, BridgeDeps, BridgeRegistry};
use crate::clients::{AgentGateway, TelephonyApi};
use crate::config::Config;
use crate::engine::CampaignEngine;
use crate::events::EventBus;
use crate::store::{CallStore, CampaignStore, ContactStore};
use std::sync::Arc;

/// Process-wide service graph, constructed once at boot.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub contact_store: Arc<ContactStore>,
    pub campaign_store: Arc<CampaignStore>,
    pub call_store: Arc<CallStore>,
    pub engine: Arc<CampaignEngine>,
    pub events: EventBus,
    pub bridge: BridgeDeps,
}

impl AppState {
    pub fn new(
        config: Config,
        telephony: Arc<dyn TelephonyApi>,
        agent_gateway: Arc<dyn AgentGateway>,
    ) -> Self {
        let config = Arc::new(config);
        let contact_store = Arc::new(ContactStore::new());
        let campaign_store = Arc::new(CampaignStore::new());
        let call_store = Arc::new(CallStore::new());
        let events = EventBus::new();

        let engine = Arc::new(CampaignEngine::new(
            &config,
            Arc::clone(&contact_store),
            Arc::clone(&campaign_store),
            Arc::clone(&call_store),
            Arc::clone(&telephony),
            events.clone(),
        ));

        let bridge = BridgeDeps {
            call_store: Arc::clone(&call_store),
            telephony,
            agent_gateway,
            engine: Arc::clone(&engine),
            events: events.clone(),
            registry: Arc::new(BridgeRegistry::new()),
            config: BridgeConfig::from_config(&config),
            default_agent_id: config.elevenlabs_agent_id.clone(),
        };

        AppState {
            config,
            contact_store,
            campaign_store,
            call_store,
            engine,
            events,
            bridge,
        }
    }

    pub fn registry(&self) -> &Arc<BridgeRegistry> {
        &self.bridge.registry
    }
}
