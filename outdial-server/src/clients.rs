//! Provider client seams. The engine and bridge talk to these traits; the
//! live implementations wrap the Twilio and ElevenLabs clients, and tests
//! substitute mocks.

use crate::error::AppError;
use async_trait::async_trait;
use outdial_convai::ConvAIClient;
use outdial_twilio::{CreateCall, TwilioClient};
use tracing::info;

/// A request to dial one contact.
#[derive(Clone, Debug)]
pub struct PlaceCall {
    pub to: String,
    pub from: String,
    pub region: Option<String>,
    pub twiml_url: String,
    pub status_callback_url: String,
}

#[async_trait]
pub trait TelephonyApi: Send + Sync {
    /// Places the call and returns the provider-assigned call sid.
    async fn place_call(&self, call: PlaceCall) -> Result<String, AppError>;

    /// Force-terminates a call. Idempotent; an already-terminal call is not
    /// an error.
    async fn hang_up(&self, call_sid: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait AgentGateway: Send + Sync {
    /// A fresh single-use signed WebSocket URL for the agent.
    async fn signed_url(&self, agent_id: &str) -> Result<String, AppError>;
}

/// Live telephony implementation over the Twilio REST client.
pub struct TwilioDialer {
    client: TwilioClient,
}

impl TwilioDialer {
    pub fn new(client: TwilioClient) -> Self {
        Self { client }
    }

    fn client_for_region(&self, region: Option<&str>) -> TwilioClient {
        match region {
            Some(region) => self
                .client
                .clone()
                .with_api_host(format!("https://api.{region}.twilio.com")),
            None => self.client.clone(),
        }
    }
}

#[async_trait]
impl TelephonyApi for TwilioDialer {
    async fn place_call(&self, call: PlaceCall) -> Result<String, AppError> {
        let client = self.client_for_region(call.region.as_deref());
        let create = CreateCall::new(call.to, call.from, call.twiml_url)
            .with_status_callback(call.status_callback_url)
            .with_machine_detection();
        let resp = client.create_call(create).await?;
        info!(call_sid = %resp.sid, to = %resp.to, "placed outbound call");
        Ok(resp.sid)
    }

    async fn hang_up(&self, call_sid: &str) -> Result<(), AppError> {
        self.client.complete_call(call_sid).await?;
        Ok(())
    }
}

/// Live agent gateway over the conversational-AI REST client.
pub struct ElevenLabsGateway {
    client: ConvAIClient,
}

impl ElevenLabsGateway {
    pub fn new(client: ConvAIClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentGateway for ElevenLabsGateway {
    async fn signed_url(&self, agent_id: &str) -> Result<String, AppError> {
        Ok(self.client.get_signed_url(agent_id).await?)
    }
}
