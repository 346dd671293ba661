use crate::error::AppError;
use crate::model::{AgentConfig, Campaign, CampaignSettings, Contact};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use outdial_twilio::{StreamNoun, VoiceResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub settings: Option<SettingsRequest>,
    #[serde(default)]
    pub contacts: Vec<NewContactRequest>,
}

#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    pub max_concurrent_calls: Option<usize>,
    pub call_delay_ms: Option<u64>,
    pub retry_count: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct NewContactRequest {
    pub phone_number: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: u8,
}

pub async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<Campaign>), AppError> {
    let mut settings = CampaignSettings {
        max_concurrent_calls: state.config.default_max_concurrent,
        call_delay_ms: state.config.default_call_delay.as_millis() as u64,
        ..Default::default()
    };
    if let Some(overrides) = req.settings {
        if let Some(max) = overrides.max_concurrent_calls {
            settings.max_concurrent_calls = max;
        }
        if let Some(delay) = overrides.call_delay_ms {
            settings.call_delay_ms = delay;
        }
        if let Some(retries) = overrides.retry_count {
            settings.retry_count = retries;
        }
        if let Some(delay) = overrides.retry_delay_ms {
            settings.retry_delay_ms = delay;
        }
    }

    let campaign = state.campaign_store.insert(Campaign::new(
        Uuid::new_v4().to_string(),
        req.name,
        req.agent,
        settings,
    ));

    let campaign = enroll_contacts(&state, &campaign.id, req.contacts)?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

pub async fn list_campaigns(State(state): State<AppState>) -> Json<Vec<Campaign>> {
    Json(state.campaign_store.list())
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(state.campaign_store.get(&id)?))
}

pub async fn add_contacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(contacts): Json<Vec<NewContactRequest>>,
) -> Result<Json<Campaign>, AppError> {
    state.campaign_store.get(&id)?;
    Ok(Json(enroll_contacts(&state, &id, contacts)?))
}

pub async fn list_contacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Contact>>, AppError> {
    state.campaign_store.get(&id)?;
    Ok(Json(state.contact_store.list_for_campaign(&id)))
}

fn enroll_contacts(
    state: &AppState,
    campaign_id: &str,
    contacts: Vec<NewContactRequest>,
) -> Result<Campaign, AppError> {
    let mut ids = Vec::with_capacity(contacts.len());
    for req in contacts {
        let contact = state.contact_store.insert(Contact::new(
            Uuid::new_v4().to_string(),
            &req.phone_number,
            req.name,
            req.priority,
        )?);
        state.contact_store.enroll(&contact.id, campaign_id)?;
        ids.push(contact.id);
    }
    state.campaign_store.add_contacts(campaign_id, &ids)
}

pub async fn start_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(state.engine.start(&id)?))
}

pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(state.engine.pause(&id)?))
}

pub async fn resume_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(state.engine.resume(&id)?))
}

pub async fn stop_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(state.engine.stop(&id)?))
}

pub async fn cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(state.engine.cancel(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct TwimlQuery {
    pub contact_id: String,
}

/// The control document the provider fetches when the call connects. It
/// points the call's media stream at the bridge and carries the campaign's
/// agent parameters as stream custom parameters.
pub async fn campaign_twiml(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TwimlQuery>,
) -> Result<Response, AppError> {
    let campaign = state.campaign_store.get(&id)?;
    let contact = state.contact_store.get(&query.contact_id)?;

    let mut stream = StreamNoun::url(state.config.media_stream_url())
        .parameter("campaign_id", &campaign.id)
        .parameter("contact_id", &contact.id)
        .parameter("contact_name", &contact.name);
    if let Some(agent_id) = &campaign.agent.agent_id {
        stream = stream.parameter("agent_id", agent_id);
    }
    if let Some(prompt) = &campaign.agent.prompt {
        stream = stream.parameter("prompt", prompt);
    }
    if let Some(first_message) = &campaign.agent.first_message {
        stream = stream.parameter("first_message", first_message);
    }

    let xml = VoiceResponse::new().connect_stream(stream).to_xml();
    Ok(([(header::CONTENT_TYPE, "text/xml")], xml).into_response())
}
