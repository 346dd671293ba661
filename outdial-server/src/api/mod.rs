use crate::bridge::media_stream_handler;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::broadcast;
use tracing::warn;

pub mod calls;
pub mod campaigns;
pub mod webhooks;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(
            "/campaigns",
            post(campaigns::create_campaign).get(campaigns::list_campaigns),
        )
        .route("/campaigns/{id}", get(campaigns::get_campaign))
        .route(
            "/campaigns/{id}/contacts",
            post(campaigns::add_contacts).get(campaigns::list_contacts),
        )
        .route(
            "/campaigns/{id}/twiml",
            get(campaigns::campaign_twiml).post(campaigns::campaign_twiml),
        )
        .route("/campaigns/{id}/start", post(campaigns::start_campaign))
        .route("/campaigns/{id}/pause", post(campaigns::pause_campaign))
        .route("/campaigns/{id}/resume", post(campaigns::resume_campaign))
        .route("/campaigns/{id}/stop", post(campaigns::stop_campaign))
        .route("/campaigns/{id}/cancel", post(campaigns::cancel_campaign))
        .route("/calls/{sid}", get(calls::get_call))
        .route("/calls/{sid}/events", get(calls::get_call_events))
        .route("/outbound-media-stream", get(media_stream_handler))
        .route("/webhooks/twilio/status", post(webhooks::twilio_status))
        .route(
            "/webhooks/elevenlabs/post-call",
            post(webhooks::elevenlabs_post_call),
        )
        .route("/events", get(events_ws))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Streams the event bus to a WebSocket subscriber (the dashboard). Lagging
/// subscribers observe a gap, never block publishers.
async fn events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let mut rx = state.events.subscribe();
    ws.on_upgrade(move |mut socket| async move {
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(event) => {
                        let Ok(json) = serde_json::to_string(&event) else { continue };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event subscriber lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                msg = socket.recv() => {
                    if msg.is_none() {
                        break;
                    }
                }
            }
        }
    })
}
