//! Provider callback endpoints: telephony status updates and the agent's
//! post-call notifications. Signatures, when configured, are verified before
//! any state mutates.

use crate::error::AppError;
use crate::events::ServerEvent;
use crate::model::{AnsweredBy, CallPatch, CallStatus, TerminatedBy};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use outdial_twilio::webhook::{params_from_form_body, validate_signature, StatusCallbackParams};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// `POST /webhooks/twilio/status`
///
/// Form-encoded call status callback. Terminal statuses flow through the
/// engine for stats, contact resolution, and the completion check.
pub async fn twilio_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, AppError> {
    if state.config.twilio_validate_signature {
        let signature = headers
            .get("x-twilio-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::InvalidSignature)?;
        let url = state.config.twilio_status_callback_url();
        let params = params_from_form_body(&body);
        if !validate_signature(&state.config.twilio_auth_token, &url, &params, signature) {
            return Err(AppError::InvalidSignature);
        }
    }

    let params: StatusCallbackParams = serde_urlencoded::from_str(&body)
        .map_err(|err| AppError::BadRequest(format!("invalid status callback: {err}")))?;

    let Some(status) = CallStatus::from_provider(&params.call_status) else {
        warn!(call_status = %params.call_status, "unknown provider call status");
        return Ok(StatusCode::NO_CONTENT);
    };

    let patch = CallPatch {
        duration_secs: params.duration_secs(),
        answered_by: params.answered_by.as_deref().map(AnsweredBy::from_amd),
        ..Default::default()
    };

    match state
        .call_store
        .update_status(&params.call_sid, status, patch)
    {
        Ok((call, change)) => {
            if change.changed {
                state.events.publish(ServerEvent::CallUpdate {
                    call_sid: call.sid.clone(),
                    status: call.status,
                    campaign_id: call.campaign_id.clone(),
                });
            }
            if change.became_in_progress || change.became_terminal {
                state.engine.handle_call_transition(&call, &change);
            }
        }
        Err(AppError::CallNotFound(_)) => {
            warn!(call_sid = %params.call_sid, "status callback for unknown call");
        }
        Err(err) => return Err(err),
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PostCallPayload {
    pub r#type: String,
    #[serde(default)]
    pub data: Option<PostCallData>,
}

#[derive(Debug, Deserialize)]
pub struct PostCallData {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<PostCallMetadata>,
    #[serde(default)]
    pub transcript: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct PostCallMetadata {
    #[serde(default)]
    pub call_sid: Option<String>,
}

impl PostCallPayload {
    fn call_sid(&self) -> Option<&str> {
        self.data
            .as_ref()?
            .metadata
            .as_ref()?
            .call_sid
            .as_deref()
    }

    fn conversation_id(&self) -> Option<&str> {
        self.data.as_ref()?.conversation_id.as_deref()
    }
}

/// `POST /webhooks/elevenlabs/post-call`
///
/// JSON agent webhook. On `conversation_completed` the provider call, if
/// still live, is hung up with the conversation-completed attribution.
pub async fn elevenlabs_post_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let body_str = std::str::from_utf8(&body)
        .map_err(|_| AppError::BadRequest("body is not utf-8".to_string()))?;

    // Verification is skipped only when no secret is configured.
    if let Some(secret) = &state.config.elevenlabs_webhook_secret {
        let header = headers
            .get("elevenlabs-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::InvalidSignature)?;
        verify_elevenlabs_signature(secret, header, body_str)?;
    }

    let payload: PostCallPayload = serde_json::from_str(body_str)
        .map_err(|err| AppError::BadRequest(format!("invalid post-call payload: {err}")))?;

    match payload.r#type.as_str() {
        "conversation_completed" => {
            let Some(call_sid) = payload.call_sid().map(str::to_string) else {
                debug!("conversation_completed without call sid");
                return Ok(StatusCode::OK);
            };
            match state.call_store.get(&call_sid) {
                Ok(call) if !call.status.is_terminal() => {
                    state.call_store.merge_patch(
                        &call_sid,
                        CallPatch {
                            terminated_by: Some(TerminatedBy::ConversationCompleted),
                            conversation_id: payload.conversation_id().map(str::to_string),
                            ..Default::default()
                        },
                    )?;
                    info!(%call_sid, "conversation completed, ending call");
                    if !state.registry().shutdown(&call_sid) {
                        // No live bridge in this process; hang up directly.
                        if let Err(err) = state.bridge.telephony.hang_up(&call_sid).await {
                            warn!(%call_sid, error = %err, "hangup after conversation_completed failed");
                        }
                    }
                }
                Ok(_) => {
                    if let Some(conversation_id) = payload.conversation_id() {
                        let _ = state.call_store.link_conversation(&call_sid, conversation_id);
                    }
                }
                Err(_) => warn!(%call_sid, "conversation_completed for unknown call"),
            }
        }
        "post_call_transcription" => {
            if let Some(call_sid) = payload.call_sid() {
                if let Some(conversation_id) = payload.conversation_id() {
                    let _ = state.call_store.link_conversation(call_sid, conversation_id);
                }
                let turns = payload
                    .data
                    .as_ref()
                    .and_then(|d| d.transcript.as_ref())
                    .map(Vec::len)
                    .unwrap_or(0);
                state.call_store.append_event(
                    call_sid,
                    "transcript_received",
                    serde_json::json!({ "turns": turns }),
                );
            }
        }
        other => debug!(webhook_type = other, "ignoring post-call webhook type"),
    }

    Ok(StatusCode::OK)
}

/// Verifies the `t=<timestamp>,v0=<hex hmac>` signature header over
/// `"{timestamp}.{body}"`.
fn verify_elevenlabs_signature(secret: &str, header: &str, body: &str) -> Result<(), AppError> {
    let mut timestamp = None;
    let mut v0 = None;
    for part in header.split(',') {
        if let Some(t) = part.trim().strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(hash) = part.trim().strip_prefix("v0=") {
            v0 = Some(hash);
        }
    }
    let (Some(timestamp), Some(v0)) = (timestamp, v0) else {
        return Err(AppError::InvalidSignature);
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(format!("{timestamp}.{body}").as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if expected.as_bytes().ct_eq(v0.as_bytes()).unwrap_u8() == 1 {
        Ok(())
    } else {
        Err(AppError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{body}").as_bytes());
        format!("t={timestamp},v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_passes() {
        let body = r#"{"type":"conversation_completed"}"#;
        let header = sign("secret", "1712000000", body);
        assert!(verify_elevenlabs_signature("secret", &header, body).is_ok());
    }

    #[test]
    fn tampered_body_fails() {
        let header = sign("secret", "1712000000", r#"{"type":"conversation_completed"}"#);
        let err = verify_elevenlabs_signature("secret", &header, r#"{"type":"other"}"#);
        assert!(matches!(err, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = "{}";
        let header = sign("secret", "1712000000", body);
        assert!(verify_elevenlabs_signature("other", &header, body).is_err());
    }

    #[test]
    fn malformed_header_fails() {
        assert!(verify_elevenlabs_signature("secret", "v0=abc", "{}").is_err());
        assert!(verify_elevenlabs_signature("secret", "t=123", "{}").is_err());
    }

    #[test]
    fn post_call_payload_paths() {
        let payload: PostCallPayload = serde_json::from_str(
            r#"{
                "type": "post_call_transcription",
                "data": {
                    "conversation_id": "conv_1",
                    "metadata": {"call_sid": "CA1"},
                    "transcript": [{"role": "agent", "message": "hi"}]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(payload.call_sid(), Some("CA1"));
        assert_eq!(payload.conversation_id(), Some("conv_1"));
    }
}
