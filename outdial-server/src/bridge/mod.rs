//! Media bridge: the per-call WebSocket pair proxying audio between the
//! telephony media stream and the agent session.
//!
//! Each call runs five tasks around shared per-call state: two receive
//! loops, two send loops draining bounded frame queues, and one activity
//! watchdog. Audio is forwarded byte-for-byte — payloads are base64 on both
//! wires already and are never decoded or re-encoded. Teardown is gated by a
//! single compare-and-set so every shutdown path converges on one sequence.

use crate::bridge::queue::FrameQueue;
use crate::clients::{AgentGateway, TelephonyApi};
use crate::config::Config;
use crate::engine::CampaignEngine;
use crate::error::AppError;
use crate::events::{EventBus, ServerEvent};
use crate::model::{CallPatch, CallStatus, TerminatedBy};
use crate::state::AppState;
use crate::store::CallStore;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use outdial_convai::{
    AgentOverrideData, AgentSession, AgentSink, AgentStream, ConvAIError,
    ConversationInitiationClientData, OverrideData, PromptOverrideData, ServerMessage,
};
use outdial_twilio::stream::StartFrame;
use outdial_twilio::{ClearMessage, MediaMessage, TwilioMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod queue;

pub const DEFAULT_MALFORMED_BUDGET: u32 = 10;
pub const DEFAULT_QUEUE_BOUND: usize = 256;
const START_FRAME_BUDGET: usize = 16;
const START_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub inactivity_timeout: Duration,
    pub malformed_budget: u32,
    pub queue_bound: usize,
}

impl BridgeConfig {
    pub fn from_config(config: &Config) -> Self {
        BridgeConfig {
            inactivity_timeout: config.inactivity_timeout,
            ..Default::default()
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            inactivity_timeout: Duration::from_millis(crate::config::DEFAULT_INACTIVITY_TIMEOUT_MS),
            malformed_budget: DEFAULT_MALFORMED_BUDGET,
            queue_bound: DEFAULT_QUEUE_BOUND,
        }
    }
}

/// Live bridges by call sid, so webhooks and process shutdown can tear a
/// bridge down from outside.
#[derive(Default)]
pub struct BridgeRegistry {
    inner: DashMap<String, CancellationToken>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, call_sid: &str, cancel: CancellationToken) {
        self.inner.insert(call_sid.to_string(), cancel);
    }

    fn remove(&self, call_sid: &str) {
        self.inner.remove(call_sid);
    }

    /// Requests teardown of one live bridge. Returns false when no bridge is
    /// registered for the call.
    pub fn shutdown(&self, call_sid: &str) -> bool {
        match self.inner.get(call_sid) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn shutdown_all(&self) {
        for entry in self.inner.iter() {
            entry.value().cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Everything a bridge needs besides its sockets.
#[derive(Clone)]
pub struct BridgeDeps {
    pub call_store: Arc<CallStore>,
    pub telephony: Arc<dyn TelephonyApi>,
    pub agent_gateway: Arc<dyn AgentGateway>,
    pub engine: Arc<CampaignEngine>,
    pub events: EventBus,
    pub registry: Arc<BridgeRegistry>,
    pub config: BridgeConfig,
    pub default_agent_id: String,
}

/// Why the bridge came down; decides the terminator attribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ShutdownReason {
    /// The provider ended the stream (stop frame or socket close).
    ProviderStop,
    /// The agent closed its socket.
    AgentClosed,
    /// No traffic on either socket for the inactivity window.
    Inactivity,
    /// Too many consecutive malformed frames.
    Malformed,
    /// Cancelled from outside (webhook hangup, process shutdown).
    External,
}

impl ShutdownReason {
    fn as_str(self) -> &'static str {
        match self {
            ShutdownReason::ProviderStop => "provider_stop",
            ShutdownReason::AgentClosed => "agent_closed",
            ShutdownReason::Inactivity => "inactivity",
            ShutdownReason::Malformed => "malformed_frames",
            ShutdownReason::External => "external",
        }
    }

    fn terminated_by(self) -> TerminatedBy {
        match self {
            ShutdownReason::Inactivity => TerminatedBy::Timeout,
            ShutdownReason::ProviderStop => TerminatedBy::User,
            ShutdownReason::AgentClosed => TerminatedBy::Agent,
            ShutdownReason::Malformed | ShutdownReason::External => TerminatedBy::System,
        }
    }
}

/// Per-call state shared by the bridge tasks.
///
/// The inactivity timer is a monotonically advancing timestamp plus a
/// periodic sweep, deliberately not a cancel-and-reschedule timer. This is
/// the only inactivity authority for the call; nothing else may tear a call
/// down for idleness.
struct BridgeShared {
    call_sid: String,
    stream_sid: String,
    started: Instant,
    last_activity_ms: AtomicU64,
    tearing_down: AtomicBool,
    reason: Mutex<Option<ShutdownReason>>,
    cancel: CancellationToken,
}

impl BridgeShared {
    fn new(call_sid: String, stream_sid: String) -> Self {
        BridgeShared {
            call_sid,
            stream_sid,
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            tearing_down: AtomicBool::new(false),
            reason: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Every inbound frame on either socket lands here.
    fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now, Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        let now = self.started.elapsed().as_millis() as u64;
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }

    /// The teardown idempotency gate: only the first caller wins and records
    /// the reason.
    fn begin_shutdown(&self, reason: ShutdownReason) -> bool {
        if self
            .tearing_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.reason.lock() = Some(reason);
            self.cancel.cancel();
            true
        } else {
            false
        }
    }

    fn reason(&self) -> ShutdownReason {
        (*self.reason.lock()).unwrap_or(ShutdownReason::External)
    }
}

/// A frame bound for the telephony socket.
enum TwilioFrame {
    Media { payload: String },
    Clear,
}

/// A frame bound for the agent socket.
enum AgentFrame {
    Audio { payload: String },
    Pong { event_id: u32 },
}

pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    let deps = state.bridge.clone();
    ws.on_upgrade(move |socket| run_bridge(socket, deps))
}

/// Runs one call's bridge to completion.
pub async fn run_bridge(mut socket: WebSocket, deps: BridgeDeps) {
    let start = match wait_for_start(&mut socket).await {
        Ok(start) => start,
        Err(err) => {
            warn!(error = %err, "media stream ended before start frame");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let stream_sid = start.stream_sid.clone();
    let call_sid = start.start.call_sid.clone();
    let params = start.start.custom_parameters;
    info!(%call_sid, %stream_sid, "media stream started");
    deps.call_store.append_event(
        &call_sid,
        "bridge_started",
        serde_json::json!({ "stream_sid": stream_sid }),
    );

    let agent_id = params
        .get("agent_id")
        .cloned()
        .unwrap_or_else(|| deps.default_agent_id.clone());

    // The signed URL is single-use: fetched fresh for every call.
    let signed_url = match deps.agent_gateway.signed_url(&agent_id).await {
        Ok(url) => url,
        Err(err) => {
            fail_call(&deps, &call_sid, &err, "agent signed url fetch failed");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let session = match AgentSession::connect(&signed_url, initiation_data(&params)).await {
        Ok(session) => session,
        Err(err) => {
            let err = AppError::from(err);
            fail_call(&deps, &call_sid, &err, "agent session connect failed");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let shared = Arc::new(BridgeShared::new(call_sid.clone(), stream_sid));
    shared.touch();
    deps.registry.register(&call_sid, shared.cancel.clone());

    let (agent_sink, agent_stream) = session.split();
    let (twilio_sink, twilio_stream) = socket.split();

    let to_twilio = Arc::new(FrameQueue::<TwilioFrame>::new(deps.config.queue_bound));
    let to_agent = Arc::new(FrameQueue::<AgentFrame>::new(deps.config.queue_bound));

    let twilio_writer = tokio::spawn(write_telephony(
        twilio_sink,
        Arc::clone(&to_twilio),
        Arc::clone(&shared),
    ));
    let agent_writer = tokio::spawn(write_agent(
        agent_sink,
        Arc::clone(&to_agent),
        Arc::clone(&shared),
    ));
    let twilio_reader = tokio::spawn(read_telephony(
        twilio_stream,
        Arc::clone(&to_agent),
        Arc::clone(&shared),
        deps.config.malformed_budget,
    ));
    let agent_reader = tokio::spawn(read_agent(
        agent_stream,
        Arc::clone(&to_twilio),
        Arc::clone(&to_agent),
        Arc::clone(&shared),
        deps.clone(),
    ));
    let watchdog = tokio::spawn(watchdog(
        Arc::clone(&shared),
        deps.config.inactivity_timeout,
    ));

    // Any shutdown path cancels; the teardown sequence below is the only
    // place sockets are closed and the final call state is written.
    shared.cancel.cancelled().await;
    let reason = shared.reason();
    info!(%call_sid, reason = reason.as_str(), "bridge tearing down");

    to_agent.close();
    to_twilio.close();

    // Agent socket closes first.
    if let Ok(mut sink) = agent_writer.await {
        let _ = sink.close().await;
    }

    // Then the provider call, if it is still live.
    let call_terminal = deps
        .call_store
        .get(&call_sid)
        .map(|call| call.status.is_terminal())
        .unwrap_or(true);
    if !call_terminal {
        if let Err(err) = deps.telephony.hang_up(&call_sid).await {
            warn!(%call_sid, error = %err, "hangup failed during teardown");
        }
    }

    // Then the telephony socket.
    if let Ok(mut sink) = twilio_writer.await {
        let _ = sink.send(Message::Close(None)).await;
    }

    let _ = twilio_reader.await;
    let _ = agent_reader.await;
    let _ = watchdog.await;

    if to_twilio.dropped() > 0 || to_agent.dropped() > 0 {
        warn!(
            %call_sid,
            to_twilio_dropped = to_twilio.dropped(),
            to_agent_dropped = to_agent.dropped(),
            "bridge dropped media frames under backpressure"
        );
    }

    finish_call(&deps, &call_sid, reason);
    deps.registry.remove(&call_sid);
}

/// Reads frames until the provider's `start` event arrives. The preceding
/// `connected` frame and anything unexpected is skipped within a small
/// budget.
async fn wait_for_start(socket: &mut WebSocket) -> Result<StartFrame, AppError> {
    let handshake = async {
        for _ in 0..START_FRAME_BUDGET {
            let msg = match socket.recv().await {
                Some(Ok(msg)) => msg,
                Some(Err(err)) => {
                    return Err(AppError::BridgeSetup(format!("socket error: {err}")))
                }
                None => return Err(AppError::BridgeSetup("closed before start".to_string())),
            };
            match msg {
                Message::Text(text) => match TwilioMessage::try_from(text.as_str()) {
                    Ok(TwilioMessage::Start(frame)) => return Ok(frame),
                    Ok(TwilioMessage::Connected(_)) => continue,
                    Ok(other) => {
                        debug!(?other, "frame before start, skipping");
                        continue;
                    }
                    Err(err) => {
                        warn!(error = %err, "malformed frame before start");
                        continue;
                    }
                },
                Message::Close(_) => {
                    return Err(AppError::BridgeSetup("closed before start".to_string()))
                }
                _ => continue,
            }
        }
        Err(AppError::BridgeSetup("no start frame".to_string()))
    };

    tokio::time::timeout(START_TIMEOUT, handshake)
        .await
        .map_err(|_| AppError::BridgeSetup("timed out waiting for start".to_string()))?
}

fn initiation_data(params: &HashMap<String, String>) -> ConversationInitiationClientData {
    let mut agent = AgentOverrideData::default();
    let mut overridden = false;
    if let Some(prompt) = params.get("prompt") {
        agent = agent
            .with_prompt_override_data(PromptOverrideData::default().override_prompt(prompt));
        overridden = true;
    }
    if let Some(first_message) = params.get("first_message") {
        agent = agent.override_first_message(first_message);
        overridden = true;
    }

    let data = ConversationInitiationClientData::default();
    if overridden {
        data.with_override_data(OverrideData::default().with_agent_override_data(agent))
    } else {
        data
    }
}

async fn read_telephony(
    mut stream: SplitStream<WebSocket>,
    to_agent: Arc<FrameQueue<AgentFrame>>,
    shared: Arc<BridgeShared>,
    malformed_budget: u32,
) {
    let mut malformed = 0u32;
    loop {
        let msg = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            msg = stream.next() => msg,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(err)) => {
                debug!(call_sid = %shared.call_sid, error = %err, "telephony socket error");
                shared.begin_shutdown(ShutdownReason::ProviderStop);
                break;
            }
            None => {
                shared.begin_shutdown(ShutdownReason::ProviderStop);
                break;
            }
        };

        match msg {
            Message::Text(text) => match TwilioMessage::try_from(text.as_str()) {
                Ok(frame) => {
                    malformed = 0;
                    shared.touch();
                    match frame {
                        TwilioMessage::Media(media) => {
                            // The payload is base64 already; forward as-is.
                            to_agent.push_media(AgentFrame::Audio {
                                payload: media.media.payload,
                            });
                        }
                        TwilioMessage::Stop(_) => {
                            shared.begin_shutdown(ShutdownReason::ProviderStop);
                            break;
                        }
                        // Marks are delivery acks; they only count as activity.
                        TwilioMessage::Mark(_)
                        | TwilioMessage::Connected(_)
                        | TwilioMessage::Start(_)
                        | TwilioMessage::Dtmf(_) => {}
                    }
                }
                Err(err) => {
                    malformed += 1;
                    warn!(call_sid = %shared.call_sid, error = %err, malformed, "malformed telephony frame");
                    if malformed > malformed_budget {
                        shared.begin_shutdown(ShutdownReason::Malformed);
                        break;
                    }
                }
            },
            Message::Close(_) => {
                shared.begin_shutdown(ShutdownReason::ProviderStop);
                break;
            }
            Message::Ping(_) | Message::Pong(_) => shared.touch(),
            Message::Binary(_) => {
                malformed += 1;
                if malformed > malformed_budget {
                    shared.begin_shutdown(ShutdownReason::Malformed);
                    break;
                }
            }
        }
    }
}

async fn read_agent(
    mut stream: AgentStream,
    to_twilio: Arc<FrameQueue<TwilioFrame>>,
    to_agent: Arc<FrameQueue<AgentFrame>>,
    shared: Arc<BridgeShared>,
    deps: BridgeDeps,
) {
    let mut malformed = 0u32;
    loop {
        let msg = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            msg = stream.next() => msg,
        };
        let Some(result) = msg else {
            shared.begin_shutdown(ShutdownReason::AgentClosed);
            break;
        };

        match result {
            Ok(msg) => {
                malformed = 0;
                shared.touch();
                match msg {
                    ServerMessage::Audio(audio) => {
                        if let Some(chunk) = audio.chunk() {
                            to_twilio.push_media(TwilioFrame::Media {
                                payload: chunk.to_string(),
                            });
                        }
                    }
                    ServerMessage::Interruption(_) => {
                        to_twilio.push_control(TwilioFrame::Clear);
                    }
                    ServerMessage::Ping(ping) => {
                        to_agent.push_control(AgentFrame::Pong {
                            event_id: ping.ping_event.event_id,
                        });
                    }
                    ServerMessage::ConversationInitiationMetadata(meta) => {
                        let conversation_id =
                            meta.conversation_initiation_metadata_event.conversation_id;
                        if let Err(err) = deps
                            .call_store
                            .link_conversation(&shared.call_sid, &conversation_id)
                        {
                            warn!(call_sid = %shared.call_sid, error = %err, "conversation link failed");
                        } else {
                            deps.call_store.append_event(
                                &shared.call_sid,
                                "conversation_linked",
                                serde_json::json!({ "conversation_id": conversation_id }),
                            );
                        }
                    }
                    ServerMessage::Unknown(msg_type) => {
                        debug!(call_sid = %shared.call_sid, %msg_type, "ignoring unknown agent message");
                    }
                }
            }
            Err(ConvAIError::WebSocketError(err)) => {
                debug!(call_sid = %shared.call_sid, error = %err, "agent socket error");
                shared.begin_shutdown(ShutdownReason::AgentClosed);
                break;
            }
            Err(err) => {
                malformed += 1;
                warn!(call_sid = %shared.call_sid, error = %err, malformed, "malformed agent frame");
                if malformed > deps.config.malformed_budget {
                    shared.begin_shutdown(ShutdownReason::Malformed);
                    break;
                }
            }
        }
    }
}

async fn write_telephony(
    mut sink: SplitSink<WebSocket, Message>,
    queue: Arc<FrameQueue<TwilioFrame>>,
    shared: Arc<BridgeShared>,
) -> SplitSink<WebSocket, Message> {
    loop {
        let frame = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            frame = queue.pop() => frame,
        };
        let Some(frame) = frame else { break };

        let json = match frame {
            TwilioFrame::Media { payload } => {
                serde_json::to_string(&MediaMessage::new(&shared.stream_sid, payload))
            }
            TwilioFrame::Clear => serde_json::to_string(&ClearMessage::new(&shared.stream_sid)),
        };
        let json = match json {
            Ok(json) => json,
            Err(err) => {
                error!(call_sid = %shared.call_sid, error = %err, "frame serialization failed");
                continue;
            }
        };

        if let Err(err) = sink.send(Message::Text(json.into())).await {
            debug!(call_sid = %shared.call_sid, error = %err, "telephony send failed");
            shared.begin_shutdown(ShutdownReason::ProviderStop);
            break;
        }
    }
    sink
}

async fn write_agent(
    mut sink: AgentSink,
    queue: Arc<FrameQueue<AgentFrame>>,
    shared: Arc<BridgeShared>,
) -> AgentSink {
    loop {
        let frame = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            frame = queue.pop() => frame,
        };
        let Some(frame) = frame else { break };

        let sent = match frame {
            AgentFrame::Audio { payload } => sink.send_audio(payload).await,
            AgentFrame::Pong { event_id } => sink.send_pong(event_id).await,
        };
        if let Err(err) = sent {
            debug!(call_sid = %shared.call_sid, error = %err, "agent send failed");
            shared.begin_shutdown(ShutdownReason::AgentClosed);
            break;
        }
    }
    sink
}

/// The single inactivity authority for the call: a periodic sweep comparing
/// against the shared activity timestamp.
async fn watchdog(shared: Arc<BridgeShared>, timeout: Duration) {
    let period = (timeout / 2).max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {
                if shared.idle() >= timeout {
                    info!(call_sid = %shared.call_sid, idle_ms = shared.idle().as_millis() as u64, "inactivity timeout");
                    shared.begin_shutdown(ShutdownReason::Inactivity);
                    break;
                }
            }
        }
    }
}

/// Agent-side setup failed before the bridge ran: fail the call outright.
fn fail_call(deps: &BridgeDeps, call_sid: &str, err: &AppError, context: &str) {
    error!(call_sid, error = %err, "{context}");
    deps.call_store.append_event(
        call_sid,
        "bridge_failed",
        serde_json::json!({ "error": err.to_string() }),
    );
    match deps.call_store.update_status(
        call_sid,
        CallStatus::Failed,
        CallPatch {
            terminated_by: Some(TerminatedBy::System),
            ..Default::default()
        },
    ) {
        Ok((call, change)) => {
            if change.changed {
                deps.events.publish(ServerEvent::CallUpdate {
                    call_sid: call.sid.clone(),
                    status: call.status,
                    campaign_id: call.campaign_id.clone(),
                });
            }
            if change.became_terminal {
                deps.engine.handle_call_transition(&call, &change);
            }
        }
        Err(err) => warn!(call_sid, error = %err, "failed-call bookkeeping failed"),
    }
}

/// Teardown steps 5 and 6: final call state, then events via the engine.
fn finish_call(deps: &BridgeDeps, call_sid: &str, reason: ShutdownReason) {
    deps.call_store.append_event(
        call_sid,
        "bridge_ended",
        serde_json::json!({ "reason": reason.as_str() }),
    );

    let answered = deps
        .call_store
        .get(call_sid)
        .ok()
        .and_then(|call| call.answer_time)
        .is_some();
    let final_status = if answered {
        CallStatus::Completed
    } else {
        CallStatus::Failed
    };

    match deps.call_store.update_status(
        call_sid,
        final_status,
        CallPatch {
            end_time: Some(Utc::now()),
            terminated_by: Some(reason.terminated_by()),
            ..Default::default()
        },
    ) {
        Ok((call, change)) => {
            if change.changed {
                deps.events.publish(ServerEvent::CallUpdate {
                    call_sid: call.sid.clone(),
                    status: call.status,
                    campaign_id: call.campaign_id.clone(),
                });
            }
            if change.became_terminal {
                deps.engine.handle_call_transition(&call, &change);
            }
        }
        Err(AppError::CallNotFound(_)) => {
            // A stream for a call this process never placed; nothing to do.
            debug!(call_sid, "bridge ended for unknown call");
        }
        Err(err) => warn!(call_sid, error = %err, "final call update failed"),
    }
}
