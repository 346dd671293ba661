//! Live media-bridge tests: a real axum server on an ephemeral port, a
//! scripted agent WebSocket server standing in for the conversational-AI
//! provider, and a tokio-tungstenite client playing the telephony side.

mod support;

use futures_util::{SinkExt, StreamExt};
use outdial_server::api;
use outdial_server::model::{Call, TerminatedBy};
use outdial_server::AppState;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use support::{harness, harness_with_config, test_config, wait_until, TestHarness};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve_app(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect_media_stream(addr: SocketAddr, call_sid: &str) -> WsClient {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/outbound-media-stream"
    ))
    .await
    .expect("media stream connect");

    let connected = json!({ "event": "connected", "protocol": "Call", "version": "1.0.0" });
    let start = json!({
        "event": "start",
        "sequenceNumber": "1",
        "streamSid": "MZ1",
        "start": {
            "accountSid": "AC_test",
            "callSid": call_sid,
            "streamSid": "MZ1",
            "tracks": ["inbound"],
            "customParameters": {
                "prompt": "Be brief.",
                "first_message": "Hello!",
                "campaign_id": "c1",
                "contact_id": "ct1"
            },
            "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
        }
    });
    ws.send(Message::Text(connected.to_string())).await.unwrap();
    ws.send(Message::Text(start.to_string())).await.unwrap();
    ws
}

async fn next_text(ws: &mut WsClient) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket ended")
            .expect("socket error");
        match msg {
            Message::Text(text) => return text,
            Message::Close(_) => panic!("socket closed while expecting a frame"),
            _ => continue,
        }
    }
}

/// Reads until the server closes the socket. Panics on timeout.
async fn wait_for_close(ws: &mut WsClient) {
    loop {
        match tokio::time::timeout(Duration::from_secs(3), ws.next()).await {
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) => return,
            Ok(Some(Ok(_))) => continue,
            Err(_) => panic!("socket never closed"),
        }
    }
}

/// An agent server that sends the scripted frames after the initiation
/// message, then collects what the bridge sends until it has `collect`
/// messages or the bridge closes.
fn spawn_scripted_agent(
    listener: TcpListener,
    script: Vec<serde_json::Value>,
    collect: usize,
) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("agent accept");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("agent handshake");

        let init = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            other => panic!("expected initiation frame, got {other:?}"),
        };

        for frame in script {
            ws.send(Message::Text(frame.to_string())).await.unwrap();
        }

        let mut received = vec![init];
        while received.len() < collect + 1 {
            match tokio::time::timeout(Duration::from_secs(3), ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => received.push(text),
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => break,
                Ok(Some(Ok(_))) => {}
                Err(_) => break,
            }
        }
        received
    })
}

async fn agent_listener(h: &TestHarness) -> TcpListener {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    h.agent_gateway
        .set_url(format!("ws://{}", listener.local_addr().unwrap()));
    listener
}

#[tokio::test]
async fn bridge_proxies_audio_verbatim_and_honors_control_frames() {
    let h = harness();
    let listener = agent_listener(&h).await;
    let agent = spawn_scripted_agent(
        listener,
        vec![
            json!({
                "type": "conversation_initiation_metadata",
                "conversation_initiation_metadata_event": {
                    "conversation_id": "conv_test",
                    "agent_output_audio_format": "ulaw_8000"
                }
            }),
            json!({"type": "audio", "audio_event": {"audio_base_64": "AAECAw==", "event_id": 1}}),
            json!({"type": "audio", "audio": {"chunk": "QkJCQg=="}}),
            json!({"type": "interruption", "interruption_event": {"event_id": 2}}),
            json!({"type": "ping", "ping_event": {"event_id": 7}}),
        ],
        2,
    );

    h.state
        .call_store
        .save(Call::outbound("CA_bridge", "+15557654321", "+15551230000"));

    let addr = serve_app(h.state.clone()).await;
    let mut ws = connect_media_stream(addr, "CA_bridge").await;

    ws.send(Message::Text(
        json!({
            "event": "media",
            "streamSid": "MZ1",
            "media": {"track": "inbound", "chunk": "1", "timestamp": "1", "payload": "dGVzdA=="}
        })
        .to_string(),
    ))
    .await
    .unwrap();

    // Agent audio must come back byte-identical, in order, with no
    // re-encoding. base64(base64(...)) here is the known regression.
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"event":"media","streamSid":"MZ1","media":{"payload":"AAECAw=="}}"#
    );
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"event":"media","streamSid":"MZ1","media":{"payload":"QkJCQg=="}}"#
    );
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"event":"clear","streamSid":"MZ1"}"#
    );

    ws.send(Message::Text(
        json!({"event": "stop", "streamSid": "MZ1", "stop": {"callSid": "CA_bridge"}}).to_string(),
    ))
    .await
    .unwrap();
    wait_for_close(&mut ws).await;

    let agent_frames = agent.await.unwrap();
    let init: serde_json::Value = serde_json::from_str(&agent_frames[0]).unwrap();
    assert_eq!(init["type"], "conversation_initiation_client_data");
    assert_eq!(
        init["conversation_config_override"]["agent"]["first_message"],
        "Hello!"
    );
    assert_eq!(
        init["conversation_config_override"]["agent"]["prompt"]["prompt"],
        "Be brief."
    );

    let rest = &agent_frames[1..];
    assert!(
        rest.iter().any(|f| f == r#"{"user_audio_chunk":"dGVzdA=="}"#),
        "caller audio never reached the agent: {rest:?}"
    );
    assert!(
        rest.iter().any(|f| f.contains(r#""type":"pong""#) && f.contains(r#""event_id":7"#)),
        "ping was never answered: {rest:?}"
    );

    assert!(
        wait_until(
            || h.state.call_store.get("CA_bridge").unwrap().status.is_terminal(),
            Duration::from_secs(2),
        )
        .await
    );
    let call = h.state.call_store.get("CA_bridge").unwrap();
    assert_eq!(call.conversation_id.as_deref(), Some("conv_test"));
    assert_eq!(call.terminated_by, Some(TerminatedBy::User));
    assert_eq!(h.telephony.hangups.lock().clone(), vec!["CA_bridge".to_string()]);
}

#[tokio::test]
async fn inactivity_tears_the_bridge_down_with_one_hangup() {
    let mut config = test_config();
    config.inactivity_timeout = Duration::from_millis(300);
    let h = harness_with_config(config);

    let listener = agent_listener(&h).await;
    let agent = spawn_scripted_agent(listener, vec![], 0);

    h.state
        .call_store
        .save(Call::outbound("CA_idle", "+15557654321", "+15551230001"));

    let addr = serve_app(h.state.clone()).await;
    let mut ws = connect_media_stream(addr, "CA_idle").await;

    // No frames on either side: the watchdog must fire within one check
    // interval past the timeout.
    wait_for_close(&mut ws).await;

    assert!(
        wait_until(
            || h.state.call_store.get("CA_idle").unwrap().status.is_terminal(),
            Duration::from_secs(2),
        )
        .await
    );
    let call = h.state.call_store.get("CA_idle").unwrap();
    assert_eq!(call.terminated_by, Some(TerminatedBy::Timeout));
    assert_eq!(
        h.telephony.hangups.lock().clone(),
        vec!["CA_idle".to_string()],
        "hangup must happen exactly once"
    );
    let _ = agent.await;
}

#[tokio::test]
async fn continuous_activity_keeps_the_bridge_alive() {
    let mut config = test_config();
    config.inactivity_timeout = Duration::from_millis(300);
    let h = harness_with_config(config);

    let listener = agent_listener(&h).await;
    let agent = spawn_scripted_agent(listener, vec![], 64);

    h.state
        .call_store
        .save(Call::outbound("CA_active", "+15557654321", "+15551230002"));

    let addr = serve_app(h.state.clone()).await;
    let mut ws = connect_media_stream(addr, "CA_active").await;

    // A frame every 100ms for 1s, well past the 300ms timeout.
    for i in 0..10 {
        ws.send(Message::Text(
            json!({
                "event": "media",
                "streamSid": "MZ1",
                "media": {"payload": "AAAA", "chunk": i.to_string()}
            })
            .to_string(),
        ))
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(
        !h.state.call_store.get("CA_active").unwrap().status.is_terminal(),
        "bridge was torn down despite continuous activity"
    );
    assert!(h.telephony.hangups.lock().is_empty());

    ws.send(Message::Text(
        json!({"event": "stop", "streamSid": "MZ1"}).to_string(),
    ))
    .await
    .unwrap();
    wait_for_close(&mut ws).await;
    let _ = agent.await;
}

#[tokio::test]
async fn agent_dial_failure_fails_the_call_and_closes_the_stream() {
    let h = harness();
    h.agent_gateway
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);

    h.state
        .call_store
        .save(Call::outbound("CA_fail", "+15557654321", "+15551230003"));

    let addr = serve_app(h.state.clone()).await;
    let mut ws = connect_media_stream(addr, "CA_fail").await;
    wait_for_close(&mut ws).await;

    assert!(
        wait_until(
            || h.state.call_store.get("CA_fail").unwrap().status.is_terminal(),
            Duration::from_secs(2),
        )
        .await
    );
    let call = h.state.call_store.get("CA_fail").unwrap();
    assert_eq!(call.status, outdial_server::model::CallStatus::Failed);
    assert_eq!(call.terminated_by, Some(TerminatedBy::System));
    assert!(h.telephony.hangups.lock().is_empty());
    assert_eq!(
        h.agent_gateway
            .requests
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}
