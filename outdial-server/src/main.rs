use dotenv::dotenv;
use outdial_convai::ConvAIClient;
use outdial_server::clients::{AgentGateway, ElevenLabsGateway, TelephonyApi, TwilioDialer};
use outdial_server::{api, AppState, Config};
use outdial_twilio::TwilioClient;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let twilio_client = TwilioClient::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
    )
    .with_number(config.twilio_phone_number.clone());
    let telephony: Arc<dyn TelephonyApi> = Arc::new(TwilioDialer::new(twilio_client));

    let agent_gateway: Arc<dyn AgentGateway> = Arc::new(ElevenLabsGateway::new(
        ConvAIClient::new(config.elevenlabs_api_key.clone()),
    ));

    let state = AppState::new(config, telephony, agent_gateway);

    let listener = tokio::net::TcpListener::bind(state.config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, public_url = %state.config.server_public_url, "listening");

    let app = api::router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

/// Ctrl-c stops new placements first, waits out the grace period for
/// in-flight calls, then force-closes any remaining bridges.
async fn shutdown_signal(state: AppState) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("shutdown signal received");
    state.engine.shutdown(state.config.shutdown_grace).await;
    state.registry().shutdown_all();
}
