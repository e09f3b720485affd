use sms_relay::{build_app, telemetry, AppConfig};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    telemetry::init(&config.logging)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = build_app(&config);

    let listener = TcpListener::bind(&addr).await?;
    info!(
        %addr,
        login_url = %config.upstream.login_url,
        session_policy = ?config.relay.session_policy,
        "SMS relay listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
