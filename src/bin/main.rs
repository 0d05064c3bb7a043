use anyhow::Context;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("BRIDGE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {err}");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already be set.
    let _ = dotenvy::dotenv();
    init_tracing();

    let (state, app) = wa_bridge::create_app().await.context("failed to start bridge")?;

    match wa_bridge::register_telegram_webhook(&state.config).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!("no public url configured; telegram webhook left unchanged"),
        Err(err) => tracing::error!("telegram webhook registration failed: {err:#}"),
    }
    if state.config.gateway.public_url.is_none() {
        tracing::warn!("WEBHOOK_URL is not set; gateway webhooks must be configured by hand");
    }

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "wa-bridge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
