pub mod channels;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod db;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod transform;
pub mod types;

pub use config::Config;
pub use dispatch::{Dispatcher, RoutingOutcome};
pub use error::{BridgeError, Result};

use self::channels::{telegram::TelegramClient, whatsapp::GatewayClient};
use self::config::{load_config, resolve_database_url};
use self::dispatch::WebhookLinks;
use self::registry::{CachedRegistry, SqlAccountRegistry};
use self::transform::Transformer;
use self::types::SourcePlatform;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::AnyPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{field, Instrument};

pub const TELEGRAM_SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub dispatcher: Arc<Dispatcher>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub fn http_client(config: &Config) -> anyhow::Result<reqwest::Client> {
    let timeout = Duration::from_secs(config.dispatch.request_timeout_seconds.max(1));
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Wires the SQL registry and both platform clients into a dispatcher.
pub fn build_dispatcher(config: &Config, pool: AnyPool, db_kind: db::DbKind) -> anyhow::Result<Dispatcher> {
    let bot_token = config
        .telegram
        .bot_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("telegram bot token missing (TELEGRAM_BOT_TOKEN)"))?;
    let http = http_client(config)?;

    let registry = CachedRegistry::new(
        SqlAccountRegistry::new(pool, db_kind),
        Duration::from_secs(config.dispatch.cache_ttl_seconds),
    );
    let telegram = TelegramClient::new(http.clone(), config.telegram.api_url.clone(), bot_token);
    let gateway = GatewayClient::new(http, config.gateway.api_url.clone());

    Ok(Dispatcher::new(
        Arc::new(registry),
        Arc::new(telegram),
        Arc::new(gateway),
        Transformer::new(config.gateway.qr_url.clone()),
    )
    .with_allowed_kinds(config.dispatch.allowed_kinds.clone())
    .with_links(WebhookLinks {
        whatsapp_webhook_url: config.gateway.whatsapp_webhook_url(),
        gateway_webhook_token: config.auth.gateway_webhook_token.clone(),
    }))
}

pub async fn create_app() -> anyhow::Result<(AppState, Router)> {
    sqlx::any::install_default_drivers();

    let config = load_config();
    let db_url = resolve_database_url(&config);
    let db_kind = db::db_kind_from_url(&db_url);
    let pool = AnyPool::connect(&db_url).await?;
    db::init_db(&pool, db_kind).await?;

    let dispatcher = build_dispatcher(&config, pool, db_kind)?;
    let state = AppState {
        config,
        dispatcher: Arc::new(dispatcher),
    };
    let app = build_router(state.clone());
    Ok((state, app))
}

pub fn build_router(state: AppState) -> Router {
    let telegram_routes = Router::new()
        .route("/webhook/telegram", post(telegram_webhook))
        .layer(middleware::from_fn_with_state(state.clone(), require_telegram_secret));

    let gateway_routes = Router::new()
        .route("/webhook/whatsapp", post(whatsapp_webhook))
        .layer(middleware::from_fn_with_state(state.clone(), require_gateway_token));

    Router::new()
        .merge(telegram_routes)
        .merge(gateway_routes)
        .route("/v1/health", get(health))
        .with_state(state)
}

/// Points the bot at `<public_url>/webhook/telegram`. No-op without a public URL.
pub async fn register_telegram_webhook(config: &Config) -> anyhow::Result<bool> {
    let (Some(url), Some(token)) = (config.gateway.telegram_webhook_url(), config.telegram.bot_token.as_ref()) else {
        return Ok(false);
    };
    let client = TelegramClient::new(http_client(config)?, config.telegram.api_url.clone(), token.clone());
    client
        .set_webhook(&url, config.auth.telegram_secret_token.as_deref())
        .await?;
    tracing::info!(url = %url, "telegram webhook registered");
    Ok(true)
}

async fn require_telegram_secret(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> impl IntoResponse {
    if let Some(secret) = state.config.auth.telegram_secret_token.as_ref() {
        let header = headers
            .get(TELEGRAM_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if header != Some(secret.as_str()) {
            tracing::warn!(platform = "telegram", "rejected webhook with bad secret token");
            return error_response(&BridgeError::Unauthorized);
        }
    }
    next.run(req).await
}

async fn require_gateway_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> impl IntoResponse {
    if let Some(token) = state.config.auth.gateway_webhook_token.as_ref() {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if bearer != Some(token.as_str()) {
            tracing::warn!(platform = "whatsapp", "rejected webhook with bad bearer token");
            return error_response(&BridgeError::Unauthorized);
        }
    }
    next.run(req).await
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

fn webhook_span(platform: SourcePlatform) -> tracing::Span {
    tracing::info_span!(
        "webhook",
        request_id = %uuid::Uuid::new_v4(),
        platform = platform.as_str(),
        event_kind = field::Empty,
        account_id = field::Empty,
    )
}

async fn telegram_webhook(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let result = state
        .dispatcher
        .handle_telegram_update(&payload)
        .instrument(webhook_span(SourcePlatform::Telegram))
        .await;
    outcome_response(result)
}

async fn whatsapp_webhook(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let result = state
        .dispatcher
        .route(&payload, SourcePlatform::WhatsApp, None)
        .instrument(webhook_span(SourcePlatform::WhatsApp))
        .await;
    outcome_response(result)
}

fn error_response(err: &BridgeError) -> Response {
    let status = if err.is_expected() {
        StatusCode::OK
    } else {
        err.status_code()
    };
    (
        status,
        Json(json!({"status": err.code(), "error": err.to_string()})),
    )
        .into_response()
}

/// Expected rejects answer 200 so the platforms do not redeliver them.
pub fn outcome_response(result: Result<RoutingOutcome>) -> Response {
    match result {
        Ok(outcome) => Json(json!({"status": outcome.tag()})).into_response(),
        Err(err) => error_response(&err),
    }
}
