#[path = "../support/mod.rs"]
mod support;

use axum::body::{to_bytes, Body};
use axum::Router;
use http::{header, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use support::{account, Harness, SpyGateway, SpyTelegram};
use tower::ServiceExt;
use wa_bridge::{build_router, AppState, Config, TELEGRAM_SECRET_HEADER};

const GATEWAY_TOKEN: &str = "gw-secret";
const TELEGRAM_SECRET: &str = "tg-secret";

fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.gateway_webhook_token = Some(GATEWAY_TOKEN.to_string());
    config.auth.telegram_secret_token = Some(TELEGRAM_SECRET.to_string());
    config.telegram.bot_token = Some("123:ABC".to_string());
    config
}

struct TestApp {
    router: Router,
    telegram: Arc<SpyTelegram>,
    gateway: Arc<SpyGateway>,
}

fn app_with(harness: Harness, config: Config) -> TestApp {
    let Harness {
        telegram,
        gateway,
        dispatcher,
        ..
    } = harness;
    let state = AppState {
        config,
        dispatcher: Arc::new(dispatcher),
    };
    TestApp {
        router: build_router(state),
        telegram,
        gateway,
    }
}

fn app(accounts: Vec<wa_bridge::types::Account>) -> TestApp {
    app_with(Harness::new(accounts), test_config())
}

fn gateway_request(body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook/whatsapp")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn telegram_request(body: Value, secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook/telegram")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(secret) = secret {
        builder = builder.header(TELEGRAM_SECRET_HEADER, secret);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn incoming_text(instance_id: i64) -> Value {
    json!({
        "typeWebhook": "incomingMessageReceived",
        "instanceData": {"idInstance": instance_id, "wid": "79990000000@c.us"},
        "timestamp": 1700000000,
        "idMessage": "3EB0",
        "senderData": {"chatId": "111@c.us", "sender": "111@c.us", "senderName": "Alice"},
        "messageData": {"typeMessage": "textMessage", "textMessageData": {"textMessage": "hello"}}
    })
}

#[tokio::test]
async fn test_health_is_public() {
    let app = app(vec![]);
    let request = Request::builder().uri("/v1/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_gateway_webhook_requires_bearer() {
    let app = app(vec![account("555", 1101)]);

    let (status, body) = send(&app.router, gateway_request(incoming_text(1101), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "unauthorized");

    let (status, _) = send(&app.router, gateway_request(incoming_text(1101), Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.telegram.call_count(), 0);
}

#[tokio::test]
async fn test_gateway_webhook_delivers() {
    let app = app(vec![account("555", 1101)]);

    let (status, body) = send(&app.router, gateway_request(incoming_text(1101), Some(GATEWAY_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "delivered"}));

    let delivered = app.telegram.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].target_chat_id, "555");
}

#[tokio::test]
async fn test_expected_rejects_answer_200() {
    let app = app(vec![]);

    let unsupported = json!({"typeWebhook": "deviceInfo", "instanceData": {"idInstance": 1101}});
    let (status, body) = send(&app.router, gateway_request(unsupported, Some(GATEWAY_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "unsupported_event_kind");

    let (status, body) = send(&app.router, gateway_request(incoming_text(1101), Some(GATEWAY_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "account_not_found");
    assert!(body["error"].as_str().unwrap().contains("1101"));
}

#[tokio::test]
async fn test_platform_failure_keeps_upstream_status() {
    let harness = Harness::with_telegram(vec![account("555", 1101)], SpyTelegram::failing_on(1));
    let app = app_with(harness, test_config());

    let (status, body) = send(&app.router, gateway_request(incoming_text(1101), Some(GATEWAY_TOKEN))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "platform_api_error");
}

#[tokio::test]
async fn test_telegram_webhook_requires_secret() {
    let app = app(vec![account("555", 1101)]);
    let update = json!({
        "update_id": 1,
        "message": {"message_id": 1, "chat": {"id": 555, "type": "private"}, "text": "/me"}
    });

    let (status, _) = send(&app.router, telegram_request(update.clone(), Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app.router, telegram_request(update, Some(TELEGRAM_SECRET))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "me_shown"}));
}

#[tokio::test]
async fn test_telegram_reply_is_forwarded() {
    let app = app(vec![account("555", 1101)]);
    let update = json!({
        "update_id": 2,
        "message": {
            "message_id": 5,
            "chat": {"id": 555, "type": "private"},
            "text": "see you",
            "reply_to_message": {
                "message_id": 4,
                "text": "New WhatsApp message:\n\n• Sender: Alice\n• Number: 111@c.us\n• Recipient: Instance 1101"
            }
        }
    });

    let (status, body) = send(&app.router, telegram_request(update, Some(TELEGRAM_SECRET))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "forwarded"}));
    let sent = app.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 1101);
    assert_eq!(sent[0].1.chat_id(), "111@c.us");
}

#[tokio::test]
async fn test_open_webhooks_without_configured_secrets() {
    let mut config = test_config();
    config.auth.gateway_webhook_token = None;
    let app = app_with(Harness::new(vec![account("555", 1101)]), config);

    let (status, body) = send(&app.router, gateway_request(incoming_text(1101), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "delivered");
}
