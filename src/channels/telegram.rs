use reqwest::Client;
use serde_json::{json, Value};

use crate::error::{BridgeError, Result};
use crate::types::ParseMode;

const PLATFORM: &str = "telegram";

/// Thin Bot API client. One HTTP call per method, no retries.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    api_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(http: Client, api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    async fn call(&self, method: &str, payload: Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.method_url(method))
            .json(&payload)
            .send()
            .await
            .map_err(|err| request_error(method, err))?;
        let status = resp.status().as_u16();
        let value: Value = resp
            .json()
            .await
            .map_err(|err| {
                BridgeError::platform(PLATFORM, Some(status), format!("{method}: {}", err.without_url()))
            })?;

        if value.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let code = value
                .get("error_code")
                .and_then(|v| v.as_u64())
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(status);
            let description = value
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("request failed");
            return Err(BridgeError::platform(
                PLATFORM,
                Some(code),
                format!("{method}: {description}"),
            ));
        }
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<Value> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(mode) = parse_mode {
            payload["parse_mode"] = Value::String(mode.as_str().to_string());
        }
        self.call("sendMessage", payload).await
    }

    async fn send_media(
        &self,
        method: &str,
        field: &str,
        chat_id: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<Value> {
        let mut payload = json!({ "chat_id": chat_id });
        payload[field] = Value::String(url.to_string());
        if let Some(caption) = caption {
            payload["caption"] = Value::String(caption.to_string());
        }
        self.call(method, payload).await
    }

    pub async fn send_photo(&self, chat_id: &str, url: &str, caption: Option<&str>) -> Result<Value> {
        self.send_media("sendPhoto", "photo", chat_id, url, caption).await
    }

    pub async fn send_video(&self, chat_id: &str, url: &str, caption: Option<&str>) -> Result<Value> {
        self.send_media("sendVideo", "video", chat_id, url, caption).await
    }

    pub async fn send_audio(&self, chat_id: &str, url: &str, caption: Option<&str>) -> Result<Value> {
        self.send_media("sendAudio", "audio", chat_id, url, caption).await
    }

    pub async fn send_document(&self, chat_id: &str, url: &str, caption: Option<&str>) -> Result<Value> {
        self.send_media("sendDocument", "document", chat_id, url, caption).await
    }

    pub async fn send_location(&self, chat_id: &str, latitude: f64, longitude: f64) -> Result<Value> {
        self.call(
            "sendLocation",
            json!({
                "chat_id": chat_id,
                "latitude": latitude,
                "longitude": longitude,
            }),
        )
        .await
    }

    pub async fn send_contact(
        &self,
        chat_id: &str,
        phone_number: &str,
        first_name: &str,
        last_name: Option<&str>,
    ) -> Result<Value> {
        let mut payload = json!({
            "chat_id": chat_id,
            "phone_number": phone_number,
            "first_name": first_name,
        });
        if let Some(last) = last_name {
            payload["last_name"] = Value::String(last.to_string());
        }
        self.call("sendContact", payload).await
    }

    pub async fn send_poll(&self, chat_id: &str, question: &str, options: &[String]) -> Result<Value> {
        self.call(
            "sendPoll",
            json!({
                "chat_id": chat_id,
                "question": question,
                "options": options,
            }),
        )
        .await
    }

    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<()> {
        let mut payload = json!({
            "url": url,
            "allowed_updates": ["message", "edited_message"],
        });
        if let Some(secret) = secret_token {
            payload["secret_token"] = Value::String(secret.to_string());
        }
        self.call("setWebhook", payload).await?;
        Ok(())
    }

    /// Turns a `file_id` into a URL the gateway can download from.
    pub async fn resolve_file_url(&self, file_id: &str) -> Result<String> {
        let result = self.call("getFile", json!({ "file_id": file_id })).await?;
        let file_path = result
            .get("file_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BridgeError::platform(PLATFORM, None, "getFile: no file_path in result"))?;
        Ok(format!("{}/file/bot{}/{}", self.api_url, self.token, file_path))
    }
}

fn request_error(method: &str, err: reqwest::Error) -> BridgeError {
    BridgeError::platform(
        PLATFORM,
        err.status().map(|s| s.as_u16()),
        format!("{method}: {}", err.without_url()),
    )
}

/// The `message` or `edited_message` object of an update.
pub fn update_message(update: &Value) -> Option<&Value> {
    update.get("message").or_else(|| update.get("edited_message"))
}

/// Chat id of an update's message, as a string.
pub fn update_chat_id(update: &Value) -> Option<String> {
    update_message(update)?
        .get("chat")?
        .get("id")?
        .as_i64()
        .map(|id| id.to_string())
}
