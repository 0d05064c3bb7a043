use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{BridgeError, Result};
use crate::types::NotificationFlags;

const PLATFORM: &str = "whatsapp";

/// Webhook settings of a gateway instance. Unset fields are left untouched
/// by `setSettings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incoming_webhook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outgoing_webhook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_webhook: Option<String>,
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

impl GatewaySettings {
    pub fn from_flags(flags: NotificationFlags) -> Self {
        Self {
            incoming_webhook: Some(yes_no(flags.incoming)),
            outgoing_webhook: Some(yes_no(flags.outgoing_status)),
            state_webhook: Some(yes_no(flags.instance_state)),
            ..Self::default()
        }
    }

    /// Settings pushed right after an account is bound.
    pub fn for_bridge(webhook_url: Option<&str>, webhook_token: Option<&str>, flags: NotificationFlags) -> Self {
        Self {
            webhook_url: webhook_url.map(str::to_string),
            webhook_url_token: webhook_token.map(str::to_string),
            ..Self::from_flags(flags)
        }
    }

    pub fn is_enabled(value: Option<&str>) -> bool {
        value == Some("yes")
    }
}

/// Instance record of the partner API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartnerInstance {
    pub id_instance: i64,
    pub api_token_instance: Option<String>,
    pub name: Option<String>,
    pub type_instance: Option<String>,
    pub type_account: Option<String>,
    pub tariff: Option<String>,
    pub time_created: Option<String>,
    pub time_deleted: Option<String>,
    pub expiration_date: Option<String>,
    pub deleted: bool,
    pub is_expired: bool,
    pub is_free: bool,
    pub is_partner: bool,
}

/// Client for the gateway REST API, `<api>/waInstance<id>/<method>/<token>`.
/// Partner calls use `<api>/partner/<method>/<partnerToken>`.
#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    api_url: String,
}

impl GatewayClient {
    pub fn new(http: Client, api_url: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self, instance_id: i64, method: &str, token: &str) -> String {
        format!("{}/waInstance{}/{}/{}", self.api_url, instance_id, method, token)
    }

    pub fn partner_endpoint(&self, method: &str, partner_token: &str) -> String {
        format!("{}/partner/{}/{}", self.api_url, method, partner_token)
    }

    async fn parse(method: &str, resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::platform(
                PLATFORM,
                Some(status.as_u16()),
                format!("{method}: {body}"),
            ));
        }
        resp.json::<Value>().await.map_err(|err| {
            BridgeError::platform(PLATFORM, Some(status.as_u16()), format!("{method}: {}", err.without_url()))
        })
    }

    async fn post(&self, instance_id: i64, token: &str, method: &str, payload: Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.endpoint(instance_id, method, token))
            .json(&payload)
            .send()
            .await
            .map_err(|err| request_error(method, err))?;
        Self::parse(method, resp).await
    }

    async fn get(&self, instance_id: i64, token: &str, method: &str) -> Result<Value> {
        let resp = self
            .http
            .get(self.endpoint(instance_id, method, token))
            .send()
            .await
            .map_err(|err| request_error(method, err))?;
        Self::parse(method, resp).await
    }

    pub async fn send_message(&self, instance_id: i64, token: &str, chat_id: &str, message: &str) -> Result<String> {
        let value = self
            .post(
                instance_id,
                token,
                "sendMessage",
                json!({ "chatId": chat_id, "message": message }),
            )
            .await?;
        Ok(message_id(&value))
    }

    pub async fn send_file_by_url(
        &self,
        instance_id: i64,
        token: &str,
        chat_id: &str,
        url: &str,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<String> {
        let mut payload = json!({
            "chatId": chat_id,
            "urlFile": url,
            "fileName": file_name,
        });
        if let Some(caption) = caption {
            payload["caption"] = Value::String(caption.to_string());
        }
        let value = self.post(instance_id, token, "sendFileByUrl", payload).await?;
        Ok(message_id(&value))
    }

    pub async fn send_location(
        &self,
        instance_id: i64,
        token: &str,
        chat_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<String> {
        let value = self
            .post(
                instance_id,
                token,
                "sendLocation",
                json!({
                    "chatId": chat_id,
                    "latitude": latitude,
                    "longitude": longitude,
                }),
            )
            .await?;
        Ok(message_id(&value))
    }

    pub async fn send_contact(
        &self,
        instance_id: i64,
        token: &str,
        chat_id: &str,
        phone_contact: i64,
        first_name: &str,
        last_name: Option<&str>,
    ) -> Result<String> {
        let mut contact = json!({
            "phoneContact": phone_contact,
            "firstName": first_name,
        });
        if let Some(last) = last_name {
            contact["lastName"] = Value::String(last.to_string());
        }
        let value = self
            .post(
                instance_id,
                token,
                "sendContact",
                json!({ "chatId": chat_id, "contact": contact }),
            )
            .await?;
        Ok(message_id(&value))
    }

    pub async fn get_state_instance(&self, instance_id: i64, token: &str) -> Result<String> {
        let value = self.get(instance_id, token, "getStateInstance").await?;
        value
            .get("stateInstance")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| BridgeError::platform(PLATFORM, None, "getStateInstance: no stateInstance"))
    }

    pub async fn get_settings(&self, instance_id: i64, token: &str) -> Result<GatewaySettings> {
        let value = self.get(instance_id, token, "getSettings").await?;
        serde_json::from_value(value)
            .map_err(|err| BridgeError::platform(PLATFORM, None, format!("getSettings: {err}")))
    }

    pub async fn set_settings(&self, instance_id: i64, token: &str, settings: &GatewaySettings) -> Result<()> {
        let payload = serde_json::to_value(settings)
            .map_err(|err| BridgeError::TransformationError(err.to_string()))?;
        let value = self.post(instance_id, token, "setSettings", payload).await?;
        if value.get("saveSettings").and_then(|v| v.as_bool()) == Some(false) {
            return Err(BridgeError::platform(PLATFORM, None, "setSettings: settings not saved"));
        }
        Ok(())
    }
}

impl GatewayClient {
    async fn partner_call(&self, partner_token: &str, method: &str, payload: Option<Value>) -> Result<Value> {
        let url = self.partner_endpoint(method, partner_token);
        let request = match payload {
            Some(payload) => self.http.post(url).json(&payload),
            None => self.http.get(url),
        };
        let resp = request.send().await.map_err(|err| request_error(method, err))?;
        Self::parse(method, resp).await
    }

    /// Creates an instance; `settings` are applied to it on creation.
    pub async fn create_partner_instance(&self, partner_token: &str, settings: &GatewaySettings) -> Result<PartnerInstance> {
        let payload = serde_json::to_value(settings)
            .map_err(|err| BridgeError::TransformationError(err.to_string()))?;
        let value = self.partner_call(partner_token, "createInstance", Some(payload)).await?;
        let created: PartnerInstance = serde_json::from_value(value)
            .map_err(|err| BridgeError::platform(PLATFORM, None, format!("createInstance: {err}")))?;
        if created.id_instance == 0 || created.api_token_instance.is_none() {
            return Err(BridgeError::platform(
                PLATFORM,
                None,
                "createInstance: no instance in response",
            ));
        }
        Ok(created)
    }

    pub async fn get_instances(&self, partner_token: &str) -> Result<Vec<PartnerInstance>> {
        let value = self.partner_call(partner_token, "getInstances", None).await?;
        let list = match value {
            Value::Object(mut map) => map.remove("instances").unwrap_or(Value::Array(Vec::new())),
            other => other,
        };
        serde_json::from_value(list)
            .map_err(|err| BridgeError::platform(PLATFORM, None, format!("getInstances: {err}")))
    }

    pub async fn delete_instance_account(&self, partner_token: &str, instance_id: i64) -> Result<()> {
        self.partner_call(
            partner_token,
            "deleteInstanceAccount",
            Some(json!({ "idInstance": instance_id })),
        )
        .await?;
        Ok(())
    }
}

fn message_id(value: &Value) -> String {
    value
        .get("idMessage")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn request_error(method: &str, err: reqwest::Error) -> BridgeError {
    BridgeError::platform(
        PLATFORM,
        err.status().map(|s| s.as_u16()),
        format!("{method}: {}", err.without_url()),
    )
}
