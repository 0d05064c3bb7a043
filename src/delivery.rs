use async_trait::async_trait;

use crate::channels::telegram::TelegramClient;
use crate::channels::whatsapp::{GatewayClient, GatewaySettings, PartnerInstance};
use crate::error::{BridgeError, Result};
use crate::types::{redact_token, Account, GatewaySendRequest, MediaSource, OutboundContent, OutboundMessage};

/// Telegram side of the delivery boundary.
#[async_trait]
pub trait TelegramSink: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()>;

    /// Downloadable URL of a Telegram file.
    async fn file_url(&self, file_id: &str) -> Result<String>;
}

/// Gateway side of the delivery boundary. Message and settings calls are
/// scoped per account, partner calls per partner token.
#[async_trait]
pub trait GatewaySink: Send + Sync {
    /// Sends one message and returns the gateway message id.
    async fn send(&self, account: &Account, request: &GatewaySendRequest) -> Result<String>;

    async fn state(&self, account: &Account) -> Result<String>;

    async fn settings(&self, account: &Account) -> Result<GatewaySettings>;

    async fn update_settings(&self, account: &Account, settings: &GatewaySettings) -> Result<()>;

    async fn create_instance(&self, partner_token: &str, settings: &GatewaySettings) -> Result<PartnerInstance>;

    async fn list_instances(&self, partner_token: &str) -> Result<Vec<PartnerInstance>>;

    async fn delete_instance(&self, partner_token: &str, instance_id: i64) -> Result<()>;
}

#[async_trait]
impl TelegramSink for TelegramClient {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        let chat = message.target_chat_id.as_str();
        let result = match &message.content {
            OutboundContent::Text { text, parse_mode } => self.send_message(chat, text, *parse_mode).await,
            OutboundContent::Photo { url, caption } => self.send_photo(chat, url, caption.as_deref()).await,
            OutboundContent::Video { url, caption } => self.send_video(chat, url, caption.as_deref()).await,
            OutboundContent::Audio { url, caption } => self.send_audio(chat, url, caption.as_deref()).await,
            OutboundContent::Document { url, caption } => {
                self.send_document(chat, url, caption.as_deref()).await
            }
            OutboundContent::Location { latitude, longitude } => {
                self.send_location(chat, *latitude, *longitude).await
            }
            OutboundContent::Contact {
                phone_number,
                first_name,
                last_name,
            } => {
                self.send_contact(chat, phone_number, first_name, last_name.as_deref())
                    .await
            }
            OutboundContent::Poll { question, options } => self.send_poll(chat, question, options).await,
        };

        match &result {
            Ok(_) => tracing::info!(
                target_chat_id = chat,
                content = message.content.kind_name(),
                "telegram message delivered"
            ),
            Err(err) => tracing::warn!(
                target_chat_id = chat,
                content = message.content.kind_name(),
                "telegram delivery failed: {err}"
            ),
        }
        result.map(|_| ())
    }

    async fn file_url(&self, file_id: &str) -> Result<String> {
        self.resolve_file_url(file_id).await
    }
}

#[async_trait]
impl GatewaySink for GatewayClient {
    async fn send(&self, account: &Account, request: &GatewaySendRequest) -> Result<String> {
        let id = account.instance_id;
        let token = account.credential_token.as_str();
        let result = match request {
            GatewaySendRequest::Text { chat_id, message } => self.send_message(id, token, chat_id, message).await,
            GatewaySendRequest::File {
                chat_id,
                source,
                file_name,
                caption,
            } => match source {
                MediaSource::Url(url) => {
                    self.send_file_by_url(id, token, chat_id, url, file_name, caption.as_deref())
                        .await
                }
                MediaSource::TelegramFile { file_id } => Err(BridgeError::TransformationError(format!(
                    "telegram file {file_id} was not resolved to a url"
                ))),
            },
            GatewaySendRequest::Location {
                chat_id,
                latitude,
                longitude,
            } => self.send_location(id, token, chat_id, *latitude, *longitude).await,
            GatewaySendRequest::Contact {
                chat_id,
                phone_contact,
                first_name,
                last_name,
            } => {
                self.send_contact(id, token, chat_id, *phone_contact, first_name, last_name.as_deref())
                    .await
            }
        };

        match &result {
            Ok(message_id) => tracing::info!(
                instance_id = id,
                chat_id = request.chat_id(),
                content = request.kind_name(),
                message_id = %message_id,
                "whatsapp message sent"
            ),
            Err(err) => tracing::warn!(
                instance_id = id,
                chat_id = request.chat_id(),
                content = request.kind_name(),
                "whatsapp send failed: {err}"
            ),
        }
        result
    }

    async fn state(&self, account: &Account) -> Result<String> {
        self.get_state_instance(account.instance_id, &account.credential_token)
            .await
    }

    async fn settings(&self, account: &Account) -> Result<GatewaySettings> {
        self.get_settings(account.instance_id, &account.credential_token)
            .await
    }

    async fn update_settings(&self, account: &Account, settings: &GatewaySettings) -> Result<()> {
        let result = self
            .set_settings(account.instance_id, &account.credential_token, settings)
            .await;
        if let Err(err) = &result {
            tracing::warn!(instance_id = account.instance_id, "gateway settings update failed: {err}");
        }
        result
    }

    async fn create_instance(&self, partner_token: &str, settings: &GatewaySettings) -> Result<PartnerInstance> {
        let result = self.create_partner_instance(partner_token, settings).await;
        match &result {
            Ok(created) => tracing::info!(
                instance_id = created.id_instance,
                partner = %redact_token(partner_token),
                "partner instance created"
            ),
            Err(err) => tracing::warn!(partner = %redact_token(partner_token), "partner createInstance failed: {err}"),
        }
        result
    }

    async fn list_instances(&self, partner_token: &str) -> Result<Vec<PartnerInstance>> {
        self.get_instances(partner_token).await
    }

    async fn delete_instance(&self, partner_token: &str, instance_id: i64) -> Result<()> {
        let result = self.delete_instance_account(partner_token, instance_id).await;
        match &result {
            Ok(()) => tracing::info!(instance_id, partner = %redact_token(partner_token), "partner instance deleted"),
            Err(err) => tracing::warn!(instance_id, "partner deleteInstanceAccount failed: {err}"),
        }
        result
    }
}
