use serde_json::Value;
use std::sync::Arc;

use crate::classifier;
use crate::commands::{self, CommandContext};
use crate::delivery::{GatewaySink, TelegramSink};
use crate::error::{BridgeError, Result};
use crate::registry::AccountRegistry;
use crate::transform::{recipient_from_reply, Transformer};
use crate::types::{
    EventKind, GatewaySendRequest, InboundEvent, MediaSource, Origin, OutboundContent, OutboundMessage, SourcePlatform,
};

pub const ACCOUNT_GUIDANCE: &str = "This chat is not linked to a WhatsApp instance yet.\n\n\
     Send /instance <idInstance> <apiTokenInstance> to link one, or /help for the command list.";

pub const RECIPIENT_GUIDANCE: &str = "Could not tell which WhatsApp chat this message is for.\n\n\
     Reply to a forwarded WhatsApp message to answer it, or use /reply <chatId> <text>.";

#[derive(Debug, Clone, PartialEq)]
pub enum RoutingOutcome {
    /// Gateway event fanned out to Telegram.
    Delivered { kind: EventKind, messages: usize },
    /// Telegram message sent to the gateway.
    Forwarded { kind: EventKind, message_id: String },
    /// Owner switched notifications for this kind off.
    Muted { kind: EventKind },
    Command { status: String },
}

impl RoutingOutcome {
    pub fn tag(&self) -> &str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Forwarded { .. } => "forwarded",
            Self::Muted { .. } => "muted",
            Self::Command { status } => status,
        }
    }
}

/// Public addresses handed to the gateway when an account is bound.
#[derive(Debug, Clone, Default)]
pub struct WebhookLinks {
    pub whatsapp_webhook_url: Option<String>,
    pub gateway_webhook_token: Option<String>,
}

pub struct Dispatcher {
    pub(crate) registry: Arc<dyn AccountRegistry>,
    pub(crate) telegram: Arc<dyn TelegramSink>,
    pub(crate) gateway: Arc<dyn GatewaySink>,
    pub(crate) transformer: Transformer,
    pub(crate) links: WebhookLinks,
    allowed_kinds: Vec<EventKind>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn AccountRegistry>,
        telegram: Arc<dyn TelegramSink>,
        gateway: Arc<dyn GatewaySink>,
        transformer: Transformer,
    ) -> Self {
        Self {
            registry,
            telegram,
            gateway,
            transformer,
            links: WebhookLinks::default(),
            allowed_kinds: EventKind::default_allowed(),
        }
    }

    /// Allow-list applied when `route` is called without one. `None` keeps every kind.
    pub fn with_allowed_kinds(mut self, kinds: Option<Vec<EventKind>>) -> Self {
        self.allowed_kinds = kinds.unwrap_or_else(EventKind::default_allowed);
        self
    }

    pub fn with_links(mut self, links: WebhookLinks) -> Self {
        self.links = links;
        self
    }

    pub fn registry(&self) -> &Arc<dyn AccountRegistry> {
        &self.registry
    }

    /// Entry point for Telegram updates: slash commands first, bridged traffic otherwise.
    pub async fn handle_telegram_update(&self, raw: &Value) -> Result<RoutingOutcome> {
        if let Some((ctx, command)) = commands::from_update(raw) {
            tracing::Span::current().record("event_kind", "command");
            tracing::info!(chat_id = %ctx.chat_id, command = command.name(), "bot command");
            let status = commands::execute(self, &ctx, command).await?;
            tracing::info!(outcome = %status, "webhook routed");
            return Ok(RoutingOutcome::Command { status });
        }
        self.route(raw, SourcePlatform::Telegram, None).await
    }

    pub async fn route(
        &self,
        raw: &Value,
        source: SourcePlatform,
        allowed: Option<&[EventKind]>,
    ) -> Result<RoutingOutcome> {
        tracing::info!(platform = %source, "routing webhook");
        let result = self.route_event(raw, source, allowed).await;
        match &result {
            Ok(outcome) => tracing::info!(outcome = outcome.tag(), "webhook routed"),
            Err(err) if err.is_expected() => {
                tracing::info!(code = err.code(), "webhook rejected: {err}")
            }
            Err(err) => tracing::error!(code = err.code(), "webhook failed: {err}"),
        }
        result
    }

    async fn route_event(
        &self,
        raw: &Value,
        source: SourcePlatform,
        allowed: Option<&[EventKind]>,
    ) -> Result<RoutingOutcome> {
        let event = classifier::classify(raw, source)?;
        let span = tracing::Span::current();
        span.record("event_kind", event.kind.as_str());
        tracing::debug!(routing_key = %event.routing_key(), raw_kind = %event.raw_kind, "classified");

        let kinds = allowed.unwrap_or(&self.allowed_kinds);
        if !kinds.contains(&event.kind) {
            return Err(BridgeError::EventKindNotAllowed { kind: event.kind });
        }

        match source {
            SourcePlatform::WhatsApp => self.route_to_telegram(&event).await,
            SourcePlatform::Telegram => self.route_to_gateway(&event).await,
        }
    }

    async fn route_to_telegram(&self, event: &InboundEvent) -> Result<RoutingOutcome> {
        let Origin::Gateway { instance_id, .. } = &event.origin else {
            return Err(BridgeError::InvalidEnvelope("gateway event without instance".to_string()));
        };
        let account = self
            .registry
            .find_by_instance(*instance_id)
            .await?
            .ok_or_else(|| BridgeError::AccountNotFound(format!("instance {instance_id}")))?;
        tracing::Span::current().record("account_id", account.instance_id);

        if !account.notifications.allows(event.kind) {
            return Ok(RoutingOutcome::Muted { kind: event.kind });
        }

        let destination = self
            .registry
            .resolve_destination_chat(&account.owner_chat_id)
            .await?;
        let messages = self.transformer.to_outbound(event, &account, &destination)?;

        for message in &messages {
            self.telegram.deliver(message).await?;
        }
        Ok(RoutingOutcome::Delivered {
            kind: event.kind,
            messages: messages.len(),
        })
    }

    async fn route_to_gateway(&self, event: &InboundEvent) -> Result<RoutingOutcome> {
        let Origin::Telegram {
            chat_id, reply_to_text, ..
        } = &event.origin
        else {
            return Err(BridgeError::InvalidEnvelope("telegram event without chat".to_string()));
        };

        let Some(account) = self.registry.find_by_chat(chat_id).await? else {
            self.notify_best_effort(chat_id, ACCOUNT_GUIDANCE).await;
            return Err(BridgeError::AccountNotFound(format!("chat {chat_id}")));
        };
        tracing::Span::current().record("account_id", account.instance_id);

        let Some(recipient) = reply_to_text.as_deref().and_then(recipient_from_reply) else {
            self.notify_best_effort(chat_id, RECIPIENT_GUIDANCE).await;
            return Err(BridgeError::RecipientUnknown);
        };

        let request = self.transformer.to_gateway(event, &recipient)?;
        let request = self.resolve_media(request).await?;
        let message_id = self.gateway.send(&account, &request).await?;
        Ok(RoutingOutcome::Forwarded {
            kind: event.kind,
            message_id,
        })
    }

    /// Swaps Telegram file ids for URLs the gateway can fetch.
    async fn resolve_media(&self, request: GatewaySendRequest) -> Result<GatewaySendRequest> {
        match request {
            GatewaySendRequest::File {
                chat_id,
                source: MediaSource::TelegramFile { file_id },
                file_name,
                caption,
            } => {
                let url = self.telegram.file_url(&file_id).await?;
                Ok(GatewaySendRequest::File {
                    chat_id,
                    source: MediaSource::Url(url),
                    file_name,
                    caption,
                })
            }
            other => Ok(other),
        }
    }

    pub(crate) async fn reply(&self, chat_id: &str, content: OutboundContent) -> Result<()> {
        self.telegram.deliver(&OutboundMessage::new(chat_id, content)).await
    }

    async fn notify_best_effort(&self, chat_id: &str, text: &str) {
        if let Err(err) = self.reply(chat_id, OutboundContent::text(text)).await {
            tracing::warn!(chat_id, "guidance message failed: {err}");
        }
    }
}
