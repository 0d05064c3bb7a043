//! Validation and field extraction for raw webhook envelopes.

use serde_json::Value;

use crate::channels::telegram::update_message;
use crate::error::{BridgeError, Result};
use crate::types::{EventKind, EventPayload, InboundEvent, MediaSource, Origin, SenderInfo, SourcePlatform};

pub fn classify(raw: &Value, source: SourcePlatform) -> Result<InboundEvent> {
    match source {
        SourcePlatform::WhatsApp => classify_gateway(raw),
        SourcePlatform::Telegram => classify_telegram(raw),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

fn required_str(value: &Value, key: &str, context: &str) -> Result<String> {
    str_field(value, key)
        .map(str::to_string)
        .ok_or_else(|| BridgeError::InvalidEnvelope(format!("{context}.{key} missing")))
}

fn required_f64(value: &Value, key: &str, context: &str) -> Result<f64> {
    value
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| BridgeError::InvalidEnvelope(format!("{context}.{key} missing")))
}

fn section<'a>(value: &'a Value, key: &str) -> Result<&'a Value> {
    value
        .get(key)
        .filter(|v| v.is_object())
        .ok_or_else(|| BridgeError::InvalidEnvelope(format!("{key} missing")))
}

/// `idInstance` arrives as a number, occasionally as a numeric string.
fn instance_id(raw: &Value) -> Result<i64> {
    let id = raw.get("instanceData").and_then(|data| data.get("idInstance"));
    id.and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .ok_or_else(|| BridgeError::InvalidEnvelope("instanceData.idInstance missing".to_string()))
}

fn sender_info(raw: &Value) -> Option<SenderInfo> {
    let data = raw.get("senderData")?;
    let sender = str_field(data, "sender").filter(|s| !s.is_empty());
    let chat_id = str_field(data, "chatId").filter(|s| !s.is_empty());
    let sender_name = str_field(data, "senderName").filter(|s| !s.is_empty());
    let chat_name = str_field(data, "chatName").filter(|s| !s.is_empty());

    Some(SenderInfo {
        name: sender_name.or(chat_name).unwrap_or("Unknown").to_string(),
        number: sender.or(chat_id).unwrap_or("Unknown").to_string(),
        chat_id: chat_id.or(sender).unwrap_or_default().to_string(),
        chat_name: chat_name.map(str::to_string),
    })
}

fn classify_gateway(raw: &Value) -> Result<InboundEvent> {
    let type_webhook = str_field(raw, "typeWebhook")
        .ok_or_else(|| BridgeError::InvalidEnvelope("typeWebhook missing".to_string()))?;

    match type_webhook {
        "incomingMessageReceived" => classify_incoming_message(raw),
        "outgoingMessageStatus" => {
            let instance_id = instance_id(raw)?;
            let status = required_str(raw, "status", "envelope")?;
            let message_id = required_str(raw, "idMessage", "envelope")?;
            Ok(InboundEvent {
                source: SourcePlatform::WhatsApp,
                kind: EventKind::OutgoingStatus,
                raw_kind: type_webhook.to_string(),
                origin: Origin::Gateway {
                    instance_id,
                    sender: None,
                    message_id: Some(message_id.clone()),
                },
                payload: EventPayload::OutgoingStatus { status, message_id },
            })
        }
        "stateInstanceChanged" => {
            let instance_id = instance_id(raw)?;
            let state = required_str(raw, "stateInstance", "envelope")?;
            Ok(InboundEvent {
                source: SourcePlatform::WhatsApp,
                kind: EventKind::InstanceStateChange,
                raw_kind: type_webhook.to_string(),
                origin: Origin::Gateway {
                    instance_id,
                    sender: None,
                    message_id: None,
                },
                payload: EventPayload::StateChange { state },
            })
        }
        other => Err(BridgeError::UnsupportedEventKind(other.to_string())),
    }
}

fn classify_incoming_message(raw: &Value) -> Result<InboundEvent> {
    let message_data = section(raw, "messageData")?;
    let type_message = str_field(message_data, "typeMessage")
        .ok_or_else(|| BridgeError::InvalidEnvelope("messageData.typeMessage missing".to_string()))?;
    let kind = EventKind::from_gateway_message_type(type_message)
        .ok_or_else(|| BridgeError::UnsupportedEventKind(type_message.to_string()))?;
    let instance_id = instance_id(raw)?;

    let payload = match kind {
        EventKind::Text => {
            let data = section(message_data, "textMessageData")?;
            EventPayload::Text {
                body: required_str(data, "textMessage", "textMessageData")?,
            }
        }
        EventKind::ExtendedText => {
            let data = section(message_data, "extendedTextMessageData")?;
            EventPayload::Text {
                body: required_str(data, "text", "extendedTextMessageData")?,
            }
        }
        EventKind::Image | EventKind::Video | EventKind::Audio | EventKind::Document => {
            let data = section(message_data, "fileMessageData")?;
            EventPayload::Media {
                source: MediaSource::Url(required_str(data, "downloadUrl", "fileMessageData")?),
                caption: str_field(data, "caption").map(str::to_string),
                file_name: str_field(data, "fileName").map(str::to_string),
            }
        }
        EventKind::Location => {
            let data = section(message_data, "locationMessageData")?;
            EventPayload::Location {
                latitude: required_f64(data, "latitude", "locationMessageData")?,
                longitude: required_f64(data, "longitude", "locationMessageData")?,
            }
        }
        EventKind::Contact => {
            let data = section(message_data, "contactMessageData")?;
            EventPayload::Contact {
                display_name: str_field(data, "displayName").unwrap_or("Unknown").to_string(),
                last_name: None,
                vcard: str_field(data, "vcard").map(str::to_string),
                phone_number: None,
            }
        }
        EventKind::Poll => {
            let data = section(message_data, "pollMessageData")?;
            let options = data
                .get("options")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| str_field(item, "optionName"))
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            EventPayload::Poll {
                question: required_str(data, "name", "pollMessageData")?,
                options,
            }
        }
        EventKind::OutgoingStatus | EventKind::InstanceStateChange => {
            return Err(BridgeError::UnsupportedEventKind(type_message.to_string()))
        }
    };

    Ok(InboundEvent {
        source: SourcePlatform::WhatsApp,
        kind,
        raw_kind: type_message.to_string(),
        origin: Origin::Gateway {
            instance_id,
            sender: sender_info(raw),
            message_id: str_field(raw, "idMessage").map(str::to_string),
        },
        payload,
    })
}

/// First non-`update_id` key, used to name unsupported updates.
fn update_kind(raw: &Value) -> String {
    raw.as_object()
        .and_then(|map| map.keys().find(|key| key.as_str() != "update_id").cloned())
        .unwrap_or_else(|| "unknown".to_string())
}

fn classify_telegram(raw: &Value) -> Result<InboundEvent> {
    let message = update_message(raw).ok_or_else(|| BridgeError::UnsupportedEventKind(update_kind(raw)))?;
    let raw_kind = if raw.get("message").is_some() {
        "message"
    } else {
        "edited_message"
    };

    let chat_id = message
        .get("chat")
        .and_then(|chat| chat.get("id"))
        .and_then(|v| v.as_i64())
        .ok_or_else(|| BridgeError::InvalidEnvelope("message.chat.id missing".to_string()))?
        .to_string();
    let message_id = message
        .get("message_id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| BridgeError::InvalidEnvelope("message.message_id missing".to_string()))?;
    let from_id = message
        .get("from")
        .and_then(|from| from.get("id"))
        .and_then(|v| v.as_i64())
        .map(|id| id.to_string())
        .unwrap_or_else(|| chat_id.clone());
    let reply_to_text = message.get("reply_to_message").and_then(|reply| {
        str_field(reply, "text")
            .or_else(|| str_field(reply, "caption"))
            .map(str::to_string)
    });
    let caption = str_field(message, "caption").map(str::to_string);

    let (kind, payload) = if let Some(text) = str_field(message, "text") {
        (EventKind::Text, EventPayload::Text { body: text.to_string() })
    } else if let Some(photo) = message
        .get("photo")
        .and_then(|v| v.as_array())
        .and_then(|sizes| sizes.last())
    {
        let file_id = required_str(photo, "file_id", "photo")?;
        (
            EventKind::Image,
            EventPayload::Media {
                source: MediaSource::TelegramFile { file_id },
                caption,
                file_name: Some(format!("photo_{message_id}.jpg")),
            },
        )
    } else if let Some(doc) = message.get("document") {
        let file_id = required_str(doc, "file_id", "document")?;
        let file_name = str_field(doc, "file_name")
            .map(str::to_string)
            .unwrap_or_else(|| format!("document_{message_id}"));
        (
            EventKind::Document,
            EventPayload::Media {
                source: MediaSource::TelegramFile { file_id },
                caption,
                file_name: Some(file_name),
            },
        )
    } else if let Some(location) = message.get("location") {
        (
            EventKind::Location,
            EventPayload::Location {
                latitude: required_f64(location, "latitude", "location")?,
                longitude: required_f64(location, "longitude", "location")?,
            },
        )
    } else if let Some(contact) = message.get("contact") {
        (
            EventKind::Contact,
            EventPayload::Contact {
                display_name: str_field(contact, "first_name").unwrap_or_default().to_string(),
                last_name: str_field(contact, "last_name").map(str::to_string),
                vcard: str_field(contact, "vcard").map(str::to_string),
                phone_number: Some(required_str(contact, "phone_number", "contact")?),
            },
        )
    } else {
        let found = message
            .as_object()
            .and_then(|map| {
                ["sticker", "voice", "video", "audio", "animation", "poll", "video_note"]
                    .iter()
                    .find(|key| map.contains_key(**key))
            })
            .copied()
            .unwrap_or("unknown");
        return Err(BridgeError::UnsupportedMessageType(found.to_string()));
    };

    Ok(InboundEvent {
        source: SourcePlatform::Telegram,
        kind,
        raw_kind: raw_kind.to_string(),
        origin: Origin::Telegram {
            chat_id,
            from_id,
            message_id,
            reply_to_text,
        },
        payload,
    })
}
