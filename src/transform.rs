//! Message-shape translation between gateway events and Telegram messages.

use crate::error::{BridgeError, Result};
use crate::types::{
    Account, EventKind, EventPayload, GatewaySendRequest, InboundEvent, MediaSource, Origin, OutboundContent,
    OutboundMessage, SenderInfo, SourcePlatform,
};

pub const NUMBER_NOT_FOUND: &str = "Number not found";
pub const HEADER_SEPARATOR: &str = "⸭ ⸭ ⸭ ⸭ ⸭ ⸭ ⸭ ⸭ ⸭ ⸭ ⸭ ⸭ ⸭ ⸭";

const SENDER_LABEL: &str = "• Sender: ";
const NUMBER_LABEL: &str = "• Number: ";
const GROUP_LABEL: &str = "• Group: ";
const CHAT_LABEL: &str = "• Chat: ";

const LOCATION_FOLLOWS: &str = "The message contains a location. It will be sent in the next message.";
const CONTACT_FOLLOWS: &str = "The message contains a contact. It will be sent in the next message.";
const POLL_FOLLOWS: &str = "The message contains a poll. It will be sent in the next message.";

/// Telegram limits, in characters.
pub const MAX_TEXT_CHARS: usize = 4096;
pub const MAX_CAPTION_CHARS: usize = 1024;

#[derive(Debug, Clone)]
pub struct Transformer {
    qr_base_url: String,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new("https://qr.green-api.com")
    }
}

impl Transformer {
    pub fn new(qr_base_url: impl Into<String>) -> Self {
        Self {
            qr_base_url: qr_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Re-authorization link of an instance.
    pub fn qr_url(&self, instance_id: i64, token: &str) -> String {
        format!("{}/waInstance{}/{}", self.qr_base_url, instance_id, token)
    }

    /// Expands a gateway event into the ordered Telegram messages for `destination`.
    pub fn to_outbound(
        &self,
        event: &InboundEvent,
        account: &Account,
        destination: &str,
    ) -> Result<Vec<OutboundMessage>> {
        let (instance_id, sender) = match &event.origin {
            Origin::Gateway { instance_id, sender, .. } if event.source == SourcePlatform::WhatsApp => {
                (*instance_id, sender.as_ref())
            }
            _ => {
                return Err(BridgeError::TransformationError(format!(
                    "{} event cannot be sent to telegram",
                    event.source
                )))
            }
        };
        let header = || format_header(instance_id, sender);

        let contents = match (&event.kind, &event.payload) {
            (EventKind::Text | EventKind::ExtendedText, EventPayload::Text { body }) => {
                vec![OutboundContent::text(clamp(format!("{}{}", header(), body), MAX_TEXT_CHARS))]
            }
            (
                kind @ (EventKind::Image | EventKind::Video | EventKind::Audio | EventKind::Document),
                EventPayload::Media { source, caption, .. },
            ) => {
                let url = match source {
                    MediaSource::Url(url) => url.clone(),
                    MediaSource::TelegramFile { file_id } => {
                        return Err(BridgeError::TransformationError(format!(
                            "gateway media without download url ({file_id})"
                        )))
                    }
                };
                let caption = format!("{}{}", header(), caption.as_deref().unwrap_or_default());
                let caption = Some(clamp(caption, MAX_CAPTION_CHARS));
                vec![media_content(*kind, url, caption)]
            }
            (EventKind::Location, EventPayload::Location { latitude, longitude }) => vec![
                OutboundContent::text(format!("{}{}", header(), LOCATION_FOLLOWS)),
                OutboundContent::Location {
                    latitude: *latitude,
                    longitude: *longitude,
                },
            ],
            (
                EventKind::Contact,
                EventPayload::Contact {
                    display_name,
                    last_name,
                    vcard,
                    ..
                },
            ) => vec![
                OutboundContent::text(format!("{}{}", header(), CONTACT_FOLLOWS)),
                OutboundContent::Contact {
                    phone_number: extract_phone_number(vcard.as_deref().unwrap_or_default()),
                    first_name: display_name.clone(),
                    last_name: last_name.clone(),
                },
            ],
            (EventKind::Poll, EventPayload::Poll { question, options }) => vec![
                OutboundContent::text(format!("{}{}", header(), POLL_FOLLOWS)),
                OutboundContent::Poll {
                    question: question.clone(),
                    options: options.clone(),
                },
            ],
            (EventKind::OutgoingStatus, EventPayload::OutgoingStatus { status, message_id }) => {
                vec![OutboundContent::text(format!(
                    "Message status: {}\nMessage ID: {}",
                    status_label(status),
                    message_id
                ))]
            }
            (EventKind::InstanceStateChange, EventPayload::StateChange { state }) => {
                vec![OutboundContent::html(self.state_text(
                    instance_id,
                    &account.credential_token,
                    state,
                ))]
            }
            (kind, _) => {
                return Err(BridgeError::TransformationError(format!(
                    "payload does not match event kind {kind}"
                )))
            }
        };

        Ok(contents
            .into_iter()
            .map(|content| OutboundMessage::new(destination, content))
            .collect())
    }

    /// Maps a Telegram event onto the gateway send call for `recipient`.
    pub fn to_gateway(&self, event: &InboundEvent, recipient: &str) -> Result<GatewaySendRequest> {
        if event.source != SourcePlatform::Telegram {
            return Err(BridgeError::TransformationError(format!(
                "{} event cannot be sent to whatsapp",
                event.source
            )));
        }
        let chat_id = recipient.to_string();

        match &event.payload {
            EventPayload::Text { body } => Ok(GatewaySendRequest::Text {
                chat_id,
                message: body.clone(),
            }),
            EventPayload::Media {
                source,
                caption,
                file_name,
            } => Ok(GatewaySendRequest::File {
                chat_id,
                source: source.clone(),
                file_name: file_name.clone().unwrap_or_else(|| "file".to_string()),
                caption: caption.clone(),
            }),
            EventPayload::Location { latitude, longitude } => Ok(GatewaySendRequest::Location {
                chat_id,
                latitude: *latitude,
                longitude: *longitude,
            }),
            EventPayload::Contact {
                display_name,
                last_name,
                phone_number,
                ..
            } => {
                let raw = phone_number.as_deref().unwrap_or_default();
                Ok(GatewaySendRequest::Contact {
                    chat_id,
                    phone_contact: parse_phone_contact(raw)?,
                    first_name: display_name.clone(),
                    last_name: last_name.clone(),
                })
            }
            _ => Err(BridgeError::UnsupportedMessageType(event.kind.to_string())),
        }
    }

    /// HTML notice for an instance state change.
    pub fn state_text(&self, instance_id: i64, token: &str, state: &str) -> String {
        let detail = match state {
            "authorized" => "<code>authorized</code>\n\nThe instance is authorized and ready to work.".to_string(),
            "notAuthorized" => format!(
                "<code>notAuthorized</code>\n\nThe instance is not authorized.\nTo authorize it, open:\n{}",
                self.qr_url(instance_id, token)
            ),
            "blocked" => "<code>blocked</code>\n\nThe instance is blocked.".to_string(),
            "starting" => "<code>starting</code>\n\nThe instance is starting (service mode).\n\
                 The instance or its server is rebooting or under maintenance. \
                 It may take up to 5 minutes to reach <code>authorized</code>."
                .to_string(),
            other => format!("<code>{}</code>", escape_html(other)),
        };
        format!("<b>Instance {instance_id} state changed</b>: {detail}")
    }
}

fn media_content(kind: EventKind, url: String, caption: Option<String>) -> OutboundContent {
    match kind {
        EventKind::Image => OutboundContent::Photo { url, caption },
        EventKind::Video => OutboundContent::Video { url, caption },
        EventKind::Audio => OutboundContent::Audio { url, caption },
        _ => OutboundContent::Document { url, caption },
    }
}

/// Header prefixed to every bridged WhatsApp message.
pub fn format_header(instance_id: i64, sender: Option<&SenderInfo>) -> String {
    let mut info = String::new();
    if let Some(sender) = sender {
        info.push_str(&format!("{SENDER_LABEL}{}\n{NUMBER_LABEL}{}\n", sender.name, sender.number));
        if sender.is_group() {
            let group = sender.chat_name.as_deref().unwrap_or("Group Chat");
            info.push_str(&format!("{GROUP_LABEL}{}\n{CHAT_LABEL}{}\n", group, sender.chat_id));
        }
        info.push('\n');
    }
    info.push_str(&format!("• Recipient: Instance {instance_id}"));
    format!("New WhatsApp message:\n\n{info}\n{HEADER_SEPARATOR}\n\n")
}

/// Reads the WhatsApp chat a bridged message came from out of its header.
/// Group chats win over the sender's number.
pub fn recipient_from_reply(quoted: &str) -> Option<String> {
    let field = |label: &str| {
        quoted
            .lines()
            .find_map(|line| line.trim().strip_prefix(label.trim()))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty() && value != "Unknown")
    };
    field(CHAT_LABEL)
        .or_else(|| field(NUMBER_LABEL))
        .map(|raw| normalize_recipient(&raw))
}

/// Bare numbers become personal chat ids.
pub fn normalize_recipient(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains('@') {
        trimmed.to_string()
    } else {
        format!("{}@c.us", trimmed.trim_start_matches('+'))
    }
}

pub fn extract_phone_number(vcard: &str) -> String {
    vcard
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("TEL"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, number)| {
            number
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '+')
                .collect::<String>()
        })
        .filter(|number| !number.is_empty())
        .unwrap_or_else(|| NUMBER_NOT_FOUND.to_string())
}

pub fn status_label(status: &str) -> &str {
    match status {
        "sent" => "sent",
        "delivered" => "delivered",
        "read" => "read",
        "failed" => "failed to send",
        other => other,
    }
}

fn parse_phone_contact(raw: &str) -> Result<i64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .parse::<i64>()
        .map_err(|_| BridgeError::TransformationError(format!("invalid contact phone number: {raw:?}")))
}

/// Cuts `text` to at most `limit` characters, marking the cut with an ellipsis.
pub fn clamp(text: String, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text;
    }
    let mut cut: String = text.chars().take(limit.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
