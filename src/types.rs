use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePlatform {
    Telegram,
    WhatsApp,
}

impl SourcePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::WhatsApp => "whatsapp",
        }
    }
}

impl fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized tag of an inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Text,
    ExtendedText,
    Image,
    Video,
    Audio,
    Document,
    Location,
    Contact,
    Poll,
    OutgoingStatus,
    InstanceStateChange,
}

impl EventKind {
    pub const CONTENT: [EventKind; 9] = [
        EventKind::Text,
        EventKind::ExtendedText,
        EventKind::Image,
        EventKind::Video,
        EventKind::Audio,
        EventKind::Document,
        EventKind::Location,
        EventKind::Contact,
        EventKind::Poll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::ExtendedText => "extended_text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::Poll => "poll",
            Self::OutgoingStatus => "outgoing_status",
            Self::InstanceStateChange => "instance_state_change",
        }
    }

    pub fn is_content(&self) -> bool {
        !matches!(self, Self::OutgoingStatus | Self::InstanceStateChange)
    }

    /// Allow-list used when the caller supplies none.
    pub fn default_allowed() -> Vec<EventKind> {
        let mut kinds = Self::CONTENT.to_vec();
        kinds.push(Self::OutgoingStatus);
        kinds.push(Self::InstanceStateChange);
        kinds
    }

    /// Maps the gateway's `typeMessage` value.
    pub fn from_gateway_message_type(value: &str) -> Option<Self> {
        match value {
            "textMessage" => Some(Self::Text),
            "extendedTextMessage" => Some(Self::ExtendedText),
            "imageMessage" => Some(Self::Image),
            "videoMessage" => Some(Self::Video),
            "audioMessage" => Some(Self::Audio),
            "documentMessage" => Some(Self::Document),
            "locationMessage" => Some(Self::Location),
            "contactMessage" => Some(Self::Contact),
            "pollMessage" => Some(Self::Poll),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationFlags {
    pub incoming: bool,
    pub outgoing_status: bool,
    pub instance_state: bool,
}

impl Default for NotificationFlags {
    fn default() -> Self {
        Self {
            incoming: true,
            outgoing_status: true,
            instance_state: true,
        }
    }
}

impl NotificationFlags {
    pub fn allows(&self, kind: EventKind) -> bool {
        match kind {
            kind if kind.is_content() => self.incoming,
            EventKind::OutgoingStatus => self.outgoing_status,
            _ => self.instance_state,
        }
    }
}

/// A bound pairing of a Telegram chat to a gateway instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub owner_chat_id: String,
    pub instance_id: i64,
    #[serde(skip_serializing)]
    pub credential_token: String,
    pub user_name: Option<String>,
    pub destination_chat_id: Option<String>,
    pub notifications: NotificationFlags,
}

impl Account {
    pub fn new(owner_chat_id: impl Into<String>, instance_id: i64, credential_token: impl Into<String>) -> Self {
        Self {
            owner_chat_id: owner_chat_id.into(),
            instance_id,
            credential_token: credential_token.into(),
            user_name: None,
            destination_chat_id: None,
            notifications: NotificationFlags::default(),
        }
    }

    /// Chat that receives bridged WhatsApp traffic.
    pub fn destination(&self) -> &str {
        self.destination_chat_id
            .as_deref()
            .unwrap_or(self.owner_chat_id.as_str())
    }
}

/// Keeps the last four characters of a credential for log output.
pub fn redact_token(token: &str) -> String {
    let tail: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{}", tail)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub name: String,
    pub number: String,
    pub chat_id: String,
    pub chat_name: Option<String>,
}

impl SenderInfo {
    pub fn is_group(&self) -> bool {
        self.chat_id.ends_with("@g.us")
    }
}

/// Routing data captured from the originating side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Origin {
    Gateway {
        instance_id: i64,
        sender: Option<SenderInfo>,
        message_id: Option<String>,
    },
    Telegram {
        chat_id: String,
        from_id: String,
        message_id: i64,
        reply_to_text: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MediaSource {
    Url(String),
    TelegramFile { file_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    Text {
        body: String,
    },
    Media {
        source: MediaSource,
        caption: Option<String>,
        file_name: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    Contact {
        display_name: String,
        last_name: Option<String>,
        vcard: Option<String>,
        phone_number: Option<String>,
    },
    Poll {
        question: String,
        options: Vec<String>,
    },
    OutgoingStatus {
        status: String,
        message_id: String,
    },
    StateChange {
        state: String,
    },
}

/// One validated unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub source: SourcePlatform,
    pub kind: EventKind,
    pub raw_kind: String,
    pub origin: Origin,
    pub payload: EventPayload,
}

impl InboundEvent {
    /// Routing key on the originating side: instance id or chat id.
    pub fn routing_key(&self) -> String {
        match &self.origin {
            Origin::Gateway { instance_id, .. } => instance_id.to_string(),
            Origin::Telegram { chat_id, .. } => chat_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "HTML",
        }
    }
}

/// Content of a Telegram-bound message; exactly one shape per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundContent {
    Text {
        text: String,
        parse_mode: Option<ParseMode>,
    },
    Photo {
        url: String,
        caption: Option<String>,
    },
    Video {
        url: String,
        caption: Option<String>,
    },
    Audio {
        url: String,
        caption: Option<String>,
    },
    Document {
        url: String,
        caption: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    Contact {
        phone_number: String,
        first_name: String,
        last_name: Option<String>,
    },
    Poll {
        question: String,
        options: Vec<String>,
    },
}

impl OutboundContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            parse_mode: None,
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            parse_mode: Some(ParseMode::Html),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Photo { .. } => "photo",
            Self::Video { .. } => "video",
            Self::Audio { .. } => "audio",
            Self::Document { .. } => "document",
            Self::Location { .. } => "location",
            Self::Contact { .. } => "contact",
            Self::Poll { .. } => "poll",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub target_chat_id: String,
    pub content: OutboundContent,
}

impl OutboundMessage {
    pub fn new(target_chat_id: impl Into<String>, content: OutboundContent) -> Self {
        Self {
            target_chat_id: target_chat_id.into(),
            content,
        }
    }
}

/// A message bound for the WhatsApp gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewaySendRequest {
    Text {
        chat_id: String,
        message: String,
    },
    File {
        chat_id: String,
        source: MediaSource,
        file_name: String,
        caption: Option<String>,
    },
    Location {
        chat_id: String,
        latitude: f64,
        longitude: f64,
    },
    Contact {
        chat_id: String,
        phone_contact: i64,
        first_name: String,
        last_name: Option<String>,
    },
}

impl GatewaySendRequest {
    pub fn chat_id(&self) -> &str {
        match self {
            Self::Text { chat_id, .. }
            | Self::File { chat_id, .. }
            | Self::Location { chat_id, .. }
            | Self::Contact { chat_id, .. } => chat_id,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::File { .. } => "file",
            Self::Location { .. } => "location",
            Self::Contact { .. } => "contact",
        }
    }
}
