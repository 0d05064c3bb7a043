use axum::http::StatusCode;
use thiserror::Error;

use crate::types::EventKind;

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unsupported event kind: {0}")]
    UnsupportedEventKind(String),

    #[error("event kind {kind} not allowed")]
    EventKindNotAllowed { kind: EventKind },

    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("no whatsapp recipient for telegram message")]
    RecipientUnknown,

    #[error("account not found for {0}")]
    AccountNotFound(String),

    #[error("transformation failed: {0}")]
    TransformationError(String),

    #[error("{platform} api error (status {status:?}): {description}")]
    PlatformApiError {
        platform: &'static str,
        status: Option<u16>,
        description: String,
    },

    #[error("unauthorized webhook call")]
    Unauthorized,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl BridgeError {
    pub fn platform(platform: &'static str, status: Option<u16>, description: impl Into<String>) -> Self {
        Self::PlatformApiError {
            platform,
            status,
            description: description.into(),
        }
    }

    /// Stable tag reported to webhook callers and in logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedEventKind(_) => "unsupported_event_kind",
            Self::EventKindNotAllowed { .. } => "event_kind_not_allowed",
            Self::UnsupportedMessageType(_) => "unsupported_message_type",
            Self::InvalidEnvelope(_) => "invalid_envelope",
            Self::RecipientUnknown => "recipient_unknown",
            Self::AccountNotFound(_) => "account_not_found",
            Self::TransformationError(_) => "transformation_error",
            Self::PlatformApiError { .. } => "platform_api_error",
            Self::Unauthorized => "unauthorized",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Status of the error class; platform errors keep the upstream status.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedEventKind(_)
            | Self::EventKindNotAllowed { .. }
            | Self::UnsupportedMessageType(_)
            | Self::InvalidEnvelope(_)
            | Self::RecipientUnknown => StatusCode::BAD_REQUEST,
            Self::AccountNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::TransformationError(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PlatformApiError { status, .. } => status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Validation and lookup errors are ordinary traffic, not server faults.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedEventKind(_)
                | Self::EventKindNotAllowed { .. }
                | Self::UnsupportedMessageType(_)
                | Self::InvalidEnvelope(_)
                | Self::RecipientUnknown
                | Self::AccountNotFound(_)
        )
    }
}
