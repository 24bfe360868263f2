//! Send-failure classification
//!
//! Platform errors arrive as free text. Known policy phrases are mapped to
//! actionable diagnostics for the operator log.

use crate::platform::PlatformError;

/// Why a destination did not receive the payload
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryFailure {
    /// Every strategy failed to resolve the destination
    Unresolved { last_error: String },
    /// The relay may not open a conversation with this recipient
    CannotInitiate(String),
    /// The recipient blocked the relay or it was removed from the chat
    Blocked(String),
    /// The relay lacks permission to post in this chat
    Forbidden(String),
    /// Any other send-time refusal or transport failure
    Rejected(String),
}

impl DeliveryFailure {
    /// Operator-facing hint
    pub fn hint(&self) -> &'static str {
        match self {
            DeliveryFailure::Unresolved { .. } => {
                "check the destination id and that the relay has seen or joined the chat"
            }
            DeliveryFailure::CannotInitiate(_) => {
                "the recipient must start a conversation with the relay first"
            }
            DeliveryFailure::Blocked(_) => "the relay was blocked or removed; re-add it",
            DeliveryFailure::Forbidden(_) => "grant the relay permission to post messages",
            DeliveryFailure::Rejected(_) => "see the platform error for details",
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, DeliveryFailure::Unresolved { .. })
    }
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFailure::Unresolved { last_error } => {
                write!(f, "destination could not be resolved ({})", last_error)
            }
            DeliveryFailure::CannotInitiate(e) => write!(f, "cannot initiate conversation: {}", e),
            DeliveryFailure::Blocked(e) => write!(f, "blocked by recipient: {}", e),
            DeliveryFailure::Forbidden(e) => write!(f, "not allowed to post: {}", e),
            DeliveryFailure::Rejected(e) => write!(f, "send failed: {}", e),
        }
    }
}

const CANNOT_INITIATE: &[&str] = &[
    "can't initiate conversation",
    "cannot initiate conversation",
    "bot can't send messages to bots",
    "user_privacy_restricted",
];

const BLOCKED: &[&str] = &[
    "blocked by the user",
    "user_is_blocked",
    "bot was kicked",
    "user is deactivated",
    "channel_private",
];

const FORBIDDEN: &[&str] = &[
    "not enough rights",
    "have no rights to send",
    "chat_write_forbidden",
    "chat_admin_required",
    "forbidden",
];

/// Map a send-time platform error onto a diagnostic
pub fn classify_send_error(error: &PlatformError) -> DeliveryFailure {
    let text = error.to_string();
    let lowered = text.to_lowercase();
    let has_any = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

    // Order matters: Telegram prefixes most of these with "Forbidden:"
    if has_any(CANNOT_INITIATE) {
        DeliveryFailure::CannotInitiate(text)
    } else if has_any(BLOCKED) {
        DeliveryFailure::Blocked(text)
    } else if has_any(FORBIDDEN) {
        DeliveryFailure::Forbidden(text)
    } else {
        DeliveryFailure::Rejected(text)
    }
}
