//! Inbound webhook parsing and signature verification.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::ChannelError;

/// What kind of inbound message produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Text,
    /// Button tap or list pick (including template quick replies).
    Interactive,
}

/// One normalized inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user_id: String,
    /// Channel-assigned message id; may be empty.
    pub message_id: String,
    pub kind: EventKind,
    /// Typed text, or the tapped option's title.
    pub raw_text: String,
    /// Tapped option id; empty for typed text.
    pub choice_id: String,
    pub display_name: Option<String>,
    pub contact_phone: String,
}

impl InboundEvent {
    /// Typed text event (used by tests and the panel).
    pub fn text(user_id: &str, message_id: &str, text: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            message_id: message_id.to_string(),
            kind: EventKind::Text,
            raw_text: text.to_string(),
            choice_id: String::new(),
            display_name: None,
            contact_phone: user_id.to_string(),
        }
    }

    /// Button/list selection event.
    pub fn choice(user_id: &str, message_id: &str, id: &str, title: &str) -> Self {
        Self {
            kind: EventKind::Interactive,
            choice_id: id.to_string(),
            ..Self::text(user_id, message_id, title)
        }
    }
}

// ── Envelope ────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    contacts: Vec<RawContact>,
}

#[derive(Debug, Deserialize)]
struct RawContact {
    #[serde(default)]
    wa_id: String,
    #[serde(default)]
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: String,
    #[serde(default)]
    from: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<TextBody>,
    #[serde(default)]
    interactive: Option<Interactive>,
    #[serde(default)]
    button: Option<TemplateButton>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct Interactive {
    #[serde(default)]
    button_reply: Option<Reply>,
    #[serde(default)]
    list_reply: Option<Reply>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
}

/// Template quick-reply tap.
#[derive(Debug, Deserialize)]
struct TemplateButton {
    #[serde(default)]
    payload: String,
    #[serde(default)]
    text: String,
}

/// Parse a webhook body into at most one event.
///
/// Only the first message of the first change of the first entry is read.
/// Status callbacks and unsupported kinds yield `Ok(None)`.
pub fn parse_event(body: &[u8]) -> Result<Option<InboundEvent>, ChannelError> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|e| ChannelError::InvalidMessage(format!("webhook body: {e}")))?;

    let Some(value) = envelope
        .entry
        .into_iter()
        .next()
        .and_then(|entry| entry.changes.into_iter().next())
        .map(|change| change.value)
    else {
        return Ok(None);
    };

    let Some(message) = value.messages.into_iter().next() else {
        return Ok(None);
    };
    let user_id = message.from.trim().to_string();
    if user_id.is_empty() {
        return Ok(None);
    }

    let (kind, raw_text, choice_id) = match message.kind.as_str() {
        "text" => {
            let body = message.text.map(|t| t.body).unwrap_or_default();
            (EventKind::Text, body, String::new())
        }
        "interactive" => {
            let Some(reply) = message
                .interactive
                .and_then(|i| i.button_reply.or(i.list_reply))
            else {
                return Ok(None);
            };
            (EventKind::Interactive, reply.title, reply.id)
        }
        "button" => {
            let Some(button) = message.button else {
                return Ok(None);
            };
            let id = if button.payload.trim().is_empty() {
                button.text.clone()
            } else {
                button.payload
            };
            (EventKind::Interactive, button.text, id)
        }
        _ => return Ok(None),
    };

    let display_name = value
        .contacts
        .into_iter()
        .find(|c| c.wa_id == user_id)
        .and_then(|c| c.profile)
        .map(|p| p.name.trim().to_string())
        .filter(|n| !n.is_empty());

    Ok(Some(InboundEvent {
        contact_phone: user_id.clone(),
        user_id,
        message_id: message.id.trim().to_string(),
        kind,
        raw_text: raw_text.trim().to_string(),
        choice_id: choice_id.trim().to_string(),
        display_name,
    }))
}

/// Verify `X-Hub-Signature-256` (`sha256=<hex hmac of the raw body>`).
pub fn verify_signature(app_secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    if app_secret.is_empty() {
        return true;
    }
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature).trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

/// Hex signature for `body`, as the provider would send it.
pub fn sign(app_secret: &str, body: &[u8]) -> String {
    let mut mac = match Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
