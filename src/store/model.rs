//! Persisted record types shared by every backend.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::LeadTemperature;

/// Collected funnel answers, field name → value.
pub type FlowData = BTreeMap<String, String>;

/// Per-user funnel position plus the answers collected so far.
///
/// `state` is the raw tag as stored; decoding it into a node happens in the
/// flow module so that garbage written by older revisions never fails a read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub data: FlowData,
}

impl ConversationState {
    pub fn is_empty(&self) -> bool {
        self.state.trim().is_empty() && self.data.is_empty()
    }
}

/// Dedupe and post-handoff memory for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiStateRecord {
    /// Id of the most recently accepted inbound message.
    pub last_in_msg_id: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub last_in_at: Option<DateTime<Utc>>,
    pub handoff_done: bool,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub handoff_done_at: Option<DateTime<Utc>>,
    pub handoff_topic: String,
    pub handoff_summary: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Older rows store `""` for unset timestamps; anything that is not an
/// RFC 3339 string reads as unset.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    })
}

impl AiStateRecord {
    /// A fresh record that keeps only the dedupe fields of `self`.
    ///
    /// Resets must not forget the last accepted message id, otherwise a
    /// redelivery of the reset command itself would be processed twice.
    pub fn reset_keeping_dedupe(&self) -> Self {
        Self {
            last_in_msg_id: self.last_in_msg_id.clone(),
            last_in_at: self.last_in_at,
            ..Self::default()
        }
    }

    /// Record the handoff so later "talk to a human" shortcuts can reuse it.
    pub fn mark_handoff(&mut self, topic: &str, summary: &str) {
        self.handoff_done = true;
        self.handoff_done_at = Some(Utc::now());
        self.handoff_topic = topic.to_string();
        self.handoff_summary = summary.to_string();
    }
}

/// Direction of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// One entry of the append-only message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedMessage {
    #[serde(rename = "wa_id")]
    pub user_id: String,
    pub direction: Direction,
    pub text: String,
    #[serde(default)]
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LoggedMessage {
    pub fn new(user_id: &str, direction: Direction, text: &str, meta: serde_json::Value) -> Self {
        Self {
            user_id: user_id.to_string(),
            direction,
            text: text.to_string(),
            meta,
            created_at: Utc::now(),
        }
    }
}

/// Partial update of a user record; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "telefone", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_pending: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_temperature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

impl UserPatch {
    pub fn contact(name: &str, phone: &str) -> Self {
        Self {
            name: Some(name.trim().to_string()),
            phone: Some(phone.trim().to_string()),
            ..Self::default()
        }
    }

    /// Topic + notes written by the handoff procedure.
    pub fn handoff(topic: &str, notes: &str) -> Self {
        Self {
            handoff_active: Some(true),
            handoff_pending: Some(false),
            handoff_topic: Some(topic.to_string()),
            notes: Some(notes.to_string()),
            ..Self::default()
        }
    }

    pub fn clear_handoff() -> Self {
        Self {
            handoff_active: Some(false),
            handoff_pending: Some(false),
            handoff_topic: Some(String::new()),
            ..Self::default()
        }
    }

    /// Lead intelligence columns derived from a qualification score.
    pub fn lead(score: u8, theme: &str) -> Self {
        let temperature = LeadTemperature::from_score(score);
        let (stage, priority) = lead_stage(score);
        Self {
            lead_score: Some(score),
            lead_temperature: Some(temperature.as_str().to_string()),
            lead_theme: Some(if theme.trim().is_empty() {
                "indefinido".to_string()
            } else {
                theme.trim().to_string()
            }),
            lead_stage: Some(stage.to_string()),
            priority: Some(priority),
            ..Self::default()
        }
    }

    /// Overlay the `Some` fields of `other` onto `self`.
    pub fn merge(&mut self, other: UserPatch) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            name,
            phone,
            handoff_active,
            handoff_pending,
            handoff_topic,
            notes,
            lead_score,
            lead_temperature,
            lead_theme,
            lead_stage,
            priority
        );
    }
}

/// Pipeline stage and panel priority for a lead score.
pub fn lead_stage(score: u8) -> (&'static str, u8) {
    if score >= 70 {
        ("quente", 3)
    } else if score >= 40 {
        ("qualificado", 2)
    } else {
        ("novo", 1)
    }
}
