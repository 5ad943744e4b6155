//! Handoff to a human operator through a pre-filled contact link.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use super::outbox::Outbox;
use crate::flow::normalize::clip;
use crate::store::Database;
use crate::store::model::{Direction, UserPatch};

const DEFAULT_TOPIC: &str = "Atendimento";
const ACKNOWLEDGEMENT: &str = "Perfeito. Vou te encaminhar agora para um especialista.";
const LINK_PREFIX: &str = "Toque no link para continuar:";

/// Inbound messages folded into a fallback summary.
const SUMMARY_MESSAGES: usize = 3;
const SUMMARY_CHARS: usize = 500;
/// Log entries scanned when looking for those messages.
const SUMMARY_SCAN: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct HandoffRequest {
    pub user_id: String,
    /// Why the handoff started (`flow_completed`, `ai_handoff`, ...).
    pub reason: String,
    pub topic: String,
    pub summary: String,
    /// The inbound text that triggered the handoff.
    pub last_text: String,
}

/// What was actually handed off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffReport {
    pub topic: String,
    pub summary: String,
    pub link: String,
}

pub struct HandoffProcedure {
    db: Arc<dyn Database>,
    outbox: Outbox,
    contact_url: String,
}

impl HandoffProcedure {
    pub fn new(db: Arc<dyn Database>, outbox: Outbox, contact_url: &str) -> Self {
        Self {
            db,
            outbox,
            contact_url: contact_url.trim_end_matches('/').to_string(),
        }
    }

    /// Contact link with the pre-filled operator message.
    pub fn deep_link(&self, user_id: &str, topic: &str, summary: &str) -> String {
        let text = format!(
            "Olá! Preciso de atendimento.\nAssunto: {topic}\nID: {user_id}\nResumo: {summary}"
        );
        format!("{}?text={}", self.contact_url, urlencoding::encode(&text))
    }

    /// Run the handoff. Never fails; each failing step is logged.
    pub async fn execute(&self, request: HandoffRequest) -> HandoffReport {
        let user_id = request.user_id.as_str();
        let topic = [request.topic.trim(), request.reason.trim()]
            .into_iter()
            .find(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TOPIC)
            .to_string();
        let summary = self.resolve_summary(&request).await;

        if let Err(e) = self
            .db
            .upsert_user(user_id, &UserPatch::handoff(&topic, &summary))
            .await
        {
            warn!(user_id, error = %e, "Handoff user update failed");
        }

        let link = self.deep_link(user_id, &topic, &summary);
        let meta = json!({"handoff": request.reason});
        if let Err(e) = self.outbox.send_text(user_id, ACKNOWLEDGEMENT, meta.clone()).await {
            warn!(user_id, error = %e, "Handoff acknowledgement send failed");
        }
        self.send_link(user_id, &link, meta).await;

        match self.db.get_ai_state(user_id).await {
            Ok(mut record) => {
                record.mark_handoff(&topic, &summary);
                if let Err(e) = self.db.upsert_ai_state(user_id, &record).await {
                    warn!(user_id, error = %e, "Handoff state write failed");
                }
            }
            Err(e) => warn!(user_id, error = %e, "Handoff state read failed"),
        }

        info!(user_id, topic = %topic, reason = %request.reason, "Handoff done");
        HandoffReport {
            topic,
            summary,
            link,
        }
    }

    /// Re-send the link of the last handoff.
    pub async fn resend_link(&self, user_id: &str) -> String {
        let (topic, summary) = match self.db.get_ai_state(user_id).await {
            Ok(record) => (record.handoff_topic, record.handoff_summary),
            Err(e) => {
                warn!(user_id, error = %e, "Handoff state read failed, resending generic link");
                (String::new(), String::new())
            }
        };
        let topic = if topic.trim().is_empty() {
            DEFAULT_TOPIC.to_string()
        } else {
            topic
        };
        let link = self.deep_link(user_id, &topic, &summary);
        self.send_link(user_id, &link, json!({"handoff": "resend"})).await;
        link
    }

    async fn send_link(&self, user_id: &str, link: &str, meta: serde_json::Value) {
        let body = format!("{LINK_PREFIX}\n{link}");
        if let Err(e) = self.outbox.send_text(user_id, &body, meta).await {
            warn!(user_id, error = %e, "Handoff link send failed");
        }
    }

    /// Given summary, else the latest inbound messages, else the last text,
    /// else the reason.
    async fn resolve_summary(&self, request: &HandoffRequest) -> String {
        let given = request.summary.trim();
        if !given.is_empty() {
            return given.to_string();
        }

        match self.db.recent_messages(&request.user_id, SUMMARY_SCAN).await {
            Ok(messages) => {
                let recent: Vec<&str> = messages
                    .iter()
                    .filter(|m| m.direction == Direction::In)
                    .map(|m| m.text.trim())
                    .filter(|t| !t.is_empty())
                    .take(SUMMARY_MESSAGES)
                    .collect();
                if !recent.is_empty() {
                    return clip(&recent.join(" | "), SUMMARY_CHARS);
                }
            }
            Err(e) => warn!(user_id = %request.user_id, error = %e, "History read failed"),
        }

        let last = request.last_text.trim();
        if !last.is_empty() {
            return last.to_string();
        }
        request.reason.trim().to_string()
    }
}
