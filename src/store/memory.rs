//! In-memory backend — used in local mode (no Supabase configured) and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::model::{AiStateRecord, ConversationState, FlowData, LoggedMessage, UserPatch};
use super::traits::Database;
use crate::error::DatabaseError;

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryBackend {
    flows: RwLock<HashMap<String, ConversationState>>,
    ai_states: RwLock<HashMap<String, AiStateRecord>>,
    messages: RwLock<Vec<LoggedMessage>>,
    users: RwLock<HashMap<String, UserPatch>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current user record, if any was written.
    pub async fn user(&self, user_id: &str) -> Option<UserPatch> {
        self.users.read().await.get(user_id).cloned()
    }

    /// Every logged message for a user, oldest first.
    pub async fn messages_for(&self, user_id: &str) -> Vec<LoggedMessage> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Overwrite the raw flow record (used to seed legacy or corrupt states).
    pub async fn put_flow(&self, user_id: &str, state: ConversationState) {
        self.flows.write().await.insert(user_id.to_string(), state);
    }
}

fn check_key(user_id: &str) -> Result<&str, DatabaseError> {
    let key = user_id.trim();
    if key.is_empty() {
        return Err(DatabaseError::InvalidKey("empty user id".into()));
    }
    Ok(key)
}

#[async_trait]
impl Database for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_flow(&self, user_id: &str) -> Result<ConversationState, DatabaseError> {
        let key = check_key(user_id)?;
        Ok(self.flows.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn set_flow_state(&self, user_id: &str, state: &str) -> Result<(), DatabaseError> {
        let key = check_key(user_id)?;
        let mut flows = self.flows.write().await;
        flows.entry(key.to_string()).or_default().state = state.to_string();
        debug!(user_id = key, state, "Flow state set");
        Ok(())
    }

    async fn merge_flow_data(&self, user_id: &str, fields: &FlowData) -> Result<(), DatabaseError> {
        let key = check_key(user_id)?;
        let mut flows = self.flows.write().await;
        let entry = flows.entry(key.to_string()).or_default();
        entry
            .data
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn clear_flow(&self, user_id: &str) -> Result<(), DatabaseError> {
        let key = check_key(user_id)?;
        self.flows.write().await.remove(key);
        Ok(())
    }

    async fn get_ai_state(&self, user_id: &str) -> Result<AiStateRecord, DatabaseError> {
        let key = check_key(user_id)?;
        Ok(self
            .ai_states
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_ai_state(
        &self,
        user_id: &str,
        record: &AiStateRecord,
    ) -> Result<(), DatabaseError> {
        let key = check_key(user_id)?;
        let mut record = record.clone();
        record.updated_at = Some(chrono::Utc::now());
        self.ai_states.write().await.insert(key.to_string(), record);
        Ok(())
    }

    async fn log_message(&self, message: &LoggedMessage) -> Result<(), DatabaseError> {
        check_key(&message.user_id)?;
        if message.text.trim().is_empty() {
            return Ok(());
        }
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<LoggedMessage>, DatabaseError> {
        let key = check_key(user_id)?;
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .rev()
            .filter(|m| m.user_id == key)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_user(&self, user_id: &str, patch: &UserPatch) -> Result<(), DatabaseError> {
        let key = check_key(user_id)?;
        let mut users = self.users.write().await;
        users.entry(key.to_string()).or_default().merge(patch.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::Direction;

    #[tokio::test]
    async fn absent_flow_reads_empty() {
        let db = MemoryBackend::new();
        let flow = db.get_flow("5511").await.unwrap();
        assert!(flow.is_empty());
    }

    #[tokio::test]
    async fn merge_keeps_state_and_set_keeps_data() {
        let db = MemoryBackend::new();
        db.set_flow_state("u", "root").await.unwrap();
        let mut fields = FlowData::new();
        fields.insert("category".into(), "website".into());
        db.merge_flow_data("u", &fields).await.unwrap();
        db.set_flow_state("u", "submenu:website").await.unwrap();

        let flow = db.get_flow("u").await.unwrap();
        assert_eq!(flow.state, "submenu:website");
        assert_eq!(flow.data.get("category").map(String::as_str), Some("website"));
    }

    #[tokio::test]
    async fn clear_flow_wipes_everything() {
        let db = MemoryBackend::new();
        db.set_flow_state("u", "budget").await.unwrap();
        db.clear_flow("u").await.unwrap();
        assert!(db.get_flow("u").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_user_id_is_rejected() {
        let db = MemoryBackend::new();
        assert!(matches!(
            db.get_flow("  ").await,
            Err(DatabaseError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn recent_messages_newest_first() {
        let db = MemoryBackend::new();
        for text in ["one", "two", "three"] {
            db.log_message(&LoggedMessage::new("u", Direction::In, text, serde_json::json!({})))
                .await
                .unwrap();
        }
        db.log_message(&LoggedMessage::new("other", Direction::In, "x", serde_json::json!({})))
            .await
            .unwrap();

        let recent = db.recent_messages("u", 2).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn blank_messages_are_not_logged() {
        let db = MemoryBackend::new();
        db.log_message(&LoggedMessage::new("u", Direction::Out, "  ", serde_json::json!({})))
            .await
            .unwrap();
        assert!(db.messages_for("u").await.is_empty());
    }

    #[tokio::test]
    async fn user_upsert_merges() {
        let db = MemoryBackend::new();
        db.upsert_user("u", &UserPatch::contact("Ana", "5511")).await.unwrap();
        db.upsert_user("u", &UserPatch::lead(50, "site")).await.unwrap();
        let user = db.user("u").await.unwrap();
        assert_eq!(user.name.as_deref(), Some("Ana"));
        assert_eq!(user.lead_stage.as_deref(), Some("qualificado"));
    }
}
