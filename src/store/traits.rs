//! Unified `Database` trait — single async interface for all persistence.
//!
//! The flow section is the conversation state store owned by the flow engine.
//! The ai-state section backs dedupe and post-handoff memory. Messages are an
//! append-only log, and users hold contact data plus lead intelligence.

use async_trait::async_trait;

use super::model::{AiStateRecord, ConversationState, FlowData, LoggedMessage, UserPatch};
use crate::error::DatabaseError;

/// Backend-agnostic persistence trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    // ── Flow ────────────────────────────────────────────────────────

    /// Read the conversation state; an absent record reads as empty.
    async fn get_flow(&self, user_id: &str) -> Result<ConversationState, DatabaseError>;

    /// Replace the state tag, keeping collected data.
    async fn set_flow_state(&self, user_id: &str, state: &str) -> Result<(), DatabaseError>;

    /// Merge fields into the collected data, keeping the state tag.
    async fn merge_flow_data(&self, user_id: &str, fields: &FlowData) -> Result<(), DatabaseError>;

    /// Wipe both the state tag and the collected data.
    async fn clear_flow(&self, user_id: &str) -> Result<(), DatabaseError>;

    // ── AI state ────────────────────────────────────────────────────

    /// Read the ai-state record; an absent record reads as default.
    async fn get_ai_state(&self, user_id: &str) -> Result<AiStateRecord, DatabaseError>;

    /// Upsert the whole ai-state record.
    async fn upsert_ai_state(
        &self,
        user_id: &str,
        record: &AiStateRecord,
    ) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Append one message to the log.
    async fn log_message(&self, message: &LoggedMessage) -> Result<(), DatabaseError>;

    /// Most recent messages for a user, newest first.
    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<LoggedMessage>, DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Create or merge-update the user record.
    async fn upsert_user(&self, user_id: &str, patch: &UserPatch) -> Result<(), DatabaseError>;
}
