//! Flow engine — loads state, runs the transition, applies its writes.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::graph::FlowGraph;
use super::prompt::{FlowDirective, MenuStyle, Prompt};
use super::transition::{self, FlowInput, StateEffect, Transition};
use crate::config::FlowConfig;
use crate::store::Database;

/// Drives one user through the funnel.
///
/// Never fails: store errors are logged and the engine carries on with what
/// it has (an unreadable state counts as empty).
pub struct FlowEngine {
    db: Arc<dyn Database>,
    graph: Arc<FlowGraph>,
    style: MenuStyle,
    enabled: bool,
}

impl FlowEngine {
    pub fn new(db: Arc<dyn Database>, graph: Arc<FlowGraph>, config: &FlowConfig) -> Self {
        Self {
            db,
            graph,
            style: config.menu_style,
            enabled: config.enabled,
        }
    }

    #[cfg(test)]
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Handle one inbound input for `user_id`.
    pub async fn handle(&self, user_id: &str, raw_text: &str, choice_id: &str) -> FlowDirective {
        if !self.enabled {
            return FlowDirective::Decline;
        }

        let state = match self.db.get_flow(user_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(user_id, error = %e, "Flow state read failed, treating as empty");
                Default::default()
            }
        };

        let result = transition::transition(
            &self.graph,
            self.style,
            &state,
            FlowInput::new(raw_text, choice_id),
        );
        debug!(
            user_id,
            from = %state.state,
            reason = result.reason,
            writes = result.effects.len(),
            "Flow transition"
        );
        if result.reason == "malformed_state" {
            info!(user_id, state = %state.state, "Unrecognised flow state, restarting");
        }

        self.apply(user_id, result).await
    }

    /// Put `user_id` back at the root and return the root prompt.
    ///
    /// `None` when the flow is disabled.
    pub async fn restart(&self, user_id: &str) -> Option<Prompt> {
        if !self.enabled {
            return None;
        }
        let result = transition::restart(&self.graph, self.style, "restart");
        match self.apply(user_id, result).await {
            FlowDirective::Prompt(prompt) => Some(prompt),
            _ => None,
        }
    }

    async fn apply(&self, user_id: &str, result: Transition) -> FlowDirective {
        for effect in &result.effects {
            let outcome = match effect {
                StateEffect::ClearFlow => self.db.clear_flow(user_id).await,
                StateEffect::MergeData(data) => self.db.merge_flow_data(user_id, data).await,
                StateEffect::SetState(tag) => self.db.set_flow_state(user_id, tag).await,
            };
            if let Err(e) = outcome {
                warn!(user_id, error = %e, effect = ?effect, "Flow state write failed");
            }
        }
        result.directive
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::DatabaseError;
    use crate::flow::prompt::PromptKind;
    use crate::store::model::{AiStateRecord, ConversationState, FlowData, LoggedMessage, UserPatch};
    use crate::store::MemoryBackend;

    fn engine(db: Arc<dyn Database>) -> FlowEngine {
        FlowEngine::new(db, Arc::new(FlowGraph::default()), &FlowConfig::default())
    }

    /// Store whose every call fails.
    struct BrokenStore;

    fn down() -> DatabaseError {
        DatabaseError::Request {
            table: "whatsapp_flow".into(),
            reason: "connection refused".into(),
        }
    }

    #[async_trait]
    impl Database for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        async fn get_flow(&self, _: &str) -> Result<ConversationState, DatabaseError> {
            Err(down())
        }
        async fn set_flow_state(&self, _: &str, _: &str) -> Result<(), DatabaseError> {
            Err(down())
        }
        async fn merge_flow_data(&self, _: &str, _: &FlowData) -> Result<(), DatabaseError> {
            Err(down())
        }
        async fn clear_flow(&self, _: &str) -> Result<(), DatabaseError> {
            Err(down())
        }
        async fn get_ai_state(&self, _: &str) -> Result<AiStateRecord, DatabaseError> {
            Err(down())
        }
        async fn upsert_ai_state(&self, _: &str, _: &AiStateRecord) -> Result<(), DatabaseError> {
            Err(down())
        }
        async fn log_message(&self, _: &LoggedMessage) -> Result<(), DatabaseError> {
            Err(down())
        }
        async fn recent_messages(
            &self,
            _: &str,
            _: usize,
        ) -> Result<Vec<LoggedMessage>, DatabaseError> {
            Err(down())
        }
        async fn upsert_user(&self, _: &str, _: &UserPatch) -> Result<(), DatabaseError> {
            Err(down())
        }
    }

    #[tokio::test]
    async fn oi_then_automation_then_blah() {
        let db = Arc::new(MemoryBackend::new());
        let engine = engine(db.clone());

        let first = engine.handle("5511", "oi", "").await;
        let root = first.as_prompt().unwrap();
        assert_eq!(root.option_ids(), vec!["automation", "website", "social_media", "ai"]);
        assert_eq!(db.get_flow("5511").await.unwrap().state, "root");

        let second = engine.handle("5511", "", "automation").await;
        let submenu = second.as_prompt().unwrap().clone();
        assert_eq!(submenu.kind, PromptKind::Buttons);
        let after_choice = db.get_flow("5511").await.unwrap();
        assert_eq!(after_choice.state, "submenu:automation");
        assert_eq!(after_choice.data["category"], "automation");

        let third = engine.handle("5511", "blah", "").await;
        assert_eq!(third.as_prompt(), Some(&submenu));
        assert_eq!(db.get_flow("5511").await.unwrap(), after_choice);
    }

    #[tokio::test]
    async fn garbage_state_resets_and_wipes_data() {
        let db = Arc::new(MemoryBackend::new());
        let mut data = FlowData::new();
        data.insert("stale".into(), "x".into());
        db.put_flow(
            "u",
            ConversationState {
                state: "step_03_coleta".into(),
                data,
            },
        )
        .await;

        let directive = engine(db.clone()).handle("u", "qualquer coisa", "").await;
        assert!(directive.as_prompt().is_some());
        let stored = db.get_flow("u").await.unwrap();
        assert_eq!(stored.state, "root");
        assert!(stored.data.is_empty());
    }

    #[tokio::test]
    async fn broken_store_still_yields_root_prompt() {
        let directive = engine(Arc::new(BrokenStore)).handle("u", "oi", "").await;
        let prompt = directive.as_prompt().unwrap();
        assert_eq!(prompt.body, FlowGraph::default().root.prompt);
    }

    #[tokio::test]
    async fn disabled_flow_declines_everything() {
        let db = Arc::new(MemoryBackend::new());
        let config = FlowConfig {
            enabled: false,
            ..FlowConfig::default()
        };
        let engine = FlowEngine::new(db.clone(), Arc::new(FlowGraph::default()), &config);
        assert_eq!(engine.handle("u", "oi", "").await, FlowDirective::Decline);
        assert!(engine.restart("u").await.is_none());
        assert!(db.get_flow("u").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restart_clears_progress() {
        let db = Arc::new(MemoryBackend::new());
        let engine = engine(db.clone());
        engine.handle("u", "oi", "").await;
        engine.handle("u", "", "website").await;

        let prompt = engine.restart("u").await.unwrap();
        assert_eq!(prompt.body, engine.graph().root.prompt);
        let stored = db.get_flow("u").await.unwrap();
        assert_eq!(stored.state, "root");
        assert!(stored.data.is_empty());
    }
}
