//! Test doubles for the dispatch collaborators.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::channels::{MessagingGateway, OutboundMessage};
use crate::error::{ChannelError, DatabaseError, LlmError};
use crate::llm::{QualificationSignal, ReplyGenerator, ReplyRequest};
use crate::store::model::{AiStateRecord, ConversationState, FlowData, LoggedMessage, UserPatch};
use crate::store::{Database, MemoryBackend};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Failure {
    #[default]
    None,
    All,
    Interactive,
    Panic,
}

/// Gateway that records every delivered message.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    failure: Failure,
}

impl RecordingGateway {
    /// Rejects every send.
    pub fn failing() -> Self {
        Self {
            failure: Failure::All,
            ..Self::default()
        }
    }

    /// Rejects buttons and lists, accepts text.
    pub fn failing_interactive() -> Self {
        Self {
            failure: Failure::Interactive,
            ..Self::default()
        }
    }

    /// Panics on every send.
    pub fn panicking() -> Self {
        Self {
            failure: Failure::Panic,
            ..Self::default()
        }
    }

    pub fn sent_to(&self, user_id: &str) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == user_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn texts_to(&self, user_id: &str) -> Vec<String> {
        self.sent_to(user_id)
            .iter()
            .map(|m| m.body().to_string())
            .collect()
    }

    pub fn total(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, to: &str, message: &OutboundMessage) -> Result<(), ChannelError> {
        let rejected = match self.failure {
            Failure::None => false,
            Failure::All => true,
            Failure::Interactive => message.is_interactive(),
            Failure::Panic => panic!("gateway exploded"),
        };
        if rejected {
            return Err(ChannelError::SendFailed {
                name: "recording".into(),
                reason: "rejected".into(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), message.clone()));
        Ok(())
    }
}

/// Generator returning a fixed signal, or failing.
pub struct StubGenerator {
    pub signal: Option<QualificationSignal>,
    pub delay: Option<std::time::Duration>,
    pub requests: Mutex<Vec<ReplyRequest>>,
}

impl StubGenerator {
    pub fn replying(signal: QualificationSignal) -> Self {
        Self {
            signal: Some(signal),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            signal: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn slow(signal: QualificationSignal, delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::replying(signal)
        }
    }
}

#[async_trait]
impl ReplyGenerator for StubGenerator {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, request: &ReplyRequest) -> Result<QualificationSignal, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.signal.clone().ok_or_else(|| LlmError::RequestFailed {
            provider: "stub".into(),
            reason: "down".into(),
        })
    }
}

/// Memory store whose first `n` ai-state reads fail.
pub struct FlakyAiStateStore {
    pub inner: Arc<MemoryBackend>,
    failures_left: AtomicUsize,
}

impl FlakyAiStateStore {
    pub fn new(inner: Arc<MemoryBackend>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl Database for FlakyAiStateStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn get_flow(&self, user_id: &str) -> Result<ConversationState, DatabaseError> {
        self.inner.get_flow(user_id).await
    }

    async fn set_flow_state(&self, user_id: &str, state: &str) -> Result<(), DatabaseError> {
        self.inner.set_flow_state(user_id, state).await
    }

    async fn merge_flow_data(&self, user_id: &str, fields: &FlowData) -> Result<(), DatabaseError> {
        self.inner.merge_flow_data(user_id, fields).await
    }

    async fn clear_flow(&self, user_id: &str) -> Result<(), DatabaseError> {
        self.inner.clear_flow(user_id).await
    }

    async fn get_ai_state(&self, user_id: &str) -> Result<AiStateRecord, DatabaseError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DatabaseError::Request {
                table: "ai_state".into(),
                reason: "connection reset".into(),
            });
        }
        self.inner.get_ai_state(user_id).await
    }

    async fn upsert_ai_state(
        &self,
        user_id: &str,
        record: &AiStateRecord,
    ) -> Result<(), DatabaseError> {
        self.inner.upsert_ai_state(user_id, record).await
    }

    async fn log_message(&self, message: &LoggedMessage) -> Result<(), DatabaseError> {
        self.inner.log_message(message).await
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<LoggedMessage>, DatabaseError> {
        self.inner.recent_messages(user_id, limit).await
    }

    async fn upsert_user(&self, user_id: &str, patch: &UserPatch) -> Result<(), DatabaseError> {
        self.inner.upsert_user(user_id, patch).await
    }
}
