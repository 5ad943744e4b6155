//! Single entry point per inbound event.
//!
//! Order of business: dedupe, inbound bookkeeping, reset words, post-handoff
//! commands, then the funnel, falling back to the reply generator when the
//! funnel declines.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::commands::{
    POST_HANDOFF_HUMAN, POST_HANDOFF_RESTART, PostHandoffCommand, is_reset_trigger,
    post_handoff_command,
};
use super::handoff::{HandoffProcedure, HandoffRequest};
use super::locks::UserLocks;
use super::outbox::Outbox;
use crate::channels::{Choice, EventKind, InboundEvent, MessagingGateway, OutboundMessage};
use crate::config::HandoffConfig;
use crate::error::{DispatchError, LlmError};
use crate::flow::{FlowDirective, FlowEngine, HandoffDirective, Prompt};
use crate::llm::{QualificationSignal, ReplyGenerator, ReplyRequest};
use crate::store::Database;
use crate::store::model::{AiStateRecord, Direction, LoggedMessage, UserPatch};

/// Log entries handed to the reply generator.
const HISTORY_LIMIT: usize = 10;

const RESET_TEXT: &str = "Tudo certo, recomeçamos. Como posso ajudar?";
const HANDOFF_NOTICE: &str = "Seu atendimento já foi encaminhado para um especialista. \
     Quer falar com ele agora ou começar um novo atendimento?";
const AI_HANDOFF_TOPIC: &str = "Encaminhado pela IA";

/// How one inbound event was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Same message id as the last accepted one.
    Duplicate,
    /// Nothing to act on (no text, no choice).
    Ignored,
    Reset,
    /// Conversation already handed off; the two shortcuts were offered.
    HandoffNotice,
    HandoffRestart,
    HandoffLinkResent,
    /// The funnel answered with its next prompt.
    Prompted,
    /// The funnel completed and the lead was handed off.
    HandedOff,
    /// The reply generator answered; `handoff` when it also handed off.
    Replied { handoff: bool },
    Failed { step: &'static str },
}

pub struct Dispatcher {
    db: Arc<dyn Database>,
    outbox: Outbox,
    engine: Arc<FlowEngine>,
    generator: Arc<dyn ReplyGenerator>,
    handoff: HandoffProcedure,
    locks: UserLocks,
    reply_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<dyn MessagingGateway>,
        engine: Arc<FlowEngine>,
        generator: Arc<dyn ReplyGenerator>,
        handoff: &HandoffConfig,
        reply_timeout: Duration,
    ) -> Self {
        let outbox = Outbox::new(db.clone(), gateway);
        Self {
            handoff: HandoffProcedure::new(db.clone(), outbox.clone(), &handoff.contact_url),
            db,
            outbox,
            engine,
            generator,
            locks: UserLocks::new(),
            reply_timeout,
        }
    }

    /// Handle one inbound event. Never fails; errors become `Failed`.
    pub async fn dispatch(&self, event: InboundEvent) -> DispatchOutcome {
        if event.user_id.trim().is_empty()
            || (event.raw_text.trim().is_empty() && event.choice_id.trim().is_empty())
        {
            return DispatchOutcome::Ignored;
        }

        let cid = correlation_id();
        let _guard = self.locks.acquire(&event.user_id).await;

        match self.run(&event, &cid).await {
            Ok(outcome) => {
                debug!(user_id = %event.user_id, cid = %cid, outcome = ?outcome, "Dispatched");
                outcome
            }
            Err(e) => {
                error!(
                    user_id = %event.user_id,
                    cid = %cid,
                    step = e.step(),
                    error = %e,
                    "Dispatch failed"
                );
                DispatchOutcome::Failed { step: e.step() }
            }
        }
    }

    async fn run(&self, event: &InboundEvent, cid: &str) -> Result<DispatchOutcome, DispatchError> {
        let user_id = event.user_id.as_str();

        // ── Dedupe ──────────────────────────────────────────────────
        // An unreadable record is treated as empty for this event only and is
        // never written back, so stored handoff memory survives.
        let (mut ai_state, loaded) = match self.db.get_ai_state(user_id).await {
            Ok(record) => (record, true),
            Err(e) => {
                warn!(user_id, cid, error = %e, "AI state read failed, dedupe skipped");
                (AiStateRecord::default(), false)
            }
        };
        let message_id = event.message_id.trim();
        if !message_id.is_empty() {
            if ai_state.last_in_msg_id == message_id {
                info!(user_id, cid, message_id, "Duplicate delivery ignored");
                return Ok(DispatchOutcome::Duplicate);
            }
            ai_state.last_in_msg_id = message_id.to_string();
            ai_state.last_in_at = Some(Utc::now());
            if loaded && let Err(e) = self.db.upsert_ai_state(user_id, &ai_state).await {
                warn!(user_id, cid, error = %e, "Dedupe marker write failed");
            }
        }

        // ── Inbound bookkeeping ─────────────────────────────────────
        self.record_inbound(event, cid).await;

        // ── Reset words ─────────────────────────────────────────────
        if event.kind == EventKind::Text && is_reset_trigger(&event.raw_text) {
            info!(user_id, cid, "Reset requested");
            self.restart_conversation(user_id, &ai_state, cid, "reset").await?;
            return Ok(DispatchOutcome::Reset);
        }

        // ── Post-handoff ────────────────────────────────────────────
        if ai_state.handoff_done {
            return match post_handoff_command(&event.raw_text, &event.choice_id) {
                Some(PostHandoffCommand::Restart) => {
                    info!(user_id, cid, "New conversation after handoff");
                    self.restart_conversation(user_id, &ai_state, cid, "post_handoff_restart")
                        .await?;
                    Ok(DispatchOutcome::HandoffRestart)
                }
                Some(PostHandoffCommand::Human) => {
                    self.handoff.resend_link(user_id).await;
                    Ok(DispatchOutcome::HandoffLinkResent)
                }
                None => {
                    let notice = OutboundMessage::buttons(
                        HANDOFF_NOTICE,
                        vec![
                            Choice::new(POST_HANDOFF_HUMAN, "Falar com humano"),
                            Choice::new(POST_HANDOFF_RESTART, "Novo atendimento"),
                        ],
                    );
                    self.outbox
                        .send_with_fallback(user_id, &notice, json!({"cid": cid}))
                        .await
                        .map_err(|e| DispatchError::at("handoff_notice", e))?;
                    Ok(DispatchOutcome::HandoffNotice)
                }
            };
        }

        // ── Funnel ──────────────────────────────────────────────────
        match self
            .engine
            .handle(user_id, &event.raw_text, &event.choice_id)
            .await
        {
            FlowDirective::Prompt(prompt) => {
                self.send_prompt(user_id, &prompt, cid).await?;
                Ok(DispatchOutcome::Prompted)
            }
            FlowDirective::Handoff(directive) => {
                self.flow_handoff(event, directive, cid).await;
                Ok(DispatchOutcome::HandedOff)
            }
            FlowDirective::Decline => {
                let handoff = self.reply(event, cid).await;
                Ok(DispatchOutcome::Replied { handoff })
            }
        }
    }

    async fn record_inbound(&self, event: &InboundEvent, cid: &str) {
        let user_id = event.user_id.as_str();

        let patch = match &event.display_name {
            Some(name) => UserPatch::contact(name, &event.contact_phone),
            None => UserPatch {
                phone: Some(event.contact_phone.trim().to_string()),
                ..UserPatch::default()
            },
        };
        if let Err(e) = self.db.upsert_user(user_id, &patch).await {
            warn!(user_id, cid, error = %e, "User upsert failed");
        }

        let text = if event.raw_text.trim().is_empty() {
            &event.choice_id
        } else {
            &event.raw_text
        };
        let meta = json!({
            "message_id": event.message_id,
            "choice_id": event.choice_id,
            "cid": cid,
        });
        let entry = LoggedMessage::new(user_id, Direction::In, text, meta);
        if let Err(e) = self.db.log_message(&entry).await {
            warn!(user_id, cid, error = %e, "Inbound log failed");
        }
    }

    /// Wipe funnel and handoff memory, then greet with the root prompt.
    async fn restart_conversation(
        &self,
        user_id: &str,
        ai_state: &AiStateRecord,
        cid: &str,
        reason: &'static str,
    ) -> Result<(), DispatchError> {
        self.db
            .upsert_ai_state(user_id, &ai_state.reset_keeping_dedupe())
            .await
            .map_err(|e| DispatchError::at(reason, e))?;
        if let Err(e) = self.db.upsert_user(user_id, &UserPatch::clear_handoff()).await {
            warn!(user_id, cid, error = %e, "Handoff flags clear failed");
        }

        match self.engine.restart(user_id).await {
            Some(prompt) => self.send_prompt(user_id, &prompt, cid).await,
            None => {
                self.db
                    .clear_flow(user_id)
                    .await
                    .map_err(|e| DispatchError::at(reason, e))?;
                self.outbox
                    .send_text(user_id, RESET_TEXT, json!({"cid": cid, "reason": reason}))
                    .await
                    .map_err(|e| DispatchError::at(reason, e))
            }
        }
    }

    async fn send_prompt(
        &self,
        user_id: &str,
        prompt: &Prompt,
        cid: &str,
    ) -> Result<(), DispatchError> {
        let message = OutboundMessage::from(prompt);
        self.outbox
            .send_with_fallback(user_id, &message, json!({"cid": cid, "flow": true}))
            .await
            .map_err(|e| DispatchError::at("prompt", e))
    }

    async fn flow_handoff(&self, event: &InboundEvent, directive: HandoffDirective, cid: &str) {
        let user_id = event.user_id.as_str();
        info!(user_id, cid, topic = %directive.topic, "Funnel completed");
        if let Err(e) = self
            .outbox
            .send_text(user_id, &directive.acknowledgement, json!({"cid": cid}))
            .await
        {
            warn!(user_id, cid, error = %e, "Funnel acknowledgement send failed");
        }
        self.handoff
            .execute(HandoffRequest {
                user_id: user_id.to_string(),
                reason: "flow_completed".to_string(),
                topic: directive.topic,
                summary: directive.summary,
                last_text: event.raw_text.clone(),
            })
            .await;
    }

    /// Ask the reply generator; returns whether it handed off.
    async fn reply(&self, event: &InboundEvent, cid: &str) -> bool {
        let user_id = event.user_id.as_str();
        let flow_context = match self.db.get_flow(user_id).await {
            Ok(state) => state.data,
            Err(e) => {
                warn!(user_id, cid, error = %e, "Flow context read failed");
                Default::default()
            }
        };
        let history = match self.db.recent_messages(user_id, HISTORY_LIMIT).await {
            Ok(history) => history,
            Err(e) => {
                warn!(user_id, cid, error = %e, "History read failed");
                Vec::new()
            }
        };
        let request = ReplyRequest {
            user_id: user_id.to_string(),
            text: event.raw_text.clone(),
            flow_context,
            history,
        };

        let generated = tokio::time::timeout(self.reply_timeout, self.generator.generate(&request))
            .await
            .unwrap_or_else(|_| {
                Err(LlmError::Timeout {
                    provider: self.generator.name().to_string(),
                    timeout: self.reply_timeout,
                })
            });
        let signal = match generated {
            Ok(signal) => signal,
            Err(e) => {
                warn!(user_id, cid, error = %e, "Reply generation failed, sending fallback");
                QualificationSignal::fallback()
            }
        };

        if let Err(e) = self
            .outbox
            .send_text(user_id, &signal.reply_text, json!({"cid": cid, "intent": signal.intent}))
            .await
        {
            warn!(user_id, cid, error = %e, "Reply send failed");
        }

        let lead = UserPatch::lead(signal.lead_score, &signal.lead_theme);
        if let Err(e) = self.db.upsert_user(user_id, &lead).await {
            warn!(user_id, cid, error = %e, "Lead update failed");
        }
        debug!(
            user_id,
            cid,
            score = signal.lead_score,
            temperature = signal.lead_temperature.as_str(),
            handoff = signal.should_handoff,
            "Lead qualified"
        );

        if signal.should_handoff {
            self.handoff
                .execute(HandoffRequest {
                    user_id: user_id.to_string(),
                    reason: "ai_handoff".to_string(),
                    topic: AI_HANDOFF_TOPIC.to_string(),
                    summary: signal.handoff_summary,
                    last_text: event.raw_text.clone(),
                })
                .await;
        }
        signal.should_handoff
    }
}

/// Short id tying together the log lines of one dispatch.
fn correlation_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
