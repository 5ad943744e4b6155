//! Model-backed reply generator on top of a rig completion model.

use async_trait::async_trait;
use rig::agent::{Agent, AgentBuilder};
use rig::completion::{CompletionModel, Prompt};

use super::prompts::{build_system_prompt, build_user_prompt, parse_signal};
use super::{QualificationSignal, ReplyGenerator, ReplyRequest};
use crate::error::LlmError;

/// Wraps a rig agent whose preamble asks for a JSON qualification object.
pub struct RigReplyGenerator<M: CompletionModel> {
    agent: Agent<M>,
    model_name: String,
}

impl<M: CompletionModel + 'static> RigReplyGenerator<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        let agent = AgentBuilder::new(model)
            .preamble(&build_system_prompt())
            .build();
        Self {
            agent,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> ReplyGenerator for RigReplyGenerator<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, request: &ReplyRequest) -> Result<QualificationSignal, LlmError> {
        let user_prompt = build_user_prompt(request);
        let raw = self
            .agent
            .prompt(user_prompt)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.model_name.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            user_id = %request.user_id,
            model = %self.model_name,
            chars = raw.len(),
            "Reply generated"
        );
        Ok(parse_signal(&raw))
    }
}
