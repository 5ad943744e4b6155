//! Reply generation for messages the funnel does not handle.
//!
//! Supports:
//! - **OpenAI**: completion model via rig-core, JSON-only answers
//! - **Keyword**: deterministic heuristic used when no API key is configured
//!
//! Both produce a [`QualificationSignal`]: the text to send back plus the
//! lead intelligence derived from the exchange.

pub mod keyword;
pub mod prompts;
mod rig_generator;

pub use keyword::KeywordReplyGenerator;
pub use rig_generator::RigReplyGenerator;

use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;
use crate::error::LlmError;
use crate::store::model::{FlowData, LoggedMessage};

/// Reply sent when the generator fails or times out.
pub const FALLBACK_REPLY: &str = "Em uma frase: qual é o foco agora?";

/// Lead temperature bucket, always derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadTemperature {
    Cold,
    Qualified,
    Hot,
}

impl LeadTemperature {
    pub fn from_score(score: u8) -> Self {
        if score >= 70 {
            Self::Hot
        } else if score >= 40 {
            Self::Qualified
        } else {
            Self::Cold
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Qualified => "qualified",
            Self::Hot => "hot",
        }
    }
}

/// What the generator sees for one free-text message.
#[derive(Debug, Clone, Default)]
pub struct ReplyRequest {
    pub user_id: String,
    pub text: String,
    /// Answers collected by the funnel so far.
    pub flow_context: FlowData,
    /// Recent log entries, newest first.
    pub history: Vec<LoggedMessage>,
}

/// Generator output: the reply plus lead intelligence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualificationSignal {
    pub reply_text: String,
    pub should_handoff: bool,
    pub handoff_summary: String,
    /// 0..=100
    pub lead_score: u8,
    pub lead_temperature: LeadTemperature,
    pub lead_theme: String,
    pub intent: String,
}

impl QualificationSignal {
    /// Build a signal; the score is clamped and the temperature derived from it.
    pub fn new(reply_text: impl Into<String>, lead_score: u32) -> Self {
        let lead_score = lead_score.min(100) as u8;
        Self {
            reply_text: reply_text.into(),
            should_handoff: false,
            handoff_summary: String::new(),
            lead_score,
            lead_temperature: LeadTemperature::from_score(lead_score),
            lead_theme: "indefinido".to_string(),
            intent: "geral".to_string(),
        }
    }

    /// Canned answer used on generator error or timeout.
    pub fn fallback() -> Self {
        Self::new(FALLBACK_REPLY, 0)
    }
}

/// Produces a reply for free text the funnel declined.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Generator name for logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: &ReplyRequest) -> Result<QualificationSignal, LlmError>;
}

/// Pick the generator for this deployment.
///
/// With OpenAI credentials the rig-backed model is used; otherwise the
/// keyword heuristic answers.
pub fn create_generator(
    config: Option<&OpenAiConfig>,
) -> Result<Arc<dyn ReplyGenerator>, LlmError> {
    let Some(config) = config else {
        tracing::info!("No OpenAI key configured, using keyword replies");
        return Ok(Arc::new(KeywordReplyGenerator));
    };

    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigReplyGenerator::new(model, &config.model)))
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn temperature_buckets() {
        let cases = [
            (0, LeadTemperature::Cold),
            (39, LeadTemperature::Cold),
            (40, LeadTemperature::Qualified),
            (69, LeadTemperature::Qualified),
            (70, LeadTemperature::Hot),
            (100, LeadTemperature::Hot),
        ];
        for (score, expected) in cases {
            assert_eq!(LeadTemperature::from_score(score), expected, "score {score}");
        }
    }

    #[test]
    fn signal_clamps_score() {
        let signal = QualificationSignal::new("oi", 250);
        assert_eq!(signal.lead_score, 100);
        assert_eq!(signal.lead_temperature, LeadTemperature::Hot);
        assert!(!signal.reply_text.is_empty());
    }

    #[test]
    fn fallback_is_cold_and_non_empty() {
        let signal = QualificationSignal::fallback();
        assert_eq!(signal.reply_text, FALLBACK_REPLY);
        assert_eq!(signal.lead_temperature, LeadTemperature::Cold);
        assert!(!signal.should_handoff);
    }

    #[test]
    fn without_key_uses_keyword_generator() {
        let generator = create_generator(None).unwrap();
        assert_eq!(generator.name(), "keyword");
    }

    #[tokio::test]
    async fn openai_generator_constructs_with_any_key() {
        // Auth only fails on the first request.
        let config = OpenAiConfig {
            api_key: SecretString::from("sk-test"),
            model: "gpt-4o-mini".to_string(),
        };
        let generator = create_generator(Some(&config)).unwrap();
        assert_eq!(generator.name(), "gpt-4o-mini");
    }
}
