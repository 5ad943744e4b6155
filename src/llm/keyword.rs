//! Deterministic keyword heuristic, used when no model is configured.

use async_trait::async_trait;

use super::{QualificationSignal, ReplyGenerator, ReplyRequest};
use crate::error::LlmError;
use crate::flow::normalize;

/// Commercial-intent keywords (accent-folded).
const BUYING_KEYWORDS: &[&str] = &[
    "orcamento", "preco", "valor", "prazo", "contrato", "fechar",
];

const HANDOFF_REPLY: &str = "Perfeito. Vou direcionar você agora para um dos nossos especialistas dar sequência estratégica ao seu projeto.";
const PROBE_REPLY: &str = "Em uma frase: o que você quer destravar agora?";

const SUMMARY_CHARS: usize = 180;

/// Hands off on buying keywords, otherwise asks one probing question.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordReplyGenerator;

impl KeywordReplyGenerator {
    pub fn classify(text: &str) -> QualificationSignal {
        let folded = normalize(text);
        let buying = folded
            .split_whitespace()
            .any(|word| BUYING_KEYWORDS.iter().any(|k| word.starts_with(k)));

        if buying {
            let mut signal = QualificationSignal::new(HANDOFF_REPLY, 90);
            signal.should_handoff = true;
            signal.handoff_summary = text.trim().chars().take(SUMMARY_CHARS).collect();
            signal.intent = "handoff".to_string();
            signal
        } else {
            QualificationSignal::new(PROBE_REPLY, 10)
        }
    }
}

#[async_trait]
impl ReplyGenerator for KeywordReplyGenerator {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn generate(&self, request: &ReplyRequest) -> Result<QualificationSignal, LlmError> {
        Ok(Self::classify(&request.text))
    }
}
