//! Prompt construction and response parsing for the model-backed generator.

use serde::Deserialize;

use super::{FALLBACK_REPLY, QualificationSignal, ReplyRequest};
use crate::flow::normalize::clip;
use crate::store::model::Direction;

/// History lines included in the user prompt.
const HISTORY_LINES: usize = 8;
const HISTORY_LINE_CHARS: usize = 300;

pub fn build_system_prompt() -> String {
    "Você é o assistente comercial da Mugô, agência de automação, sites, social media e IA. \
     Responda em português do Brasil, em no máximo duas frases curtas, sempre com uma pergunta \
     objetiva que ajude a qualificar o lead.\n\n\
     Responda SOMENTE com um objeto JSON:\n\
     {\"reply\": \"...\", \"handoff\": false, \"handoff_summary\": \"...\", \"lead_score\": 0, \"lead_theme\": \"...\", \"intent\": \"...\"}\n\n\
     Regras:\n\
     - \"lead_score\" vai de 0 a 100 (intenção de compra, urgência, orçamento)\n\
     - \"handoff\" = true quando o lead pede preço, orçamento, contrato, reunião ou um humano\n\
     - \"handoff_summary\": uma frase com o que o lead precisa (só quando handoff = true)\n\
     - \"lead_theme\": automação, site, social media, ia ou indefinido\n\
     - Nunca invente preços nem prazos"
        .to_string()
}

/// Build the user prompt from the message, funnel answers and history.
pub fn build_user_prompt(request: &ReplyRequest) -> String {
    let mut prompt = String::with_capacity(512);

    if !request.flow_context.is_empty() {
        prompt.push_str("Respostas do funil:\n");
        for (field, value) in &request.flow_context {
            prompt.push_str(&format!("- {field}: {value}\n"));
        }
        prompt.push('\n');
    }

    // Oldest first reads naturally.
    let history: Vec<_> = request.history.iter().take(HISTORY_LINES).collect();
    if !history.is_empty() {
        prompt.push_str("Conversa recente:\n");
        for message in history.into_iter().rev() {
            let who = match message.direction {
                Direction::In => "Lead",
                Direction::Out => "Bot",
            };
            prompt.push_str(&format!("{who}: {}\n", clip(&message.text, HISTORY_LINE_CHARS)));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("Mensagem do lead: {}", request.text.trim()));
    prompt
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSignal {
    reply: String,
    handoff: bool,
    handoff_summary: String,
    lead_score: serde_json::Value,
    lead_theme: String,
    intent: String,
}

/// Parse model output into a signal.
///
/// Output that is not a JSON object is sent as-is with a zero score; an
/// object without a reply falls back to the canned answer.
pub fn parse_signal(raw: &str) -> QualificationSignal {
    let json_str = extract_json_object(raw);
    let Ok(parsed) = serde_json::from_str::<RawSignal>(&json_str) else {
        let text = raw.trim();
        return if text.is_empty() {
            QualificationSignal::fallback()
        } else {
            QualificationSignal::new(text, 0)
        };
    };

    let score = score_from(&parsed.lead_score);
    let reply = parsed.reply.trim();
    let mut signal = QualificationSignal::new(
        if reply.is_empty() { FALLBACK_REPLY } else { reply },
        score,
    );
    signal.should_handoff = parsed.handoff;
    signal.handoff_summary = parsed.handoff_summary.trim().to_string();
    if !parsed.lead_theme.trim().is_empty() {
        signal.lead_theme = parsed.lead_theme.trim().to_string();
    }
    if !parsed.intent.trim().is_empty() {
        signal.intent = parsed.intent.trim().to_string();
    }
    signal
}

/// Models sometimes quote the score; anything unreadable counts as zero.
fn score_from(value: &serde_json::Value) -> u32 {
    let raw = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() => v.round().clamp(0.0, 100.0) as u32,
        _ => 0,
    }
}

/// Extract a JSON object from model output (handles markdown wrapping).
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LeadTemperature;
    use crate::store::model::{FlowData, LoggedMessage};

    #[test]
    fn system_prompt_names_every_field() {
        let prompt = build_system_prompt();
        for field in ["reply", "handoff", "handoff_summary", "lead_score", "lead_theme", "intent"] {
            assert!(prompt.contains(field), "missing {field}");
        }
    }

    #[test]
    fn user_prompt_includes_context_and_history_oldest_first() {
        let mut flow_context = FlowData::new();
        flow_context.insert("category".into(), "website".into());
        let request = ReplyRequest {
            user_id: "5511".into(),
            text: " quanto custa? ".into(),
            flow_context,
            history: vec![
                LoggedMessage::new("5511", Direction::In, "segunda", serde_json::Value::Null),
                LoggedMessage::new("5511", Direction::Out, "primeira", serde_json::Value::Null),
            ],
        };
        let prompt = build_user_prompt(&request);
        assert!(prompt.contains("- category: website"));
        let first = prompt.find("Bot: primeira").unwrap();
        let second = prompt.find("Lead: segunda").unwrap();
        assert!(first < second);
        assert!(prompt.ends_with("Mensagem do lead: quanto custa?"));
    }

    #[test]
    fn extract_handles_fences_and_prose() {
        assert_eq!(extract_json_object(r#"{"a":1}"#), r#"{"a":1}"#);
        assert_eq!(extract_json_object("```json\n{\"a\":1}\n```"), r#"{"a":1}"#);
        assert_eq!(extract_json_object("```\n{\"a\":1}\n```"), r#"{"a":1}"#);
        assert_eq!(extract_json_object(r#"Claro: {"a":1} ok"#), r#"{"a":1}"#);
        assert_eq!(extract_json_object("sem json"), "sem json");
    }

    #[test]
    fn parse_full_signal_derives_temperature() {
        let signal = parse_signal(
            r#"{"reply":"Vamos marcar?","handoff":true,"handoff_summary":"quer site","lead_score":75,"lead_temperature":"frio","lead_theme":"site","intent":"orcamento"}"#,
        );
        assert_eq!(signal.reply_text, "Vamos marcar?");
        assert!(signal.should_handoff);
        assert_eq!(signal.handoff_summary, "quer site");
        assert_eq!(signal.lead_score, 75);
        assert_eq!(signal.lead_temperature, LeadTemperature::Hot);
        assert_eq!(signal.lead_theme, "site");
        assert_eq!(signal.intent, "orcamento");
    }

    #[test]
    fn out_of_range_score_is_clamped() {
        assert_eq!(parse_signal(r#"{"reply":"x","lead_score":140}"#).lead_score, 100);
        assert_eq!(parse_signal(r#"{"reply":"x","lead_score":-3}"#).lead_score, 0);
        assert_eq!(parse_signal(r#"{"reply":"x","lead_score":"55"}"#).lead_score, 55);
        assert_eq!(parse_signal(r#"{"reply":"x","lead_score":null}"#).lead_score, 0);
    }

    #[test]
    fn plain_prose_is_sent_as_is() {
        let signal = parse_signal("Oi! Como posso ajudar?");
        assert_eq!(signal.reply_text, "Oi! Como posso ajudar?");
        assert_eq!(signal.lead_score, 0);
        assert!(!signal.should_handoff);
    }

    #[test]
    fn empty_reply_uses_fallback() {
        assert_eq!(parse_signal(r#"{"lead_score":50}"#).reply_text, FALLBACK_REPLY);
        assert_eq!(parse_signal("   ").reply_text, FALLBACK_REPLY);
    }
}
