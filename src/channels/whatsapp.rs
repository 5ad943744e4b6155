//! WhatsApp Cloud API gateway — renders outbound messages to Graph API JSON.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::warn;

use super::gateway::{Choice, MAX_ROWS_PER_SECTION, MAX_SECTIONS, MessagingGateway, OutboundMessage};
use crate::config::WhatsAppConfig;
use crate::error::ChannelError;
use crate::flow::MAX_BUTTONS;

const GRAPH_BASE_URL: &str = "https://graph.facebook.com";

/// Longest text body the API accepts.
const MAX_TEXT_LENGTH: usize = 4096;
/// Longest interactive body.
const MAX_INTERACTIVE_BODY: usize = 1024;
const MAX_BUTTON_TITLE: usize = 20;
const MAX_LIST_BUTTON: usize = 20;
const MAX_ROW_TITLE: usize = 24;
const MAX_ROW_DESCRIPTION: usize = 72;
const MAX_SECTION_TITLE: usize = 24;
const MAX_CHOICE_ID: usize = 256;

pub struct WhatsAppGateway {
    client: reqwest::Client,
    token: SecretString,
    phone_number_id: String,
    graph_version: String,
    base_url: String,
}

impl WhatsAppGateway {
    pub fn new(config: &WhatsAppConfig, timeout: Duration) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            token: config.token.clone(),
            phone_number_id: config.phone_number_id.clone(),
            graph_version: config.graph_version.clone(),
            base_url: GRAPH_BASE_URL.to_string(),
        })
    }

    /// Point the gateway at another Graph API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/{}/messages",
            self.base_url, self.graph_version, self.phone_number_id
        )
    }
}

/// Keep only the digits of a phone number / wa_id.
pub fn clean_number(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn clip(s: &str, max: usize) -> String {
    s.trim().chars().take(max).collect()
}

fn text_payload(to: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "text",
        "text": {"body": clip(body, MAX_TEXT_LENGTH)},
    })
}

fn valid(choice: &&Choice) -> bool {
    !choice.id.trim().is_empty() && !choice.title.trim().is_empty()
}

/// Render `message` as a Cloud API request body.
///
/// Titles and labels are truncated to the API limits; an interactive
/// message left without any valid choice degrades to text.
pub fn build_payload(to: &str, message: &OutboundMessage) -> Value {
    match message {
        OutboundMessage::Text { body } => text_payload(to, body),
        OutboundMessage::Buttons { body, buttons } => {
            let buttons: Vec<Value> = buttons
                .iter()
                .filter(valid)
                .take(MAX_BUTTONS)
                .map(|b| {
                    json!({
                        "type": "reply",
                        "reply": {
                            "id": clip(&b.id, MAX_CHOICE_ID),
                            "title": clip(&b.title, MAX_BUTTON_TITLE),
                        }
                    })
                })
                .collect();
            if buttons.is_empty() {
                return text_payload(to, body);
            }
            json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "interactive",
                "interactive": {
                    "type": "button",
                    "body": {"text": clip(body, MAX_INTERACTIVE_BODY)},
                    "action": {"buttons": buttons},
                },
            })
        }
        OutboundMessage::List {
            body,
            button,
            sections,
        } => {
            let sections: Vec<Value> = sections
                .iter()
                .take(MAX_SECTIONS)
                .filter_map(|section| {
                    let rows: Vec<Value> = section
                        .rows
                        .iter()
                        .filter(valid)
                        .take(MAX_ROWS_PER_SECTION)
                        .map(|row| {
                            let mut value = json!({
                                "id": clip(&row.id, MAX_CHOICE_ID),
                                "title": clip(&row.title, MAX_ROW_TITLE),
                            });
                            if let Some(desc) =
                                row.description.as_deref().filter(|d| !d.trim().is_empty())
                            {
                                value["description"] = json!(clip(desc, MAX_ROW_DESCRIPTION));
                            }
                            value
                        })
                        .collect();
                    (!rows.is_empty()).then(|| {
                        json!({
                            "title": clip(&section.title, MAX_SECTION_TITLE),
                            "rows": rows,
                        })
                    })
                })
                .collect();
            if sections.is_empty() {
                return text_payload(to, body);
            }
            json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "interactive",
                "interactive": {
                    "type": "list",
                    "body": {"text": clip(body, MAX_INTERACTIVE_BODY)},
                    "action": {
                        "button": clip(button, MAX_LIST_BUTTON),
                        "sections": sections,
                    },
                },
            })
        }
    }
}

#[async_trait]
impl MessagingGateway for WhatsAppGateway {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, to: &str, message: &OutboundMessage) -> Result<(), ChannelError> {
        let to = clean_number(to);
        if to.is_empty() {
            return Err(ChannelError::InvalidRecipient("empty wa_id".into()));
        }
        if message.body().trim().is_empty() {
            return Err(ChannelError::InvalidMessage("empty body".into()));
        }

        let payload = build_payload(&to, message);
        let resp = self
            .client
            .post(self.messages_url())
            .bearer_auth(self.token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "whatsapp".into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, kind = message.kind(), "WhatsApp send rejected");
            return Err(ChannelError::SendFailed {
                name: "whatsapp".into(),
                reason: format!("status {status}: {}", clip(&body, 300)),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::gateway::ListSection;

    fn gateway() -> WhatsAppGateway {
        let config = WhatsAppConfig {
            token: SecretString::from("tok"),
            phone_number_id: "123".into(),
            graph_version: "v20.0".into(),
            app_secret: None,
        };
        WhatsAppGateway::new(&config, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn messages_url_format() {
        assert_eq!(
            gateway().messages_url(),
            "https://graph.facebook.com/v20.0/123/messages"
        );
        assert_eq!(
            gateway().with_base_url("http://localhost:9999/").messages_url(),
            "http://localhost:9999/v20.0/123/messages"
        );
    }

    #[test]
    fn clean_number_keeps_digits() {
        assert_eq!(clean_number("+55 (11) 9 8888-7777"), "5511988887777");
    }

    #[test]
    fn text_payload_shape() {
        let payload = build_payload("5511", &OutboundMessage::text("  Oi  "));
        assert_eq!(
            payload,
            json!({
                "messaging_product": "whatsapp",
                "to": "5511",
                "type": "text",
                "text": {"body": "Oi"},
            })
        );
    }

    #[test]
    fn buttons_are_capped_and_titles_truncated() {
        let msg = OutboundMessage::buttons(
            "Escolha",
            vec![
                Choice::new("a", "Um título bem comprido demais"),
                Choice::new("", "sem id"),
                Choice::new("b", "B"),
                Choice::new("c", "C"),
                Choice::new("d", "D"),
            ],
        );
        let payload = build_payload("5511", &msg);
        let buttons = payload["interactive"]["action"]["buttons"].as_array().unwrap();
        assert_eq!(buttons.len(), 3);
        assert_eq!(buttons[0]["reply"]["title"].as_str().unwrap().chars().count(), 20);
        assert_eq!(buttons[1]["reply"]["id"], "b");
        assert_eq!(payload["interactive"]["type"], "button");
    }

    #[test]
    fn list_limits_are_applied() {
        let rows: Vec<Choice> = (0..12)
            .map(|i| Choice {
                id: format!("r{i}"),
                title: "Uma linha com título longo demais".into(),
                description: Some("d".repeat(100)),
            })
            .collect();
        let msg = OutboundMessage::List {
            body: "Lista".into(),
            button: "Um botão com rótulo comprido".into(),
            sections: vec![ListSection {
                title: "Seção".into(),
                rows,
            }],
        };
        let payload = build_payload("5511", &msg);
        let action = &payload["interactive"]["action"];
        assert_eq!(action["button"].as_str().unwrap().chars().count(), 20);
        let rows = action["sections"][0]["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0]["title"].as_str().unwrap().chars().count(), 24);
        assert_eq!(rows[0]["description"].as_str().unwrap().chars().count(), 72);
    }

    #[test]
    fn interactive_without_valid_choices_degrades_to_text() {
        let msg = OutboundMessage::buttons("Oi", vec![Choice::new(" ", "x")]);
        assert_eq!(build_payload("1", &msg)["type"], "text");

        let list = OutboundMessage::List {
            body: "Oi".into(),
            button: "Ver".into(),
            sections: vec![ListSection {
                title: "S".into(),
                rows: vec![],
            }],
        };
        assert_eq!(build_payload("1", &list)["type"], "text");
    }
}
