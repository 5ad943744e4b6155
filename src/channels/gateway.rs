//! Messaging gateway trait and the abstract outbound message shapes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::flow::{MAX_BUTTONS, Prompt, PromptKind};

/// Rows per list section accepted by the channel.
pub const MAX_ROWS_PER_SECTION: usize = 10;

/// Sections per list message accepted by the channel.
pub const MAX_SECTIONS: usize = 10;

const DEFAULT_SECTION_TITLE: &str = "Opções";
const DEFAULT_LIST_BUTTON: &str = "Ver opções";

/// One selectable button or list row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Choice {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<Choice>,
}

/// Channel-agnostic outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        body: String,
    },
    Buttons {
        body: String,
        buttons: Vec<Choice>,
    },
    List {
        body: String,
        button: String,
        sections: Vec<ListSection>,
    },
}

impl OutboundMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    pub fn buttons(body: impl Into<String>, buttons: Vec<Choice>) -> Self {
        Self::Buttons {
            body: body.into(),
            buttons,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Self::Text { body } | Self::Buttons { body, .. } | Self::List { body, .. } => body,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Buttons { .. } => "buttons",
            Self::List { .. } => "list",
        }
    }

    pub fn is_interactive(&self) -> bool {
        !matches!(self, Self::Text { .. })
    }

    /// Every selectable choice, in display order.
    pub fn choices(&self) -> Vec<&Choice> {
        match self {
            Self::Text { .. } => Vec::new(),
            Self::Buttons { buttons, .. } => buttons.iter().collect(),
            Self::List { sections, .. } => sections.iter().flat_map(|s| s.rows.iter()).collect(),
        }
    }

    /// Plain-text degradation: body followed by one bullet per choice.
    pub fn plain_text(&self) -> String {
        let mut out = self.body().to_string();
        let choices = self.choices();
        if !choices.is_empty() {
            out.push('\n');
            for choice in choices {
                out.push_str(&format!("\n• {}", choice.title));
            }
        }
        out
    }

    /// Text stored in the message log for this send.
    pub fn log_text(&self) -> String {
        match self {
            Self::Text { body } => body.clone(),
            _ => self.plain_text(),
        }
    }
}

impl From<&Prompt> for OutboundMessage {
    fn from(prompt: &Prompt) -> Self {
        let choices: Vec<Choice> = prompt
            .options
            .iter()
            .map(|o| Choice {
                id: o.id.clone(),
                title: o.title.clone(),
                description: o.description.clone(),
            })
            .collect();

        match prompt.kind {
            PromptKind::Text => Self::text(prompt.body.clone()),
            PromptKind::Buttons if choices.is_empty() => Self::text(prompt.body.clone()),
            PromptKind::Buttons => {
                Self::buttons(prompt.body.clone(), choices.into_iter().take(MAX_BUTTONS).collect())
            }
            PromptKind::List => {
                let title = prompt
                    .section_title
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SECTION_TITLE.to_string());
                let sections = choices
                    .chunks(MAX_ROWS_PER_SECTION)
                    .take(MAX_SECTIONS)
                    .enumerate()
                    .map(|(i, rows)| ListSection {
                        title: if i == 0 {
                            title.clone()
                        } else {
                            format!("{title} ({})", i + 1)
                        },
                        rows: rows.to_vec(),
                    })
                    .collect();
                Self::List {
                    body: prompt.body.clone(),
                    button: prompt
                        .list_button
                        .clone()
                        .unwrap_or_else(|| DEFAULT_LIST_BUTTON.to_string()),
                    sections,
                }
            }
        }
    }
}

/// Outbound side of a messaging channel.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Channel name for logs.
    fn name(&self) -> &str;

    /// Deliver `message` to `to` (the channel's user id).
    async fn send(&self, to: &str, message: &OutboundMessage) -> Result<(), ChannelError>;
}
