//! Engine output — prompts, handoff directives and the menu-size policy.

use serde::{Deserialize, Serialize};

use super::graph::MenuStep;

/// Most quick-reply buttons the channel renders in one message.
pub const MAX_BUTTONS: usize = 3;

/// Choice-id prefix of the pagination button (`more:<page>`).
pub const MORE_PREFIX: &str = "more:";

/// Options per page when paginating with buttons (the third slot holds "more").
const PAGE_SIZE: usize = MAX_BUTTONS - 1;

/// How menus with more than [`MAX_BUTTONS`] options are presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuStyle {
    /// A single list message.
    #[default]
    List,
    /// Button pages with a trailing "more options" button.
    Paged,
}

impl std::str::FromStr for MenuStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "list" => Ok(Self::List),
            "paged" | "buttons" => Ok(Self::Paged),
            other => Err(format!("unknown menu style '{other}' (expected list or paged)")),
        }
    }
}

impl std::fmt::Display for MenuStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::List => "list",
            Self::Paged => "paged",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Text,
    Buttons,
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOption {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A message asking the user for the next answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub kind: PromptKind,
    pub body: String,
    #[serde(default)]
    pub options: Vec<PromptOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_button: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
}

impl Prompt {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            kind: PromptKind::Text,
            body: body.into(),
            options: Vec::new(),
            list_button: None,
            section_title: None,
        }
    }

    /// Render a menu step, applying the menu-size policy.
    ///
    /// `page` is only meaningful for [`MenuStyle::Paged`]; out-of-range pages
    /// fall back to the first one.
    pub fn menu(step: &MenuStep, style: MenuStyle, page: usize, more_title: &str) -> Self {
        let all: Vec<PromptOption> = step
            .options
            .iter()
            .map(|o| PromptOption {
                id: o.id.clone(),
                title: o.title.clone(),
                description: o.description.clone(),
            })
            .collect();

        if all.len() <= MAX_BUTTONS {
            return Self {
                kind: PromptKind::Buttons,
                body: step.prompt.clone(),
                options: all,
                list_button: None,
                section_title: None,
            };
        }

        match style {
            MenuStyle::List => Self {
                kind: PromptKind::List,
                body: step.prompt.clone(),
                options: all,
                list_button: Some(step.list_button.clone()),
                section_title: step.section_title.clone(),
            },
            MenuStyle::Paged => {
                let pages = all.len().div_ceil(PAGE_SIZE);
                let page = if page < pages { page } else { 0 };
                let mut options: Vec<PromptOption> = all
                    .into_iter()
                    .skip(page * PAGE_SIZE)
                    .take(PAGE_SIZE)
                    .collect();
                // Wraps around so the first page stays reachable.
                options.push(PromptOption {
                    id: format!("{MORE_PREFIX}{}", (page + 1) % pages),
                    title: more_title.to_string(),
                    description: None,
                });
                Self {
                    kind: PromptKind::Buttons,
                    body: step.prompt.clone(),
                    options,
                    list_button: None,
                    section_title: None,
                }
            }
        }
    }

    /// Plain-text rendering: body followed by one bullet per option title.
    ///
    /// Used when an interactive send is rejected; titles typed back are
    /// accepted by option matching.
    pub fn plain_text(&self) -> String {
        let mut out = self.body.clone();
        let choices: Vec<&PromptOption> = self
            .options
            .iter()
            .filter(|o| !o.id.starts_with(MORE_PREFIX))
            .collect();
        if !choices.is_empty() {
            out.push('\n');
            for opt in choices {
                out.push_str(&format!("\n• {}", opt.title));
            }
        }
        out
    }

    pub fn option_ids(&self) -> Vec<&str> {
        self.options.iter().map(|o| o.id.as_str()).collect()
    }
}

/// Parse a `more:<page>` pagination id.
pub fn parse_more(choice_id: &str) -> Option<usize> {
    choice_id.strip_prefix(MORE_PREFIX)?.trim().parse().ok()
}

/// Terminal result of a completed funnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffDirective {
    pub acknowledgement: String,
    pub topic: String,
    pub summary: String,
}

/// What the engine wants the dispatcher to do with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowDirective {
    Prompt(Prompt),
    Handoff(HandoffDirective),
    /// Input is not the engine's to handle; the reply generator answers.
    Decline,
}

impl FlowDirective {
    pub fn as_prompt(&self) -> Option<&Prompt> {
        match self {
            Self::Prompt(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::graph::{MenuOption, MenuStep};

    fn step(n: usize) -> MenuStep {
        MenuStep {
            field: "f".into(),
            label: "F".into(),
            prompt: "Escolha".into(),
            list_button: "Ver".into(),
            section_title: Some("Opções".into()),
            options: (1..=n)
                .map(|i| MenuOption {
                    id: format!("o{i}"),
                    title: format!("Opção {i}"),
                    description: None,
                    topic: None,
                    follow_up: None,
                })
                .collect(),
        }
    }

    #[test]
    fn three_or_fewer_options_are_buttons() {
        for n in 1..=3 {
            for style in [MenuStyle::List, MenuStyle::Paged] {
                let p = Prompt::menu(&step(n), style, 0, "Mais");
                assert_eq!(p.kind, PromptKind::Buttons);
                assert_eq!(p.options.len(), n);
            }
        }
    }

    #[test]
    fn more_than_three_is_list_by_default() {
        let p = Prompt::menu(&step(5), MenuStyle::List, 0, "Mais");
        assert_eq!(p.kind, PromptKind::List);
        assert_eq!(p.options.len(), 5);
        assert_eq!(p.list_button.as_deref(), Some("Ver"));
        assert_eq!(p.section_title.as_deref(), Some("Opções"));
    }

    #[test]
    fn paged_menus_never_exceed_button_limit() {
        let s = step(5);
        let first = Prompt::menu(&s, MenuStyle::Paged, 0, "Mais");
        assert_eq!(first.kind, PromptKind::Buttons);
        assert_eq!(first.option_ids(), vec!["o1", "o2", "more:1"]);

        let second = Prompt::menu(&s, MenuStyle::Paged, 1, "Mais");
        assert_eq!(second.option_ids(), vec!["o3", "o4", "more:2"]);

        let last = Prompt::menu(&s, MenuStyle::Paged, 2, "Mais");
        assert_eq!(last.option_ids(), vec!["o5", "more:0"]);

        let clamped = Prompt::menu(&s, MenuStyle::Paged, 42, "Mais");
        assert_eq!(clamped, first);

        for page in 0..3 {
            assert!(Prompt::menu(&s, MenuStyle::Paged, page, "Mais").options.len() <= MAX_BUTTONS);
        }
    }

    #[test]
    fn plain_text_lists_titles_and_skips_more() {
        let p = Prompt::menu(&step(4), MenuStyle::Paged, 0, "Mais");
        assert_eq!(p.plain_text(), "Escolha\n\n• Opção 1\n• Opção 2");
        assert_eq!(Prompt::text("Oi").plain_text(), "Oi");
    }

    #[test]
    fn more_ids_parse() {
        assert_eq!(parse_more("more:2"), Some(2));
        assert_eq!(parse_more("more:x"), None);
        assert_eq!(parse_more("website"), None);
    }

    #[test]
    fn menu_style_parses() {
        assert_eq!("List".parse::<MenuStyle>(), Ok(MenuStyle::List));
        assert_eq!("paged".parse::<MenuStyle>(), Ok(MenuStyle::Paged));
        assert!("carousel".parse::<MenuStyle>().is_err());
        assert_eq!(MenuStyle::Paged.to_string(), "paged");
    }
}
