//! Menu graph — the copy and options behind every funnel node.
//!
//! The node sequence is fixed (root → submenu → timeline → budget → contact
//! fields → source → cta); the graph only supplies the text, the options and
//! the field each step writes. A JSON file can replace the built-in graph.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::normalize::normalize;
use crate::error::ConfigError;

/// Field names double as state-tag suffixes (`contact:<field>`).
static FIELD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,39}$").expect("valid field regex"));

/// One selectable option of a menu step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuOption {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Human-facing handoff topic (root options only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Replaces the body of the follow-up text field when this option was chosen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<String>,
}

/// A step that offers a fixed set of options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuStep {
    /// Data field written with the chosen option id.
    pub field: String,
    /// Label used for this field in the handoff summary.
    pub label: String,
    pub prompt: String,
    #[serde(default = "default_list_button")]
    pub list_button: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    pub options: Vec<MenuOption>,
}

impl MenuStep {
    /// Find the option addressed by `selector`.
    ///
    /// Exact id first, then a folded comparison against title and id.
    pub fn find(&self, selector: &str) -> Option<&MenuOption> {
        let selector = selector.trim();
        if selector.is_empty() {
            return None;
        }
        if let Some(opt) = self.options.iter().find(|o| o.id == selector) {
            return Some(opt);
        }
        let folded = normalize(selector);
        if folded.is_empty() {
            return None;
        }
        self.options
            .iter()
            .find(|o| normalize(&o.title) == folded || normalize(&o.id) == folded)
    }

    /// Option by exact id.
    pub fn option(&self, id: &str) -> Option<&MenuOption> {
        self.options.iter().find(|o| o.id == id)
    }
}

/// A step that accepts free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextStep {
    pub field: String,
    pub label: String,
    pub prompt: String,
}

/// Complete funnel definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowGraph {
    /// Category menu; option ids key `submenus`.
    pub root: MenuStep,
    pub submenus: BTreeMap<String, MenuStep>,
    pub timeline: MenuStep,
    pub budget: MenuStep,
    /// Ordered free-text fields collected after the budget.
    pub contact: Vec<TextStep>,
    pub source: MenuStep,
    pub cta: MenuStep,
    /// Sent right before the handoff link.
    pub acknowledgement: String,
    #[serde(default = "default_more_title")]
    pub more_options_title: String,
    #[serde(default = "default_topic")]
    pub default_topic: String,
    /// Free-text field whose prompt is replaced by the sub-choice follow-up.
    #[serde(default = "default_follow_up_field")]
    pub follow_up_field: String,
}

fn default_list_button() -> String {
    "Ver opções".into()
}

fn default_more_title() -> String {
    "Mais opções".into()
}

fn default_topic() -> String {
    "Atendimento".into()
}

fn default_follow_up_field() -> String {
    "briefing".into()
}

impl FlowGraph {
    /// Load and validate a graph from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let graph: FlowGraph = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        graph.validate()?;
        Ok(graph)
    }

    /// Reject graphs the engine cannot walk.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: "FLOW_GRAPH_PATH".into(),
            message,
        };

        let mut fields = Vec::new();
        for step in self.menu_steps() {
            if step.options.is_empty() {
                return Err(invalid(format!("step '{}' has no options", step.field)));
            }
            let mut ids = std::collections::HashSet::new();
            for opt in &step.options {
                if opt.id.trim().is_empty() || opt.id.starts_with(super::prompt::MORE_PREFIX) {
                    return Err(invalid(format!("step '{}' has an invalid option id", step.field)));
                }
                if !ids.insert(opt.id.as_str()) {
                    return Err(invalid(format!(
                        "step '{}' repeats option id '{}'",
                        step.field, opt.id
                    )));
                }
            }
        }

        for opt in &self.root.options {
            if !self.submenus.contains_key(&opt.id) {
                return Err(invalid(format!("category '{}' has no submenu", opt.id)));
            }
        }

        let submenu_fields: std::collections::HashSet<&str> =
            self.submenus.values().map(|s| s.field.as_str()).collect();
        if submenu_fields.len() > 1 {
            return Err(invalid("all submenus must write the same field".into()));
        }

        fields.push(self.root.field.as_str());
        fields.extend(submenu_fields);
        fields.extend([
            self.timeline.field.as_str(),
            self.budget.field.as_str(),
            self.source.field.as_str(),
            self.cta.field.as_str(),
        ]);
        fields.extend(self.contact.iter().map(|c| c.field.as_str()));
        let mut seen = std::collections::HashSet::new();
        for field in fields {
            if !FIELD_NAME.is_match(field) {
                return Err(invalid(format!("invalid field name '{field}'")));
            }
            if !seen.insert(field) {
                return Err(invalid(format!("field '{field}' is written by two steps")));
            }
        }
        Ok(())
    }

    fn menu_steps(&self) -> impl Iterator<Item = &MenuStep> {
        [&self.root, &self.timeline, &self.budget, &self.source, &self.cta]
            .into_iter()
            .chain(self.submenus.values())
    }

    /// Field written by the category submenus.
    pub fn subcategory_field(&self) -> Option<&str> {
        self.submenus.values().next().map(|s| s.field.as_str())
    }

    pub fn contact_step(&self, field: &str) -> Option<&TextStep> {
        self.contact.iter().find(|c| c.field == field)
    }
}

// ── Built-in graph ──────────────────────────────────────────────────

const ROOT_TEXT: &str =
    "Oi, tudo bem? Que bom te ver por aqui. Você entrou em contato para falar sobre qual desses temas?";

const SUBMENU_TEXT: &str = "Legal! Qual dessas opções se parece com o seu problema?";

const ABOUT_BUSINESS: &str = "Beleza, a gente pode te ajudar. Vou te encaminhar para um dos responsáveis, mas antes, me fala um pouco sobre o seu negócio";
const ABOUT_BUSINESS_2: &str = "Beleza, vou te encaminhar para uma pessoa responsável. Mas antes, me fala um pouco sobre o seu negócio";
const SITE_LINK: &str = "Beleza, vou te encaminhar para uma pessoa responsável. Mas antes, compartilha aqui o link do seu site, por favor.";
const ABOUT_BRAND: &str = "Beleza, vou te encaminhar para uma pessoa responsável. Mas antes, me conta um pouco sobre a marca que você está criando";
const INSTAGRAM_HANDLE: &str = "Beleza, vou te encaminhar para uma pessoa responsável. Mas antes, compartilha aqui o seu @, caso você já tenha.";
const ABOUT_NEED: &str = "Beleza, vou te encaminhar para uma pessoa responsável. Mas antes, me conta um pouco sobre a sua necessidade";
const ABOUT_IDEA: &str = "Beleza, vou te encaminhar para uma pessoa responsável. Mas antes, me conta um pouco sobre a sua ideia";
const ABOUT_AI_GOAL: &str = "Beleza, vou te encaminhar para alguém que entende do assunto. Antes, me conta rapidinho o que você quer resolver com IA";

fn opt(id: &str, title: &str) -> MenuOption {
    MenuOption {
        id: id.into(),
        title: title.into(),
        description: None,
        topic: None,
        follow_up: None,
    }
}

fn category(id: &str, title: &str, topic: &str) -> MenuOption {
    MenuOption {
        topic: Some(topic.into()),
        ..opt(id, title)
    }
}

fn choice(id: &str, title: &str, follow_up: &str) -> MenuOption {
    MenuOption {
        follow_up: Some(follow_up.into()),
        ..opt(id, title)
    }
}

fn menu(field: &str, label: &str, prompt: &str, options: Vec<MenuOption>) -> MenuStep {
    MenuStep {
        field: field.into(),
        label: label.into(),
        prompt: prompt.into(),
        list_button: default_list_button(),
        section_title: None,
        options,
    }
}

fn submenu(options: Vec<MenuOption>) -> MenuStep {
    menu("subcategory", "Opção", SUBMENU_TEXT, options)
}

impl Default for FlowGraph {
    fn default() -> Self {
        let mut root = menu(
            "category",
            "Tema",
            ROOT_TEXT,
            vec![
                category("automation", "Automação", "Automação"),
                category("website", "Site", "Site"),
                category("social_media", "Social media", "Social media"),
                category("ai", "Inteligência (IA)", "Inteligência Artificial"),
            ],
        );
        root.list_button = "Ver temas".into();
        root.section_title = Some("Temas".into());

        let submenus = BTreeMap::from([
            (
                "automation".to_string(),
                submenu(vec![
                    choice("automate_processes", "Automatizar tarefas", ABOUT_BUSINESS_2),
                    choice("whatsapp_bot", "Bot de WhatsApp", ABOUT_BUSINESS),
                    choice("integrations", "Integrar sistemas", ABOUT_NEED),
                ]),
            ),
            (
                "website".to_string(),
                submenu(vec![
                    choice("new_site", "Quero fazer um site", ABOUT_BUSINESS),
                    choice("redesign", "Já tenho um site", SITE_LINK),
                    choice("landing_page", "Landing page", ABOUT_BUSINESS_2),
                ]),
            ),
            (
                "social_media".to_string(),
                submenu(vec![
                    choice("have_brand", "Tenho uma marca", SITE_LINK),
                    choice("brand_from_scratch", "Criar marca do zero", ABOUT_BRAND),
                    choice("consulting", "Quero consultoria", INSTAGRAM_HANDLE),
                ]),
            ),
            (
                "ai".to_string(),
                submenu(vec![
                    choice("images_videos", "Criar imagens/vídeos", ABOUT_NEED),
                    choice("have_idea", "Tenho uma ideia", ABOUT_IDEA),
                    choice("ai_consulting", "Quero uma consultoria", ABOUT_AI_GOAL),
                ]),
            ),
        ]);

        let timeline = menu(
            "timeline",
            "Prazo",
            "E pra quando você precisa disso?",
            vec![
                opt("asap", "O quanto antes"),
                opt("one_month", "Em até 1 mês"),
                opt("researching", "Só pesquisando"),
            ],
        );

        let mut budget = menu(
            "budget",
            "Investimento",
            "Qual faixa de investimento você imagina para esse projeto?",
            vec![
                opt("up_to_2k", "Até R$ 2 mil"),
                opt("2k_5k", "R$ 2 a 5 mil"),
                opt("5k_10k", "R$ 5 a 10 mil"),
                opt("above_10k", "Acima de R$ 10 mil"),
                opt("undecided", "Ainda não sei"),
            ],
        );
        budget.list_button = "Ver faixas".into();
        budget.section_title = Some("Investimento".into());

        let contact = vec![
            TextStep {
                field: "briefing".into(),
                label: "Contexto".into(),
                prompt: "Me conta um pouco mais sobre o que você precisa, por favor 🙂".into(),
            },
            TextStep {
                field: "contact_name".into(),
                label: "Nome".into(),
                prompt: "Pra eu te apresentar ao especialista: qual é o seu nome?".into(),
            },
        ];

        let source = menu(
            "source",
            "Origem",
            "Como você conheceu a Mugo?",
            vec![
                opt("instagram", "Instagram"),
                opt("google", "Google"),
                opt("referral", "Indicação"),
                opt("other", "Outro"),
            ],
        );

        let cta = menu(
            "cta",
            "Próximo passo",
            "Última pergunta: como prefere seguir?",
            vec![
                opt("talk_now", "Falar agora"),
                opt("schedule_call", "Agendar uma call"),
                opt("receive_proposal", "Receber proposta"),
            ],
        );

        Self {
            root,
            submenus,
            timeline,
            budget,
            contact,
            source,
            cta,
            acknowledgement: "Perfeito. Já vou te encaminhar. ✅".into(),
            more_options_title: default_more_title(),
            default_topic: default_topic(),
            follow_up_field: default_follow_up_field(),
        }
    }
}
