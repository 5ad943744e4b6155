//! Pure transition function.
//!
//! Given the stored state and one inbound input, decide the directive to emit
//! and the store writes needed to reach the next state. No I/O happens here;
//! the engine applies the effects in order.

use super::graph::{FlowGraph, MenuStep};
use super::node::{Decoded, FlowNode, decode};
use super::normalize::{clip, normalize};
use super::prompt::{FlowDirective, HandoffDirective, MenuStyle, Prompt, parse_more};
use crate::store::model::{ConversationState, FlowData};

/// Tokens that restart the funnel from any node, in folded form. The
/// dispatcher treats the same words as a full conversation reset.
pub const GLOBAL_TOKENS: [&str; 9] = [
    "menu", "voltar", "back", "inicio", "reset", "reiniciar", "restart", "comecar", "0",
];

/// Longest free-text answer kept.
pub const MAX_FREE_TEXT: usize = 1200;

/// Longest handoff summary produced by the engine.
pub const MAX_SUMMARY: usize = 1500;

/// One inbound input as the engine sees it.
#[derive(Debug, Clone, Copy)]
pub struct FlowInput<'a> {
    pub raw_text: &'a str,
    pub choice_id: &'a str,
}

impl<'a> FlowInput<'a> {
    pub fn new(raw_text: &'a str, choice_id: &'a str) -> Self {
        Self { raw_text, choice_id }
    }

    /// `choice_id` wins over free text whenever it is present.
    pub fn selector(&self) -> &'a str {
        let choice = self.choice_id.trim();
        if choice.is_empty() {
            self.raw_text.trim()
        } else {
            choice
        }
    }
}

/// A store write requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEffect {
    ClearFlow,
    MergeData(FlowData),
    SetState(String),
}

/// Outcome of [`transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub directive: FlowDirective,
    pub effects: Vec<StateEffect>,
    /// Short label for logs.
    pub reason: &'static str,
}

impl Transition {
    fn new(directive: FlowDirective, reason: &'static str) -> Self {
        Self {
            directive,
            effects: Vec::new(),
            reason,
        }
    }

    fn with_effect(mut self, effect: StateEffect) -> Self {
        self.effects.push(effect);
        self
    }

    fn with_merge(self, data: FlowData) -> Self {
        if data.is_empty() {
            self
        } else {
            self.with_effect(StateEffect::MergeData(data))
        }
    }
}

/// Whether `text` is a global restart token.
pub fn is_global_token(text: &str) -> bool {
    let folded = normalize(text);
    !folded.is_empty() && GLOBAL_TOKENS.contains(&folded.as_str())
}

/// Root prompt plus the writes that put the user back at the start.
pub fn restart(graph: &FlowGraph, style: MenuStyle, reason: &'static str) -> Transition {
    let prompt = render(graph, style, &FlowNode::Root, &FlowData::new(), 0);
    Transition::new(FlowDirective::Prompt(prompt), reason)
        .with_effect(StateEffect::ClearFlow)
        .with_effect(StateEffect::SetState(FlowNode::Root.to_string()))
}

/// Pure transition function.
pub fn transition(
    graph: &FlowGraph,
    style: MenuStyle,
    state: &ConversationState,
    input: FlowInput<'_>,
) -> Transition {
    let (node, migration) = match decode(state, graph) {
        Decoded::Fresh => return restart(graph, style, "fresh"),
        Decoded::Malformed => return restart(graph, style, "malformed_state"),
        Decoded::Node(node) => (node, None),
        Decoded::Migrated { node, patch } => (node, Some(patch)),
    };

    let selector = input.selector();
    if is_global_token(selector) {
        return restart(graph, style, "global_token");
    }

    // Data as seen after the migration patch.
    let mut data = state.data.clone();
    if let Some(patch) = &migration {
        data.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let step = advance(graph, style, &node, &data, input);
    match migration {
        None => step,
        Some(patch) => persist_migration(step, &node, patch),
    }
}

/// Fold a legacy migration into `step` so the rewritten tag gets stored even
/// when the input itself changes nothing.
fn persist_migration(step: Transition, node: &FlowNode, patch: FlowData) -> Transition {
    let leaves_node = step
        .effects
        .iter()
        .any(|e| matches!(e, StateEffect::ClearFlow | StateEffect::SetState(_)));
    let mut effects = Vec::with_capacity(step.effects.len() + 2);
    if !patch.is_empty() {
        effects.push(StateEffect::MergeData(patch));
    }
    effects.extend(step.effects);
    if !leaves_node {
        effects.push(StateEffect::SetState(node.to_string()));
    }
    Transition {
        directive: step.directive,
        effects,
        reason: step.reason,
    }
}

fn advance(
    graph: &FlowGraph,
    style: MenuStyle,
    node: &FlowNode,
    data: &FlowData,
    input: FlowInput<'_>,
) -> Transition {
    if let FlowNode::Contact(field) = node {
        let answer = input.raw_text.trim();
        if answer.is_empty() {
            let prompt = render(graph, style, node, data, 0);
            return Transition::new(FlowDirective::Prompt(prompt), "empty_text");
        }
        let mut merge = FlowData::new();
        merge.insert(field.clone(), clip(answer, MAX_FREE_TEXT));
        return enter_next(graph, style, node, data, merge, "");
    }

    let Some(step) = menu_step(graph, node) else {
        return restart(graph, style, "malformed_state");
    };

    let selector = input.selector();
    if let Some(page) = parse_more(input.choice_id.trim()) {
        let prompt = render(graph, style, node, data, page);
        return Transition::new(FlowDirective::Prompt(prompt), "page");
    }

    match step.find(selector) {
        Some(option) => {
            let mut merge = FlowData::new();
            merge.insert(step.field.clone(), option.id.clone());
            enter_next(graph, style, node, data, merge, &option.id)
        }
        None => {
            let prompt = render(graph, style, node, data, 0);
            Transition::new(FlowDirective::Prompt(prompt), "no_match")
        }
    }
}

/// Merge `merge` and move past `node`; the call-to-action completes the funnel.
fn enter_next(
    graph: &FlowGraph,
    style: MenuStyle,
    node: &FlowNode,
    data: &FlowData,
    merge: FlowData,
    chosen: &str,
) -> Transition {
    let mut combined = data.clone();
    combined.extend(merge.iter().map(|(k, v)| (k.clone(), v.clone())));

    match node.next(graph, chosen) {
        Some(next) => {
            let prompt = render(graph, style, &next, &combined, 0);
            Transition::new(FlowDirective::Prompt(prompt), "advance")
                .with_merge(merge)
                .with_effect(StateEffect::SetState(next.to_string()))
        }
        None => {
            let handoff = HandoffDirective {
                acknowledgement: graph.acknowledgement.clone(),
                topic: topic(graph, &combined),
                summary: summary(graph, &combined),
            };
            Transition::new(FlowDirective::Handoff(handoff), "completed")
                .with_effect(StateEffect::ClearFlow)
        }
    }
}

fn menu_step<'g>(graph: &'g FlowGraph, node: &FlowNode) -> Option<&'g MenuStep> {
    match node {
        FlowNode::Root => Some(&graph.root),
        FlowNode::CategoryMenu(category) => graph.submenus.get(category),
        FlowNode::Timeline => Some(&graph.timeline),
        FlowNode::Budget => Some(&graph.budget),
        FlowNode::Source => Some(&graph.source),
        FlowNode::CallToAction => Some(&graph.cta),
        FlowNode::Contact(_) => None,
    }
}

/// Prompt shown when `node` is entered.
pub fn render(
    graph: &FlowGraph,
    style: MenuStyle,
    node: &FlowNode,
    data: &FlowData,
    page: usize,
) -> Prompt {
    if let FlowNode::Contact(field) = node {
        let body = follow_up(graph, field, data)
            .or_else(|| graph.contact_step(field).map(|s| s.prompt.clone()))
            .unwrap_or_default();
        return Prompt::text(body);
    }
    match menu_step(graph, node) {
        Some(step) => Prompt::menu(step, style, page, &graph.more_options_title),
        None => Prompt::menu(&graph.root, style, 0, &graph.more_options_title),
    }
}

/// Sub-choice follow-up copy, when `field` is the follow-up field.
fn follow_up(graph: &FlowGraph, field: &str, data: &FlowData) -> Option<String> {
    if field != graph.follow_up_field {
        return None;
    }
    let submenu = graph.submenus.get(data.get(&graph.root.field)?)?;
    let chosen = data.get(&submenu.field)?;
    submenu.option(chosen)?.follow_up.clone()
}

/// Handoff topic from the chosen category.
pub fn topic(graph: &FlowGraph, data: &FlowData) -> String {
    data.get(&graph.root.field)
        .and_then(|id| graph.root.option(id))
        .map(|opt| opt.topic.clone().unwrap_or_else(|| opt.title.clone()))
        .unwrap_or_else(|| graph.default_topic.clone())
}

/// One `Label: value` line per collected field, in funnel order.
pub fn summary(graph: &FlowGraph, data: &FlowData) -> String {
    let submenu = data
        .get(&graph.root.field)
        .and_then(|c| graph.submenus.get(c));

    let steps = [
        Some(&graph.root),
        submenu,
        Some(&graph.timeline),
        Some(&graph.budget),
    ];
    let mut lines: Vec<String> = steps
        .into_iter()
        .flatten()
        .filter_map(|step| menu_line(step, data))
        .collect();
    for step in &graph.contact {
        if let Some(value) = data.get(&step.field).filter(|v| !v.trim().is_empty()) {
            lines.push(format!("{}: {}", step.label, value.trim()));
        }
    }
    lines.extend([&graph.source, &graph.cta].into_iter().filter_map(|step| menu_line(step, data)));

    clip(&lines.join("\n"), MAX_SUMMARY)
}

/// Menu answers are shown by option title; unknown ids as stored.
fn menu_line(step: &MenuStep, data: &FlowData) -> Option<String> {
    let value = data.get(&step.field).filter(|v| !v.trim().is_empty())?;
    let shown = step
        .option(value)
        .map(|o| o.title.as_str())
        .unwrap_or(value.as_str());
    Some(format!("{}: {}", step.label, shown))
}
