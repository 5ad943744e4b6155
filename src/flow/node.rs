//! Funnel nodes and decoding of persisted state tags.

use super::graph::FlowGraph;
use crate::store::model::{ConversationState, FlowData};

/// Position in the funnel.
///
/// Progresses linearly: Root → CategoryMenu → Timeline → Budget →
/// Contact(each field) → Source → CallToAction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowNode {
    Root,
    CategoryMenu(String),
    Timeline,
    Budget,
    /// Free-text contact field, by field name.
    Contact(String),
    Source,
    CallToAction,
}

impl FlowNode {
    /// Parse a persisted tag (syntax only; see [`decode`] for graph checks).
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        match tag {
            "root" => return Some(Self::Root),
            "timeline" => return Some(Self::Timeline),
            "budget" => return Some(Self::Budget),
            "source" => return Some(Self::Source),
            "cta" => return Some(Self::CallToAction),
            _ => {}
        }
        if let Some(category) = tag.strip_prefix("submenu:") {
            return (!category.is_empty()).then(|| Self::CategoryMenu(category.to_string()));
        }
        if let Some(field) = tag.strip_prefix("contact:") {
            return (!field.is_empty()).then(|| Self::Contact(field.to_string()));
        }
        None
    }

    /// Whether this node collects free text rather than a menu choice.
    pub fn is_free_text(&self) -> bool {
        matches!(self, Self::Contact(_))
    }

    /// Successor node, or `None` past the call-to-action.
    pub fn next(&self, graph: &FlowGraph, chosen: &str) -> Option<FlowNode> {
        let first_contact_or_source = || {
            graph
                .contact
                .first()
                .map(|c| Self::Contact(c.field.clone()))
                .unwrap_or(Self::Source)
        };
        match self {
            Self::Root => Some(Self::CategoryMenu(chosen.to_string())),
            Self::CategoryMenu(_) => Some(Self::Timeline),
            Self::Timeline => Some(Self::Budget),
            Self::Budget => Some(first_contact_or_source()),
            Self::Contact(field) => {
                let idx = graph.contact.iter().position(|c| &c.field == field)?;
                Some(
                    graph
                        .contact
                        .get(idx + 1)
                        .map(|c| Self::Contact(c.field.clone()))
                        .unwrap_or(Self::Source),
                )
            }
            Self::Source => Some(Self::CallToAction),
            Self::CallToAction => None,
        }
    }

    /// Data fields that must already be present when this node is entered.
    pub fn required_fields<'g>(&self, graph: &'g FlowGraph) -> Vec<&'g str> {
        let mut fields = Vec::new();
        if matches!(self, Self::Root) {
            return fields;
        }
        fields.push(graph.root.field.as_str());
        if matches!(self, Self::CategoryMenu(_)) {
            return fields;
        }
        if let Some(sub) = graph.subcategory_field() {
            fields.push(sub);
        }
        if matches!(self, Self::Timeline) {
            return fields;
        }
        fields.push(graph.timeline.field.as_str());
        if matches!(self, Self::Budget) {
            return fields;
        }
        fields.push(graph.budget.field.as_str());
        for step in &graph.contact {
            if matches!(self, Self::Contact(f) if f == &step.field) {
                return fields;
            }
            fields.push(step.field.as_str());
        }
        if matches!(self, Self::Source) {
            return fields;
        }
        fields.push(graph.source.field.as_str());
        fields
    }

    /// Whether the graph defines this node.
    fn exists_in(&self, graph: &FlowGraph) -> bool {
        match self {
            Self::CategoryMenu(category) => graph.submenus.contains_key(category),
            Self::Contact(field) => graph.contact_step(field).is_some(),
            _ => true,
        }
    }
}

impl std::fmt::Display for FlowNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::CategoryMenu(category) => write!(f, "submenu:{category}"),
            Self::Timeline => write!(f, "timeline"),
            Self::Budget => write!(f, "budget"),
            Self::Contact(field) => write!(f, "contact:{field}"),
            Self::Source => write!(f, "source"),
            Self::CallToAction => write!(f, "cta"),
        }
    }
}

/// Result of decoding a stored conversation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// No state yet (or fully cleared).
    Fresh,
    Node(FlowNode),
    /// Older tag rewritten onto the current graph; the new tag and `patch`
    /// must be persisted.
    Migrated { node: FlowNode, patch: FlowData },
    /// Unknown tag, unknown category/field or missing required data.
    Malformed,
}

/// Tags written by earlier bot revisions and the category each one implies.
const LEGACY_SUBMENUS: [(&str, &str); 3] = [
    ("step_02_site", "website"),
    ("step_02_social", "social_media"),
    ("step_02_ia", "ai"),
];

/// Legacy `tema` values and their current category ids.
const LEGACY_THEMES: [(&str, &str); 3] = [
    ("site_e_automacao", "website"),
    ("social_media", "social_media"),
    ("ia", "ai"),
];

/// Decode the stored tag against `graph`.
pub fn decode(state: &ConversationState, graph: &FlowGraph) -> Decoded {
    let tag = state.state.trim();
    if tag.is_empty() {
        return Decoded::Fresh;
    }

    let (node, patch, legacy) = match FlowNode::from_tag(tag) {
        Some(node) => (node, FlowData::new(), false),
        None => match migrate_legacy(tag, &state.data, graph) {
            Some((node, patch)) => (node, patch, true),
            None => return Decoded::Malformed,
        },
    };

    if !node.exists_in(graph) {
        return Decoded::Malformed;
    }

    let has = |field: &str| {
        patch
            .get(field)
            .or_else(|| state.data.get(field))
            .is_some_and(|v| !v.trim().is_empty())
    };
    if !node.required_fields(graph).into_iter().all(has) {
        return Decoded::Malformed;
    }
    if let FlowNode::CategoryMenu(category) = &node {
        let stored = patch
            .get(&graph.root.field)
            .or_else(|| state.data.get(&graph.root.field));
        if stored != Some(category) {
            return Decoded::Malformed;
        }
    }

    if legacy {
        Decoded::Migrated { node, patch }
    } else {
        Decoded::Node(node)
    }
}

fn migrate_legacy(tag: &str, data: &FlowData, graph: &FlowGraph) -> Option<(FlowNode, FlowData)> {
    if tag == "step_01" {
        return Some((FlowNode::Root, FlowData::new()));
    }
    let &(_, from_tag) = LEGACY_SUBMENUS.iter().find(|(legacy, _)| *legacy == tag)?;
    let category = data
        .get("tema")
        .and_then(|tema| {
            LEGACY_THEMES
                .iter()
                .find(|(theme, _)| theme == &tema.trim())
                .map(|(_, c)| *c)
        })
        .unwrap_or(from_tag);

    let mut patch = FlowData::new();
    patch.insert(graph.root.field.clone(), category.to_string());
    Some((FlowNode::CategoryMenu(category.to_string()), patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(tag: &str, pairs: &[(&str, &str)]) -> ConversationState {
        ConversationState {
            state: tag.into(),
            data: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn tags_round_trip_through_display() {
        for node in [
            FlowNode::Root,
            FlowNode::CategoryMenu("website".into()),
            FlowNode::Timeline,
            FlowNode::Budget,
            FlowNode::Contact("briefing".into()),
            FlowNode::Source,
            FlowNode::CallToAction,
        ] {
            assert_eq!(FlowNode::from_tag(&node.to_string()), Some(node));
        }
        assert_eq!(FlowNode::from_tag("submenu:"), None);
        assert_eq!(FlowNode::from_tag("step_03_coleta"), None);
    }

    #[test]
    fn successor_chain_covers_every_node() {
        let graph = FlowGraph::default();
        let mut node = FlowNode::Root;
        let mut visited = vec![node.to_string()];
        while let Some(next) = node.next(&graph, "automation") {
            visited.push(next.to_string());
            node = next;
        }
        assert_eq!(
            visited,
            vec![
                "root",
                "submenu:automation",
                "timeline",
                "budget",
                "contact:briefing",
                "contact:contact_name",
                "source",
                "cta",
            ]
        );
    }

    #[test]
    fn empty_state_is_fresh() {
        let graph = FlowGraph::default();
        assert_eq!(decode(&state("", &[]), &graph), Decoded::Fresh);
        assert_eq!(decode(&state("   ", &[("x", "y")]), &graph), Decoded::Fresh);
    }

    #[test]
    fn garbage_and_unknown_nodes_are_malformed() {
        let graph = FlowGraph::default();
        assert_eq!(decode(&state("step_99", &[]), &graph), Decoded::Malformed);
        assert_eq!(decode(&state("step_03_coleta", &[]), &graph), Decoded::Malformed);
        assert_eq!(
            decode(&state("submenu:crypto", &[("category", "crypto")]), &graph),
            Decoded::Malformed
        );
        assert_eq!(decode(&state("contact:cpf", &[]), &graph), Decoded::Malformed);
    }

    #[test]
    fn missing_required_fields_are_malformed() {
        let graph = FlowGraph::default();
        assert_eq!(decode(&state("budget", &[("category", "ai")]), &graph), Decoded::Malformed);
        assert_eq!(
            decode(&state("submenu:ai", &[("category", "website")]), &graph),
            Decoded::Malformed
        );
        assert_eq!(
            decode(
                &state(
                    "budget",
                    &[("category", "ai"), ("subcategory", "have_idea"), ("timeline", "asap")]
                ),
                &graph
            ),
            Decoded::Node(FlowNode::Budget)
        );
    }

    #[test]
    fn legacy_step_01_maps_to_root() {
        let graph = FlowGraph::default();
        let decoded = decode(&state("step_01", &[]), &graph);
        assert_eq!(
            decoded,
            Decoded::Migrated {
                node: FlowNode::Root,
                patch: FlowData::new()
            }
        );
    }

    #[test]
    fn legacy_submenus_map_theme_onto_category() {
        let graph = FlowGraph::default();
        let decoded = decode(&state("step_02_social", &[("tema", "social_media")]), &graph);
        let Decoded::Migrated { node, patch } = decoded else {
            panic!("expected migration, got {decoded:?}");
        };
        assert_eq!(node, FlowNode::CategoryMenu("social_media".into()));
        assert_eq!(patch.get("category").map(String::as_str), Some("social_media"));

        let decoded = decode(&state("step_02_ia", &[]), &graph);
        assert!(matches!(
            decoded,
            Decoded::Migrated { node: FlowNode::CategoryMenu(ref c), .. } if c == "ai"
        ));
    }

    #[test]
    fn required_fields_grow_along_the_chain() {
        let graph = FlowGraph::default();
        assert!(FlowNode::Root.required_fields(&graph).is_empty());
        assert_eq!(
            FlowNode::Contact("contact_name".into()).required_fields(&graph),
            vec!["category", "subcategory", "timeline", "budget", "briefing"]
        );
        assert_eq!(
            FlowNode::CallToAction.required_fields(&graph),
            vec![
                "category",
                "subcategory",
                "timeline",
                "budget",
                "briefing",
                "contact_name",
                "source"
            ]
        );
    }
}
