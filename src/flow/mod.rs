//! Lead-qualification funnel — graph, nodes, pure transitions and the engine.

pub mod engine;
pub mod graph;
pub mod node;
pub mod normalize;
pub mod prompt;
pub mod transition;

pub use engine::FlowEngine;
pub use graph::{FlowGraph, MenuOption, MenuStep, TextStep};
pub use node::FlowNode;
pub use normalize::normalize;
pub use prompt::{
    FlowDirective, HandoffDirective, MAX_BUTTONS, MenuStyle, Prompt, PromptKind, PromptOption,
};
