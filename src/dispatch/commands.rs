//! Fixed command words recognised before the funnel runs.

use crate::flow::normalize;
use crate::flow::transition::is_global_token;

/// Button id of the post-handoff "new conversation" shortcut.
pub const POST_HANDOFF_RESTART: &str = "POST_HANDOFF_RESTART";
/// Button id of the post-handoff "talk to a human" shortcut.
pub const POST_HANDOFF_HUMAN: &str = "POST_HANDOFF_HUMAN";

const RESTART_COMMANDS: &[&str] = &["reiniciar", "novo atendimento", "restart brief"];

const HUMAN_COMMANDS: &[&str] = &["humano", "atendente", "falar com humano", "talk to human"];

/// Command recognised while a handoff is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostHandoffCommand {
    Restart,
    Human,
}

fn matches(list: &[&str], text: &str) -> bool {
    let folded = normalize(text);
    !folded.is_empty() && list.contains(&folded.as_str())
}

/// Exact (folded) match against the funnel's restart words.
pub fn is_reset_trigger(text: &str) -> bool {
    is_global_token(text)
}

/// Parse a post-handoff command from a tapped id or typed text.
pub fn post_handoff_command(text: &str, choice_id: &str) -> Option<PostHandoffCommand> {
    match choice_id.trim() {
        POST_HANDOFF_RESTART => return Some(PostHandoffCommand::Restart),
        POST_HANDOFF_HUMAN => return Some(PostHandoffCommand::Human),
        _ => {}
    }
    if matches(RESTART_COMMANDS, text) {
        Some(PostHandoffCommand::Restart)
    } else if matches(HUMAN_COMMANDS, text) {
        Some(PostHandoffCommand::Human)
    } else {
        None
    }
}
