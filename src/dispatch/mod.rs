//! Inbound event orchestration: dedupe, commands, funnel, replies, handoff.

pub mod commands;
mod dispatcher;
pub mod handoff;
mod locks;
mod outbox;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use handoff::{HandoffProcedure, HandoffReport, HandoffRequest};
pub use locks::UserLocks;
pub use outbox::Outbox;
