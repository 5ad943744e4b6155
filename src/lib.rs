//! mugo-zap — WhatsApp lead-qualification bot.
//!
//! Inbound webhook events go through the [`dispatch::Dispatcher`], which
//! drives the user through the [`flow`] funnel and hands qualified leads to
//! a human operator.

pub mod api;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod flow;
pub mod llm;
pub mod store;
