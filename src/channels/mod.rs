//! Channel abstraction — inbound webhook parsing and outbound gateways.

pub mod gateway;
pub mod webhook;
pub mod whatsapp;

pub use gateway::{Choice, ListSection, MessagingGateway, OutboundMessage};
pub use webhook::{EventKind, InboundEvent};
pub use whatsapp::WhatsAppGateway;
