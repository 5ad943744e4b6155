//! Send-and-log helper shared by the dispatcher and the handoff procedure.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::warn;

use crate::channels::{MessagingGateway, OutboundMessage};
use crate::error::ChannelError;
use crate::store::Database;
use crate::store::model::{Direction, LoggedMessage};

/// Delivers outbound messages and appends each delivered one to the log.
#[derive(Clone)]
pub struct Outbox {
    db: Arc<dyn Database>,
    gateway: Arc<dyn MessagingGateway>,
}

impl Outbox {
    pub fn new(db: Arc<dyn Database>, gateway: Arc<dyn MessagingGateway>) -> Self {
        Self { db, gateway }
    }

    /// Send one message; on success log it with direction `out`.
    ///
    /// A log failure is only warned about: the user already got the message.
    pub async fn send(
        &self,
        user_id: &str,
        message: &OutboundMessage,
        meta: Value,
    ) -> Result<(), ChannelError> {
        self.gateway.send(user_id, message).await?;
        let mut meta = meta;
        if let Value::Object(map) = &mut meta {
            map.insert("kind".into(), json!(message.kind()));
        }
        let entry = LoggedMessage::new(user_id, Direction::Out, &message.log_text(), meta);
        if let Err(e) = self.db.log_message(&entry).await {
            warn!(user_id, error = %e, "Outbound log failed");
        }
        Ok(())
    }

    pub async fn send_text(
        &self,
        user_id: &str,
        body: &str,
        meta: Value,
    ) -> Result<(), ChannelError> {
        self.send(user_id, &OutboundMessage::text(body), meta).await
    }

    /// Send an interactive message, retrying once as plain text if the
    /// channel rejects it.
    pub async fn send_with_fallback(
        &self,
        user_id: &str,
        message: &OutboundMessage,
        meta: Value,
    ) -> Result<(), ChannelError> {
        match self.send(user_id, message, meta.clone()).await {
            Ok(()) => Ok(()),
            Err(e) if message.is_interactive() => {
                warn!(
                    user_id,
                    kind = message.kind(),
                    error = %e,
                    "Interactive send failed, retrying as text"
                );
                let mut meta = meta;
                if let Value::Object(map) = &mut meta {
                    map.insert("degraded".into(), json!(true));
                }
                self.send_text(user_id, &message.plain_text(), meta).await
            }
            Err(e) => Err(e),
        }
    }
}
