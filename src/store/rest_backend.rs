//! PostgREST backend — async `Database` implementation over Supabase's REST API.
//!
//! Every table is keyed by `wa_id`. Upserts go through
//! `POST /rest/v1/<table>?on_conflict=wa_id` with
//! `Prefer: resolution=merge-duplicates`, so only the columns present in the
//! body are overwritten on conflict.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, Response};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::model::{AiStateRecord, ConversationState, FlowData, LoggedMessage, UserPatch};
use super::traits::Database;
use crate::config::SupabaseConfig;
use crate::error::DatabaseError;

const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=minimal";

/// Supabase/PostgREST database backend.
pub struct RestBackend {
    client: reqwest::Client,
    config: SupabaseConfig,
}

impl RestBackend {
    pub fn new(config: SupabaseConfig, timeout: Duration) -> Result<Self, DatabaseError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DatabaseError::Request {
                table: "-".into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let key = self.config.service_key.expose_secret();
        self.client
            .request(method, self.table_url(table))
            .header("apikey", key)
            .header("Authorization", format!("Bearer {key}"))
    }

    async fn send(&self, table: &str, builder: RequestBuilder) -> Result<Response, DatabaseError> {
        let response = builder.send().await.map_err(|e| DatabaseError::Request {
            table: table.to_string(),
            reason: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DatabaseError::Status {
                table: table.to_string(),
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }
        Ok(response)
    }

    /// Fetch the single row keyed by `user_id`, if any.
    async fn select_one<T>(
        &self,
        table: &str,
        user_id: &str,
        columns: &str,
    ) -> Result<Option<T>, DatabaseError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let builder = self.request(Method::GET, table).query(&[
            ("select", columns.to_string()),
            ("wa_id", format!("eq.{user_id}")),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<T> = self
            .send(table, builder)
            .await?
            .json()
            .await
            .map_err(|e| DatabaseError::Serialization(format!("{table}: {e}")))?;
        Ok(rows.into_iter().next())
    }

    async fn upsert(&self, table: &str, body: Value) -> Result<(), DatabaseError> {
        let builder = self
            .request(Method::POST, table)
            .query(&[("on_conflict", "wa_id")])
            .header("Prefer", UPSERT_PREFER)
            .json(&body);
        self.send(table, builder).await?;
        Ok(())
    }

    async fn insert(&self, table: &str, body: Value) -> Result<(), DatabaseError> {
        let builder = self
            .request(Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(&body);
        self.send(table, builder).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FlowRow {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl FlowRow {
    fn into_state(self) -> ConversationState {
        ConversationState {
            state: self.state.unwrap_or_default(),
            data: self.data.map(flow_data_from_json).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AiStateRow {
    #[serde(default)]
    state: Option<Value>,
}

/// Lenient decode of the `data` column: non-string scalars are stringified,
/// nulls and nested values dropped.
fn flow_data_from_json(value: Value) -> FlowData {
    let Value::Object(map) = value else {
        return FlowData::new();
    };
    map.into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            Value::Number(n) => Some((k, n.to_string())),
            Value::Bool(b) => Some((k, b.to_string())),
            _ => None,
        })
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[async_trait]
impl Database for RestBackend {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn get_flow(&self, user_id: &str) -> Result<ConversationState, DatabaseError> {
        let row: Option<FlowRow> = self
            .select_one(&self.config.flow_table, user_id, "state,data")
            .await?;
        Ok(row.map(FlowRow::into_state).unwrap_or_default())
    }

    async fn set_flow_state(&self, user_id: &str, state: &str) -> Result<(), DatabaseError> {
        debug!(user_id, state, "Flow state set");
        self.upsert(
            &self.config.flow_table,
            json!({"wa_id": user_id, "state": state, "updated_at": Utc::now()}),
        )
        .await
    }

    async fn merge_flow_data(&self, user_id: &str, fields: &FlowData) -> Result<(), DatabaseError> {
        let mut data = self.get_flow(user_id).await?.data;
        data.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.upsert(
            &self.config.flow_table,
            json!({"wa_id": user_id, "data": data, "updated_at": Utc::now()}),
        )
        .await
    }

    async fn clear_flow(&self, user_id: &str) -> Result<(), DatabaseError> {
        self.upsert(
            &self.config.flow_table,
            json!({"wa_id": user_id, "state": "", "data": {}, "updated_at": Utc::now()}),
        )
        .await
    }

    async fn get_ai_state(&self, user_id: &str) -> Result<AiStateRecord, DatabaseError> {
        let row: Option<AiStateRow> = self
            .select_one(&self.config.ai_state_table, user_id, "state")
            .await?;
        match row.and_then(|r| r.state) {
            Some(Value::Object(map)) => serde_json::from_value(Value::Object(map))
                .map_err(|e| DatabaseError::Serialization(format!("ai state: {e}"))),
            _ => Ok(AiStateRecord::default()),
        }
    }

    async fn upsert_ai_state(
        &self,
        user_id: &str,
        record: &AiStateRecord,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let mut record = record.clone();
        record.updated_at = Some(now);
        let state = serde_json::to_value(&record)
            .map_err(|e| DatabaseError::Serialization(format!("ai state: {e}")))?;
        self.upsert(
            &self.config.ai_state_table,
            json!({"wa_id": user_id, "state": state, "updated_at": now}),
        )
        .await
    }

    async fn log_message(&self, message: &LoggedMessage) -> Result<(), DatabaseError> {
        if message.text.trim().is_empty() {
            return Ok(());
        }
        let body = serde_json::to_value(message)
            .map_err(|e| DatabaseError::Serialization(format!("message: {e}")))?;
        self.insert(&self.config.messages_table, body).await
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<LoggedMessage>, DatabaseError> {
        let table = &self.config.messages_table;
        let builder = self.request(Method::GET, table).query(&[
            ("select", "wa_id,direction,text,meta,created_at".to_string()),
            ("wa_id", format!("eq.{user_id}")),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        self.send(table, builder)
            .await?
            .json()
            .await
            .map_err(|e| DatabaseError::Serialization(format!("{table}: {e}")))
    }

    async fn upsert_user(&self, user_id: &str, patch: &UserPatch) -> Result<(), DatabaseError> {
        let mut body = serde_json::to_value(patch)
            .map_err(|e| DatabaseError::Serialization(format!("user: {e}")))?;
        if let Value::Object(map) = &mut body {
            map.insert("wa_id".into(), json!(user_id));
            map.insert("updated_at".into(), json!(Utc::now()));
        }
        self.upsert(&self.config.users_table, body).await
    }
}
