//! HTTP surface: health, the WhatsApp webhook and the operator panel API.

use std::any::Any as PanicPayload;
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

use crate::channels::webhook::{parse_event, verify_signature};
use crate::dispatch::Dispatcher;
use crate::store::Database;
use crate::store::model::UserPatch;

/// Messages returned by the panel conversation endpoint.
const PANEL_MESSAGES: usize = 50;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub db: Arc<dyn Database>,
    pub verify_token: String,
    /// Meta app secret; signatures are not checked when unset.
    pub app_secret: Option<SecretString>,
    pub debug_webhook: bool,
    /// Panel routes answer 404 when unset.
    pub panel_api_key: Option<SecretString>,
}

/// Build the router with webhook, health and panel routes.
pub fn routes(state: AppState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    // Meta retries anything but a 2xx, so even a panic is acknowledged.
    let webhook = Router::new()
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .layer(CatchPanicLayer::custom(acknowledge_panic));

    Router::new()
        .route("/health", get(health))
        .merge(webhook)
        .route("/api/conversations/{wa_id}", get(get_conversation))
        .route("/api/conversations/{wa_id}/reset", post(reset_conversation))
        .route("/api/conversations/{wa_id}/handoff/clear", post(clear_handoff))
        .layer(cors)
        .with_state(state)
}

fn acknowledge_panic(panic: Box<dyn PanicPayload + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(detail, "Webhook handler panicked");
    Json(json!({"ok": true})).into_response()
}

fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

// ── Webhook ─────────────────────────────────────────────────────────────

async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    if mode == Some("subscribe") && token == Some(state.verify_token.as_str()) {
        let challenge = params.get("hub.challenge").cloned().unwrap_or_default();
        info!("Webhook verified");
        return (StatusCode::OK, challenge).into_response();
    }
    warn!(mode = ?mode, "Webhook verification rejected");
    StatusCode::FORBIDDEN.into_response()
}

async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.app_secret {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_signature(secret.expose_secret(), signature, &body) {
            warn!("Webhook signature mismatch");
            return error_json(StatusCode::UNAUTHORIZED, "invalid webhook signature");
        }
    }

    if state.debug_webhook {
        info!(body = %String::from_utf8_lossy(&body), "Webhook received");
    }

    match parse_event(&body) {
        Ok(Some(event)) => {
            let user_id = event.user_id.clone();
            let outcome = state.dispatcher.dispatch(event).await;
            info!(user_id = %user_id, outcome = ?outcome, "Webhook handled");
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Webhook body ignored"),
    }
    Json(json!({"ok": true})).into_response()
}

// ── Panel ───────────────────────────────────────────────────────────────

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = &state.panel_api_key else {
        return Err(error_json(StatusCode::NOT_FOUND, "panel disabled"));
    };
    let given = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if given != Some(expected.expose_secret()) {
        return Err(error_json(StatusCode::UNAUTHORIZED, "invalid api key"));
    }
    Ok(())
}

async fn get_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(wa_id): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }

    let flow = state.db.get_flow(&wa_id).await;
    let ai_state = state.db.get_ai_state(&wa_id).await;
    let messages = state.db.recent_messages(&wa_id, PANEL_MESSAGES).await;
    match (flow, ai_state, messages) {
        (Ok(flow), Ok(ai_state), Ok(messages)) => Json(json!({
            "wa_id": wa_id,
            "flow": flow,
            "ai_state": ai_state,
            "messages": messages,
        }))
        .into_response(),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            warn!(wa_id = %wa_id, error = %e, "Panel read failed");
            error_json(StatusCode::BAD_GATEWAY, "store unavailable")
        }
    }
}

async fn reset_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(wa_id): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }

    let result = async {
        state.db.clear_flow(&wa_id).await?;
        let record = state.db.get_ai_state(&wa_id).await?;
        state
            .db
            .upsert_ai_state(&wa_id, &record.reset_keeping_dedupe())
            .await?;
        state.db.upsert_user(&wa_id, &UserPatch::clear_handoff()).await
    }
    .await;

    match result {
        Ok(()) => {
            info!(wa_id = %wa_id, "Conversation reset from panel");
            Json(json!({"ok": true})).into_response()
        }
        Err(e) => {
            warn!(wa_id = %wa_id, error = %e, "Panel reset failed");
            error_json(StatusCode::BAD_GATEWAY, "store unavailable")
        }
    }
}

async fn clear_handoff(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(wa_id): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }

    let result = async {
        let mut record = state.db.get_ai_state(&wa_id).await?;
        record.handoff_done = false;
        record.handoff_done_at = None;
        state.db.upsert_ai_state(&wa_id, &record).await?;
        state.db.upsert_user(&wa_id, &UserPatch::clear_handoff()).await
    }
    .await;

    match result {
        Ok(()) => {
            info!(wa_id = %wa_id, "Handoff cleared from panel");
            Json(json!({"ok": true})).into_response()
        }
        Err(e) => {
            warn!(wa_id = %wa_id, error = %e, "Panel handoff clear failed");
            error_json(StatusCode::BAD_GATEWAY, "store unavailable")
        }
    }
}
