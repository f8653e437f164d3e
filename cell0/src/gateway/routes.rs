//! HTTP route handlers (spec §6 endpoint table): health, status, the typed
//! RPC surface (`send`, `getSecret`, `search`), and generic channel ingress
//! for transports with no push-based adapter of their own.

use super::{auth::AuthContext, GatewayState};
use crate::error::CellError;
use crate::types::Channel;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthBody {
    ok: bool,
}

pub async fn healthz() -> impl IntoResponse {
    Json(HealthBody { ok: true })
}

#[derive(Serialize)]
pub struct StatusBody {
    version: &'static str,
    bound_port: u16,
    started_at: chrono::DateTime<chrono::Utc>,
    adapter_count: usize,
    subscriber_count: usize,
}

pub async fn status(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(StatusBody {
        version: env!("CARGO_PKG_VERSION"),
        bound_port: state.bound_port(),
        started_at: state.started_at,
        adapter_count: state.adapters.len(),
        subscriber_count: state.bus.subscriber_count(),
    })
}

#[derive(Deserialize)]
pub struct SendRequest {
    channel: Channel,
    conversation_key: String,
    content: String,
}

pub async fn rpc_send(
    State(state): State<Arc<GatewayState>>,
    Extension(_ctx): Extension<AuthContext>,
    Json(req): Json<SendRequest>,
) -> axum::response::Response {
    let Some(adapter) = state.adapters.get(&req.channel) else {
        return (StatusCode::NOT_FOUND, "channel not configured").into_response();
    };
    match adapter.send(&req.conversation_key, &req.content).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub struct SecretRequest {
    name: String,
}

/// `getSecret` is admin-only: any caller that made it past the auth layer
/// without a `LocalAdmin`/`Bearer` context wouldn't have reached here, but a
/// future anonymous public path must not be added without re-checking this.
pub async fn rpc_get_secret(
    State(state): State<Arc<GatewayState>>,
    Extension(_ctx): Extension<AuthContext>,
    Json(req): Json<SecretRequest>,
) -> axum::response::Response {
    match state
        .capabilities
        .call("secrets", "get", serde_json::json!({"name": req.name}))
        .await
    {
        Ok(value) => Json(value).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub struct SearchRequest {
    query: String,
}

pub async fn rpc_search(
    State(state): State<Arc<GatewayState>>,
    Extension(_ctx): Extension<AuthContext>,
    Json(req): Json<SearchRequest>,
) -> axum::response::Response {
    match state
        .capabilities
        .call("search", "query", serde_json::json!({"query": req.query}))
        .await
    {
        Ok(value) => Json(value).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub struct PostMessageRequest {
    conversation_key: String,
    sender: String,
    text: String,
}

/// Ingress for the portal/webchat path, which has no dedicated push
/// transport: normalizes straight to `InboundMessage` and hands it to the
/// same `handle_inbound` every channel adapter feeds.
pub async fn post_message(
    State(state): State<Arc<GatewayState>>,
    Extension(_ctx): Extension<AuthContext>,
    Json(req): Json<PostMessageRequest>,
) -> axum::response::Response {
    let msg = super::synthesize_inbound(
        Channel::Webchat,
        req.sender,
        req.conversation_key,
        req.text,
    );
    match super::handle_inbound(state, msg).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub struct WebhookBody {
    message_id: String,
    sender: String,
    conversation_key: String,
    text: String,
}

/// Generic webhook ingress for the webhook-style adapters (google_chat,
/// teams, bluebubbles). Each adapter performs its own per-message dedup
/// internally when asked to send on the same conversation; this route does
/// the minimum normalization before handing off to COL. Known
/// simplification: adapter-specific `receive_webhook` dedup hooks are not
/// invoked here, since `Arc<dyn ChannelAdapter>` trait objects can't be
/// downcast to the concrete adapter type without additional machinery --
/// see DESIGN.md.
pub async fn webhook(
    State(state): State<Arc<GatewayState>>,
    Path(channel): Path<String>,
    Json(body): Json<WebhookBody>,
) -> axum::response::Response {
    let Ok(channel) = serde_json::from_value::<Channel>(serde_json::Value::String(channel)) else {
        return (StatusCode::NOT_FOUND, "unknown channel").into_response();
    };
    if !state.adapters.contains_key(&channel) {
        return (StatusCode::NOT_FOUND, "channel not configured").into_response();
    }
    let msg = super::synthesize_inbound(channel, body.sender, body.conversation_key, body.text);
    let msg = crate::types::InboundMessage {
        channel_message_id: body.message_id,
        ..msg
    };
    match super::handle_inbound(state, msg).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(CellError::Unauthorized) => (StatusCode::FORBIDDEN, "unknown sender").into_response(),
        Err(e) => e.into_response(),
    }
}
