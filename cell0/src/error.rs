//! Typed error taxonomy for Cell 0 OS.
//!
//! Mirrors spec §7: one variant per error kind. Every variant carries a
//! stable `code` and a single-line `reason`; internal detail (if any) stays
//! out of `Display` and is logged separately via `tracing`/`log`, never
//! surfaced across the gateway boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CellError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("policy denied: {rule} - {reason}")]
    PolicyDenied { rule: String, reason: String },

    #[error("sandbox violation: {0}")]
    SandboxViolation(String),

    #[error("busy, retry later")]
    BusyReject,

    #[error("channel startup failed: {0}")]
    ChannelStartup(String),

    #[error("channel send failed: {0}")]
    ChannelSendFailed(String),

    #[error("capability provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("checkpoint corrupt: {0}")]
    CheckpointCorrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl CellError {
    pub fn internal(e: impl Into<anyhow::Error>) -> Self {
        Self::Internal(e.into())
    }

    /// Stable machine-readable code, never the `Display` text.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Unauthorized => "unauthorized",
            Self::PolicyDenied { .. } => "policy_denied",
            Self::SandboxViolation(_) => "sandbox_violation",
            Self::BusyReject => "busy_reject",
            Self::ChannelStartup(_) => "channel_startup",
            Self::ChannelSendFailed(_) => "channel_send_failed",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::CheckpointCorrupt(_) => "checkpoint_corrupt",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::PolicyDenied { .. } => StatusCode::FORBIDDEN,
            Self::SandboxViolation(_) => StatusCode::FORBIDDEN,
            Self::BusyReject => StatusCode::SERVICE_UNAVAILABLE,
            Self::ChannelStartup(_) | Self::ChannelSendFailed(_) => StatusCode::BAD_GATEWAY,
            Self::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::CheckpointCorrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Single-line reason shown to callers. Never includes source chains.
    pub fn reason(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Reconstructs the closest-matching variant from a persisted
    /// `(code, reason)` pair (spec §4.4 "re-submitting an already-acked
    /// `operationId` returns the prior result"). `CellError` isn't `Clone`
    /// or `Serialize` (it wraps `anyhow::Error`), so a durably-recorded
    /// failure is rebuilt from its code rather than round-tripped directly;
    /// variants with structured fields (`PolicyDenied`) fold their detail
    /// back into the single `reason` string since the split isn't
    /// recoverable from the persisted form.
    pub fn from_persisted(code: &str, reason: String) -> Self {
        match code {
            "validation" => Self::Validation(reason),
            "unauthorized" => Self::Unauthorized,
            "policy_denied" => Self::PolicyDenied {
                rule: "replayed".to_string(),
                reason,
            },
            "sandbox_violation" => Self::SandboxViolation(reason),
            "busy_reject" => Self::BusyReject,
            "channel_startup" => Self::ChannelStartup(reason),
            "channel_send_failed" => Self::ChannelSendFailed(reason),
            "provider_unavailable" => Self::ProviderUnavailable(reason),
            "checkpoint_corrupt" => Self::CheckpointCorrupt(reason),
            "not_found" => Self::NotFound(reason),
            _ => Self::Internal(anyhow::anyhow!(reason)),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for CellError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_)) {
            tracing::error!(error = %format_internal(&self), "internal error");
        }
        let body = ErrorBody {
            error: self.reason(),
            code: self.code(),
            timestamp: chrono::Utc::now(),
            details: None,
        };
        (self.status(), Json(body)).into_response()
    }
}

fn format_internal(e: &CellError) -> String {
    match e {
        CellError::Internal(inner) => format!("{inner:#}"),
        other => other.to_string(),
    }
}

pub type CellResult<T> = Result<T, CellError>;
