use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::{
    store::{NewSecret, StoreError},
    AppState,
};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Ready once the backend answers a count within the store timeout.
pub async fn ready(State(state): State<AppState>) -> Response {
    match state.secrets.live_count().await {
        Ok(n) => Json(json!({"status": "ok", "secrets": n})).into_response(),
        Err(e) => {
            warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "error", "message": "storage unavailable"})),
            )
                .into_response()
        }
    }
}

pub async fn info(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "app_version": env!("CARGO_PKG_VERSION"),
        "backend": state.secrets.backend_name(),
        "max_payload_bytes": state.secrets.max_payload_bytes(),
    }))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    /// Plain text content.
    pub text: Option<String>,
    /// File content, base64 (standard alphabet, padded).
    pub file: Option<String>,
    pub file_name: Option<String>,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub status: &'static str,
    pub key: String,
}

pub async fn create_content(
    State(state): State<AppState>,
    Json(body): Json<CreateRequest>,
) -> Response {
    let payload = match (body.text, body.file) {
        (Some(text), None) => text.into_bytes(),
        (None, Some(file)) => match STANDARD.decode(file.as_bytes()) {
            Ok(bytes) => bytes,
            Err(_) => return bad_request("file must be base64-encoded"),
        },
        _ => return bad_request("exactly one of text or file is required"),
    };

    let secret = NewSecret {
        payload,
        filename: body.file_name,
        ttl_seconds: body.ttl_seconds,
    };

    match state.secrets.create(secret).await {
        Ok(key) => {
            info!("secret created");
            debug!(key = %key, "issued key");
            Json(CreateResponse { status: "ok", key }).into_response()
        }
        Err(e) => store_error(e),
    }
}

// ── Consume ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    pub status: &'static str,
    pub key: String,
    /// Payload, base64.
    pub content: String,
    /// Payload as text, when it is valid UTF-8.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub file_name: Option<String>,
}

pub async fn consume_content(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.secrets.consume_secret(&key).await {
        Ok(secret) => {
            info!("secret read and burned");
            let content = STANDARD.encode(&secret.payload);
            let text = String::from_utf8(secret.payload).ok();
            Json(ConsumeResponse {
                status: "ok",
                key,
                content,
                text,
                file_name: secret.filename,
            })
            .into_response()
        }
        Err(e) => store_error(e),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"status": "error", "message": message})),
    )
        .into_response()
}

fn store_error(e: StoreError) -> Response {
    let (status, message) = match &e {
        StoreError::PayloadTooLarge { limit, .. } => {
            debug!(error = %e, "rejected oversized payload");
            (StatusCode::PAYLOAD_TOO_LARGE, format!("max size: {limit} bytes"))
        }
        StoreError::NotFound => (
            StatusCode::NOT_FOUND,
            "not found or already burned".to_owned(),
        ),
        StoreError::StorageUnavailable(_) => {
            warn!(error = %e, "storage unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "storage unavailable, try again".to_owned(),
            )
        }
        StoreError::KeyCollision { .. } => {
            error!(error = %e, "internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_owned(),
            )
        }
    };
    (
        status,
        Json(json!({"status": "error", "message": message})),
    )
        .into_response()
}
