//! Inbound webhook receiver.
//!
//! `POST /webhook/{kind}` accepts form and work-order payloads pushed by
//! the website. When a shared secret is configured, the raw body must carry
//! a valid `X-Webhook-Signature` (hex HMAC-SHA256); verification is
//! constant-time and happens before any parsing.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::WebhookConfig;
use crate::errors::SyncError;
use crate::remote::shapes::normalize_form;
use crate::store::Store;
use crate::types::FormKind;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub struct WebhookState {
    store: Store,
    secret: Option<String>,
}

pub fn router(store: Store, config: &WebhookConfig) -> Router {
    let state = Arc::new(WebhookState {
        store,
        secret: config.secret.clone(),
    });
    Router::new()
        .route("/health", get(health))
        .route("/webhook/{kind}", post(receive))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .with_state(state)
}

pub async fn serve(
    store: Store,
    config: &WebhookConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(store, config);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Webhook receiver listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

async fn receive(
    State(state): State<Arc<WebhookState>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(secret) = &state.secret {
        verify_signature(secret, &headers, &body)?;
    }

    let (prefix, default_kind) = match kind.as_str() {
        "form" | "contact" => ("form:", FormKind::Contact),
        "quote" => ("form:", FormKind::Quote),
        "order" | "work-order" => ("order:", FormKind::WorkOrder),
        other => {
            return Err(ApiError(
                StatusCode::NOT_FOUND,
                format!("unknown webhook kind: {other}"),
            ))
        }
    };

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError(StatusCode::BAD_REQUEST, format!("invalid JSON: {e}")))?;
    let (_, form) = normalize_form(&payload, prefix, default_kind).map_err(|err| match err {
        SyncError::Malformed(msg) => ApiError(StatusCode::BAD_REQUEST, msg),
        other => ApiError(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    })?;

    let (id, inserted) = state.store.insert_form_submission(&form).await.map_err(|err| {
        warn!(error = %err, "Webhook ingestion failed");
        ApiError(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storing submission failed".to_string(),
        )
    })?;

    info!(kind = %kind, id, inserted, "Webhook submission ingested");
    Ok(Json(json!({ "status": "ok", "id": id, "inserted": inserted })))
}

fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError(StatusCode::FORBIDDEN, "missing signature".to_string()))?;
    let provided = hex::decode(provided.trim())
        .map_err(|_| ApiError(StatusCode::FORBIDDEN, "malformed signature".to_string()))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| ApiError(StatusCode::INTERNAL_SERVER_ERROR, "bad secret".to_string()))?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| ApiError(StatusCode::FORBIDDEN, "signature mismatch".to_string()))
}
