use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use j2m_core::WebhookEvent;

use crate::ingest::IngestOutcome;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// Larger bodies are not read, with or without a secret.
pub const MAX_WEBHOOK_BODY_SIZE: usize = 5 * 1024 * 1024;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

type HmacSha256 = Hmac<Sha256>;

pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time comparison.
    mac.verify_slice(&signature_bytes).is_ok()
}

/// Rejects badly signed requests when a secret is configured.
async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(secret) = state.webhook_secret.as_deref() else {
        return Ok(next.run(request).await);
    };

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_WEBHOOK_BODY_SIZE)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            warn!("Webhook without {} header rejected", SIGNATURE_HEADER);
            StatusCode::UNAUTHORIZED
        })?;

    if !verify_signature(secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let request = Request::from_parts(parts, axum::body::Body::from(bytes));
    Ok(next.run(request).await)
}

/// Acknowledge every hook, then process it in the background.
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Json<WebhookResponse> {
    let ok = Json(WebhookResponse {
        message: "OK".to_string(),
    });

    let bytes = match axum::body::to_bytes(request.into_body(), MAX_WEBHOOK_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Webhook body too large or read error: {}", e);
            return ok;
        }
    };

    let event: WebhookEvent = match serde_json::from_slice(&bytes) {
        Ok(event) => event,
        Err(e) => {
            error!("Could not parse webhook body: {}", e);
            return ok;
        }
    };

    info!("Received {} hook", event.event_name());
    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        match pipeline.ingest(&event).await {
            Ok(IngestOutcome::Ignored(_)) => {}
            Ok(IngestOutcome::Queued {
                rooms,
                actions,
                duplicates,
            }) => debug!(
                "{} hook: {} room(s), {} action(s), {} duplicate(s)",
                event.event_name(),
                rooms,
                actions,
                duplicates
            ),
            Err(e) => error!("Failed to process {} hook: {}", event.event_name(), e),
        }
    });

    ok
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(webhook_handler))
        .route("/webhook", post(webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"webhookEvent":"jira:issue_created"}"#;
        let signature = sign("s3cret", payload);
        assert!(verify_signature("s3cret", payload, &signature));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"{}";
        let signature = sign("other", payload);
        assert!(!verify_signature("s3cret", payload, &signature));
    }

    #[test]
    fn test_malformed_signatures_rejected() {
        assert!(!verify_signature("s3cret", b"{}", "sha1=abcd"));
        assert!(!verify_signature("s3cret", b"{}", "sha256=not-hex"));
        assert!(!verify_signature("s3cret", b"{}", ""));
    }
}
