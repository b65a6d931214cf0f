//! Webhook HTTP server for the WhatsApp Cloud API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/webhook` | Subscription handshake: echoes `hub.challenge` or 403 |
//! | `POST` | `/webhook` | Notification delivery: always `200 EVENT_RECEIVED` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `POST /webhook` never waits for the assistant. The body is parsed,
//! handed to the [`DeliveryQueue`] and acknowledged at once, because Meta
//! re-delivers notifications that are not acknowledged quickly.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::app::{AppContext, Assistant, Responder};
use crate::config::{LlmCredentials, WhatsAppCredentials};
use crate::whatsapp::{parse_payload, verify_signature, verify_subscription, GraphApiClient};
use crate::worker::DeliveryQueue;

/// Body of every `POST /webhook` response.
pub const ACK: &str = "EVENT_RECEIVED";
/// Body of a rejected subscription handshake.
pub const VERIFICATION_FAILED: &str = "Verification failed";
/// Deliveries larger than this are acknowledged and dropped unread.
pub const MAX_DELIVERY_BYTES: usize = 2 * 1024 * 1024;

/// Shared state passed to the webhook handlers.
#[derive(Clone)]
pub struct WebhookState {
    pub verify_token: Arc<str>,
    /// When set, deliveries must carry a valid `X-Hub-Signature-256`.
    pub app_secret: Option<Arc<str>>,
    pub queue: DeliveryQueue,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", get(handle_verify).post(handle_delivery))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the webhook server until Ctrl-C, then drain queued deliveries.
pub async fn run_server(
    ctx: Arc<AppContext>,
    llm: &LlmCredentials,
    whatsapp: &WhatsAppCredentials,
) -> Result<()> {
    let responder: Arc<dyn Responder> = Arc::new(Assistant::from_credentials(&ctx, llm)?);
    let sender = Arc::new(GraphApiClient::new(
        &ctx.config.whatsapp,
        whatsapp.access_token.clone(),
    )?);

    let server = &ctx.config.server;
    let (queue, workers) =
        DeliveryQueue::start(server.workers, server.queue_capacity, responder, sender);

    let app = router(WebhookState {
        verify_token: Arc::from(whatsapp.verify_token.as_str()),
        app_secret: whatsapp.app_secret.as_deref().map(Arc::from),
        queue,
    });

    let listener = tokio::net::TcpListener::bind(&server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", server.bind))?;
    println!("Webhook server listening on http://{}", server.bind);
    tracing::info!(
        "{} workers, queue capacity {}",
        server.workers,
        server.queue_capacity
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down, draining queued deliveries");
    join_workers(workers).await;
    Ok(())
}

/// Wait for every worker; returns how many panicked or were cancelled.
async fn join_workers(workers: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!("delivery worker failed: {e}");
            failed += 1;
        }
    }
    failed
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

// ============ GET /webhook ============

async fn handle_verify(
    State(state): State<WebhookState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    match verify_subscription(
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
        &state.verify_token,
    ) {
        Some(challenge) => {
            tracing::info!("webhook subscription verified");
            (StatusCode::OK, challenge)
        }
        None => {
            tracing::warn!("webhook verification rejected");
            (StatusCode::FORBIDDEN, VERIFICATION_FAILED.to_string())
        }
    }
}

// ============ POST /webhook ============

async fn handle_delivery(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Body,
) -> (StatusCode, &'static str) {
    let body = match axum::body::to_bytes(body, MAX_DELIVERY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("dropping webhook delivery: {e}");
            return (StatusCode::OK, ACK);
        }
    };

    if let Some(secret) = &state.app_secret {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_signature(secret, &body, signature) {
            tracing::warn!("dropping webhook delivery with invalid signature");
            return (StatusCode::OK, ACK);
        }
    }

    if let Some(payload) = parse_payload(&body) {
        state.queue.submit(payload);
    }
    (StatusCode::OK, ACK)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicked_worker_is_counted() {
        let workers = vec![
            tokio::spawn(async {}),
            tokio::spawn(async { panic!("worker blew up") }),
        ];
        assert_eq!(join_workers(workers).await, 1);
    }
}
