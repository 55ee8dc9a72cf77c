//! `WhatsApp` Cloud API webhook handler

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::api::ApiState;
use crate::channels::WhatsAppWebhook;

/// Subscription challenge parameters
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Webhook response
#[derive(Serialize)]
pub struct WebhookResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answer the provider's subscription challenge
///
/// Echoes `hub.challenge` iff the mode is `subscribe` and the token matches
/// the configured verify token.
pub async fn verify(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let expected = state.verify_token.expose_secret();
    let token_ok = !expected.is_empty() && query.verify_token.as_deref() == Some(expected);

    if query.mode.as_deref() == Some("subscribe") && token_ok {
        tracing::info!("WhatsApp webhook subscription verified");
        return (StatusCode::OK, query.challenge.unwrap_or_default()).into_response();
    }

    tracing::warn!(mode = ?query.mode, "WhatsApp webhook verification rejected");
    StatusCode::FORBIDDEN.into_response()
}

/// Receive a delivery of messages and status callbacks
///
/// Always 200 once the envelope parses; per-event failures stay inside the
/// pipeline so the provider does not retry the whole delivery.
pub async fn receive(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    let webhook: WhatsAppWebhook = match serde_json::from_slice(&body) {
        Ok(webhook) => webhook,
        Err(e) => {
            tracing::error!(error = %e, bytes = body.len(), "unparseable WhatsApp webhook envelope");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse {
                    ok: false,
                    error: Some("invalid payload".to_string()),
                }),
            );
        }
    };

    let report = state.pipeline.handle_webhook(&webhook).await;
    tracing::info!(
        recorded = report.events_recorded,
        duplicates = report.duplicates,
        replies = report.replies_sent,
        reply_failures = report.reply_failures,
        statuses_applied = report.statuses_applied,
        statuses_dropped = report.statuses_dropped,
        errors = report.errors,
        "WhatsApp webhook processed"
    );

    (
        StatusCode::OK,
        Json(WebhookResponse {
            ok: true,
            error: None,
        }),
    )
}
