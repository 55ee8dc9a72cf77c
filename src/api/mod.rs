//! HTTP API server for the inbox service

mod auth;
pub mod files;
pub mod health;
pub mod webhooks;

use std::sync::Arc;

use axum::{Json, Router, http::StatusCode};
use secrecy::SecretString;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::db::{DbPool, ReceivedFileRepo};
use crate::pipeline::InboundPipeline;

/// Shared state for API handlers
pub struct ApiState {
    pub db: DbPool,
    /// Bearer key for the file review routes; open when unset
    pub api_key: Option<SecretString>,
    /// Webhook subscription secret
    pub verify_token: SecretString,
    pub pipeline: InboundPipeline,
    pub files: ReceivedFileRepo,
}

/// JSON error body shared by the review routes
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn error_response(status: StatusCode, code: &str, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
            },
        }),
    )
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .nest("/api/files", files::router(state.clone()))
        .merge(webhooks::router(state.clone()))
        .merge(health::router(state))
        .layer(TraceLayer::new_for_http())
}

pub struct ApiServerBuilder {
    db: DbPool,
    pipeline: InboundPipeline,
    verify_token: SecretString,
    api_key: Option<SecretString>,
    port: u16,
}

impl ApiServerBuilder {
    #[must_use]
    pub fn new(db: DbPool, pipeline: InboundPipeline, verify_token: SecretString) -> Self {
        Self {
            db,
            pipeline,
            verify_token,
            api_key: None,
            port: crate::config::DEFAULT_PORT,
        }
    }

    #[must_use]
    pub fn api_key(mut self, key: Option<SecretString>) -> Self {
        self.api_key = key;
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn build(self) -> ApiServer {
        let state = Arc::new(ApiState {
            files: ReceivedFileRepo::new(self.db.clone()),
            db: self.db,
            api_key: self.api_key,
            verify_token: self.verify_token,
            pipeline: self.pipeline,
        });

        ApiServer {
            state,
            port: self.port,
        }
    }
}

pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Run the API server until shutdown is signalled
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        if self.state.api_key.is_none() {
            tracing::warn!("CRM_INBOX_API_KEY not set - file review routes are unauthenticated");
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
