//! Review queue for received files

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;

use super::{ApiError, ApiState, auth::require_review_key, error_response};
use crate::db::{AnalysisStatus, FileFilter, ReceivedFile};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub reviewed: Option<bool>,
    pub phone: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub reviewer: String,
    #[serde(default)]
    pub notes: Option<String>,
}

fn db_error(e: &crate::Error) -> ApiError {
    tracing::error!(error = %e, "file review query failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error", &e.to_string())
}

/// List received files, newest first
async fn list_files(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ReceivedFile>>, ApiError> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(AnalysisStatus::from_str(raw).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                "invalid_status",
                "status must be pending or analyzed",
            )
        })?),
    };

    let filter = FileFilter {
        status,
        reviewed: query.reviewed,
        phone: query.phone,
        limit: query.limit,
    };

    state.files.list(&filter).map(Json).map_err(|e| db_error(&e))
}

/// Get one file's metadata and extraction
async fn get_file(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<ReceivedFile>, ApiError> {
    state
        .files
        .get(&id)
        .map_err(|e| db_error(&e))?
        .map(Json)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "not_found", "File not found"))
}

/// Raw bytes of a file, served with its stored MIME type
async fn file_content(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || error_response(StatusCode::NOT_FOUND, "not_found", "File not found");

    let file = state
        .files
        .get(&id)
        .map_err(|e| db_error(&e))?
        .ok_or_else(not_found)?;
    let data = state
        .files
        .data(&id)
        .map_err(|e| db_error(&e))?
        .ok_or_else(not_found)?;

    Ok(([(header::CONTENT_TYPE, file.mime_type)], data))
}

/// Mark a file as reviewed by an operator
async fn review_file(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<ReceivedFile>, ApiError> {
    let reviewer = request.reviewer.trim();
    if reviewer.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "invalid_reviewer",
            "reviewer is required",
        ));
    }

    let updated = state
        .files
        .mark_reviewed(&id, reviewer, request.notes.as_deref())
        .map_err(|e| db_error(&e))?;
    if !updated {
        return Err(error_response(StatusCode::NOT_FOUND, "not_found", "File not found"));
    }

    tracing::info!(file_id = %id, reviewer, "file reviewed");

    get_file(State(state), Path(id)).await
}

/// Build the file review router with auth middleware
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_files))
        .route("/{id}", get(get_file))
        .route("/{id}/content", get(file_content))
        .route("/{id}/review", post(review_file))
        .layer(middleware::from_fn_with_state(state.clone(), require_review_key))
        .with_state(state)
}
