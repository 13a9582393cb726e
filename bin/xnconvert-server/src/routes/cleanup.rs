//! Manual sweep of the working directories.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tracing::error;
use utoipa::OpenApi;

use crate::schemas::convert::{CleanupResponse, ErrorBody};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(cleanup), components(schemas(CleanupResponse, ErrorBody)))]
pub struct CleanupApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/cleanup", post(cleanup))
}

/// Delete leftover files from `uploads/` and `outputs/`.
///
/// Files that belong to a request still in progress are left alone.
#[utoipa::path(
    post,
    path = "/cleanup",
    tag = "convert",
    responses(
        (status = 200, description = "Sweep finished", body = CleanupResponse),
        (status = 500, description = "Sweep failed", body = ErrorBody),
    )
)]
pub async fn cleanup(State(state): State<Arc<AppState>>) -> Response {
    match state.storage.sweep().await {
        Ok(removed) => Json(CleanupResponse {
            status: "cleanup successful".into(),
            removed,
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "cleanup sweep failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Cleanup error: {e}") })),
            )
                .into_response()
        }
    }
}
