pub mod health;
pub mod jobs;
pub mod upload;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use agam::Artifact;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let body_limit = state.body_limit();

    Router::new()
        .route("/upload", post(upload::upload))
        .route("/merge", post(upload::merge))
        .route("/images-to-pdf", post(upload::images_to_pdf))
        .route("/jobs", get(jobs::list))
        .route("/jobs/{id}", get(jobs::get).delete(jobs::delete))
        .route("/jobs/{id}/download", get(jobs::download))
        .route("/health", get(health::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Quotes-safe value for a `Content-Disposition` filename.
fn disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

/// Sends an artifact as the response body. Temporary artifacts are removed
/// once read.
pub(crate) async fn send_artifact(artifact: Artifact, temporary: bool) -> Result<Response, ApiError> {
    let read = tokio::fs::read(&artifact.path).await;
    if temporary {
        if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
            tracing::warn!(error = %e, "Failed to remove streamed artifact");
        }
    }
    let bytes = read.map_err(|e| ApiError::Internal(format!("Failed to read result: {}", e)))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, artifact.content_type),
            (header::CONTENT_DISPOSITION, disposition(&artifact.filename)),
        ],
        Body::from(bytes),
    )
        .into_response())
}
