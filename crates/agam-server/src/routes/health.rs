use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

/// Liveness plus job store reachability. Degraded is reported as 503.
pub async fn health(State(state): State<AppState>) -> Response {
    let dispatcher = state.dispatcher.clone();
    match tokio::task::spawn_blocking(move || dispatcher.health()).await {
        Ok(health) => {
            let status = if health.is_ok() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(health)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Health check panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
