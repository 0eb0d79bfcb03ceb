//! Job query, download and delete endpoints. Durable mode only.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use agam::jobs::{JobId, JobPage, JobRecord, JobStatus, ListQuery};

use super::send_artifact;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl ListParams {
    fn into_query(self) -> Result<ListQuery, ApiError> {
        let status = match self.status.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(
                JobStatus::parse(raw)
                    .ok_or_else(|| ApiError::BadRequest(format!("Unknown status '{}'", raw)))?,
            ),
        };
        Ok(ListQuery {
            status,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<JobPage>, ApiError> {
    let query = params.into_query()?;
    let dispatcher = state.dispatcher.clone();
    let page = tokio::task::spawn_blocking(move || dispatcher.list(&query)).await??;
    Ok(Json(page))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let dispatcher = state.dispatcher.clone();
    let job = tokio::task::spawn_blocking(move || dispatcher.get(&JobId::from(id))).await??;
    Ok(Json(job))
}

pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let dispatcher = state.dispatcher.clone();
    let artifact =
        tokio::task::spawn_blocking(move || dispatcher.download(&JobId::from(id))).await??;
    // Stored results stay in the blob store until the job is deleted.
    send_artifact(artifact, false).await
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let dispatcher = state.dispatcher.clone();
    tokio::task::spawn_blocking(move || dispatcher.delete(&JobId::from(id))).await??;
    Ok(StatusCode::NO_CONTENT)
}
