//! Upload endpoints: single conversions, merges and images to PDF.

use std::collections::HashMap;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use agam::dispatch::{JobRequest, UploadedFile};
use agam::{ConversionOp, ServiceMode};

use super::send_artifact;
use crate::error::ApiError;
use crate::state::AppState;

/// Text fields and file parts of a multipart form, in arrival order.
#[derive(Debug, Default)]
struct UploadForm {
    files: Vec<UploadedFile>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    fn field(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

fn is_file_field(name: &str) -> bool {
    matches!(name, "file" | "files" | "files[]")
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if is_file_field(&name) {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await?;
            form.files.push(UploadedFile::new(filename, bytes.to_vec()));
        } else {
            let value = field.text().await?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}

/// Queues the request in durable mode, or runs it and streams the result
/// back in streaming mode.
async fn dispatch(state: AppState, request: JobRequest) -> Result<Response, ApiError> {
    let dispatcher = state.dispatcher.clone();
    match dispatcher.mode() {
        ServiceMode::Durable => {
            let job = tokio::task::spawn_blocking(move || dispatcher.submit(request)).await??;
            Ok((StatusCode::ACCEPTED, Json(job)).into_response())
        }
        ServiceMode::Streaming => {
            let artifact =
                tokio::task::spawn_blocking(move || dispatcher.run_streaming(request)).await??;
            send_artifact(artifact, true).await
        }
    }
}

pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_form(multipart).await?;
    let operation = form
        .field("operation")
        .unwrap_or_else(|| ConversionOp::ConvertToPdf.as_str().to_string());

    dispatch(
        state,
        JobRequest::Convert {
            files: form.files,
            operation,
        },
    )
    .await
}

pub async fn merge(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_form(multipart).await?;
    let output_filename = form.field("output_filename");

    dispatch(
        state,
        JobRequest::Merge {
            files: form.files,
            output_filename,
        },
    )
    .await
}

pub async fn images_to_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_form(multipart).await?;
    let output_filename = form.field("output_filename");

    dispatch(
        state,
        JobRequest::ImagesToPdf {
            files: form.files,
            output_filename,
        },
    )
    .await
}
