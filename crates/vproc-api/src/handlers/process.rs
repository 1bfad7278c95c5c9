//! Video processing submission handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use vproc_models::{JobDescriptor, JobOrigin};
use vproc_queue::TaskRecord;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of `POST /process_video`.
#[derive(Debug, Default, Deserialize)]
pub struct ProcessVideoRequest {
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub public_id: Option<String>,
    #[serde(default)]
    pub preferred_resolution: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProcessVideoResponse {
    pub status: &'static str,
    pub task_id: String,
    pub video_url: String,
}

pub const PROCESSING_STARTED: &str = "Video processing started";

/// Validate and enqueue a video for processing.
///
/// Returns as soon as the job is queued; the outcome is recorded later by the
/// worker and can be polled with [`get_task`].
pub async fn process_video(
    State(state): State<AppState>,
    payload: Result<Json<ProcessVideoRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ProcessVideoResponse>)> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected submission body: {}", rejection.body_text());
        ApiError::invalid_request(rejection.body_text())
    })?;

    let descriptor = JobDescriptor::new(
        request.video_url.unwrap_or_default(),
        request.public_id.as_deref(),
        request.preferred_resolution.as_deref(),
    )?;
    let video_url = descriptor.source_reference.clone();

    let record = state.submitter.submit(descriptor, JobOrigin::Http).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ProcessVideoResponse {
            status: PROCESSING_STARTED,
            task_id: record.task_id.to_string(),
            video_url,
        }),
    ))
}

/// Queue-side status of a submitted job.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskRecord>> {
    state
        .submitter
        .task(&task_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("task {} not found", task_id)))
}
