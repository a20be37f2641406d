//! Job control endpoints for the dashboard.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use outreach_jobs::{JobId, JobSnapshot, NewJob, WorkItem};

use crate::server::app::AppState;
use crate::server::error::ApiError;

type JobResponse = Result<Json<JobSnapshot>, ApiError>;

/// `POST /jobs` - register an uploaded target list
pub async fn create_job(
    Extension(state): Extension<AppState>,
    Json(new_job): Json<NewJob>,
) -> Result<(StatusCode, Json<JobSnapshot>), ApiError> {
    let job = state.control.create(new_job).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// `GET /jobs/:id`
pub async fn get_job(Extension(state): Extension<AppState>, Path(id): Path<JobId>) -> JobResponse {
    Ok(Json(state.control.get_status(id).await?))
}

/// `GET /jobs/:id/items` - per-site outcomes
pub async fn list_work_items(
    Extension(state): Extension<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<Vec<WorkItem>>, ApiError> {
    Ok(Json(state.control.work_items(id).await?))
}

pub async fn start_job(Extension(state): Extension<AppState>, Path(id): Path<JobId>) -> JobResponse {
    Ok(Json(state.control.start(id).await?))
}

pub async fn pause_job(Extension(state): Extension<AppState>, Path(id): Path<JobId>) -> JobResponse {
    Ok(Json(state.control.pause(id).await?))
}

pub async fn resume_job(Extension(state): Extension<AppState>, Path(id): Path<JobId>) -> JobResponse {
    Ok(Json(state.control.resume(id).await?))
}

pub async fn stop_job(Extension(state): Extension<AppState>, Path(id): Path<JobId>) -> JobResponse {
    Ok(Json(state.control.stop(id).await?))
}
