use axum::{extract::Extension, Json};
use outreach_jobs::{BridgeOutcome, ExternalTaskReport};

use crate::server::app::AppState;
use crate::server::error::ApiError;

/// Webhook the worker pool calls whenever a task changes status.
///
/// Deliveries may repeat; already resolved items are counted as duplicates.
pub async fn worker_event_handler(
    Extension(state): Extension<AppState>,
    Json(report): Json<ExternalTaskReport>,
) -> Result<Json<BridgeOutcome>, ApiError> {
    Ok(Json(state.control.bridge().handle_push(report).await?))
}
