//! Application setup and server configuration.

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use outreach_jobs::ControlApi;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::routes::{
    create_job, get_job, health_handler, list_work_items, pause_job, resume_job, start_job,
    stop_job, worker_event_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub control: ControlApi,
}

/// Build the Axum application router
pub fn build_app(control: ControlApi) -> Router {
    let app_state = AppState { control };

    // CORS configuration - dashboard runs as a separate service
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        // Job control
        .route("/jobs", post(create_job))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/items", get(list_work_items))
        .route("/jobs/:id/start", post(start_job))
        .route("/jobs/:id/pause", post(pause_job))
        .route("/jobs/:id/resume", post(resume_job))
        .route("/jobs/:id/stop", post(stop_job))
        // Worker pool webhook
        .route("/worker/events", post(worker_event_handler))
        // Health check
        .route("/health", get(health_handler))
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
