// Main entry point for the outreach job control server

use std::sync::Arc;

use anyhow::{Context, Result};
use outreach_jobs::{ControlApi, ControlConfig, PostgresJobStore, Reconciler, StatusPoller};
use outreach_server::{kernel::HttpWorkerPool, server::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,outreach_server=debug,outreach_jobs=debug,sqlx=warn,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting outreach job control server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    let store = PostgresJobStore::from_pool(pool)
        .await
        .context("Failed to prepare job store schema")?;

    let worker_pool = HttpWorkerPool::new(
        config.worker_pool_url.clone(),
        config.worker_pool_token.clone(),
        config.dispatch_timeout,
    )
    .context("Failed to build worker pool client")?;

    let control = ControlApi::new(
        Arc::new(store),
        Arc::new(worker_pool),
        ControlConfig::default()
            .with_request_timeout(config.dispatch_timeout)
            .with_poll_interval(config.poll_interval),
    );

    // Pick up jobs a previous process left running
    match Reconciler::new(control.clone()).reconcile().await {
        Ok(report) => tracing::info!(?report, "Reconciliation complete"),
        Err(e) => tracing::warn!(error = %e, "Reconciliation failed; continuing"),
    }

    // Background status poller
    let shutdown = CancellationToken::new();
    let poller = StatusPoller::new(control.bridge().clone(), control.config().poller.clone());
    let poller_handle = tokio::spawn(poller.run(shutdown.clone()));

    // Build application
    let app = build_app(control);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    shutdown.cancel();
    poller_handle.await.context("Status poller panicked")?;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
    shutdown.cancel();
}
