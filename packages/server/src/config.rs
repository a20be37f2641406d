use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub worker_pool_url: String,
    pub worker_pool_token: Option<String>,
    pub poll_interval: Duration,
    pub dispatch_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            worker_pool_url: env::var("WORKER_POOL_URL")
                .context("WORKER_POOL_URL must be set")?,
            worker_pool_token: env::var("WORKER_POOL_TOKEN").ok(),
            poll_interval: seconds("POLL_INTERVAL_SECS", 15)?,
            dispatch_timeout: seconds("DISPATCH_TIMEOUT_SECS", 10)?,
        })
    }
}

fn seconds(key: &str, default: u64) -> Result<Duration> {
    let secs = match env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{key} must be a whole number of seconds"))?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(secs))
}
