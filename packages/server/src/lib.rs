// Outreach job control - HTTP server
//
// Exposes the job lifecycle from `outreach-jobs` over HTTP, receives worker
// pool webhooks, and runs the background status poller.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
