//! appflow server entry point
//!
//! Serves workflow execution at /workflow/*, stored workflow management at
//! /api/workflows/* and a health check at /healthz.

use appflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();
    start_server(config).await
}
