//! Server setup and initialization
//!
//! Wires together the Postgres pool, data layer, block services, execution
//! engine, job queue, workflow registry and HTTP routes.

use crate::{
    api::{build_router, AppState},
    blocks::{BlockServices, BlockSettings},
    config::Config,
    datatable::{PgOwnershipLookup, PgTableStore, SlidingWindowLimiter, TableService},
    runtime::{ExecutionEngine, ExecutionLimits, QueueTransport, WorkQueue},
    services::{BroadcastPublisher, LocalMediaStore, LogMailer, OpenAiSummarizer, Publisher},
    workflow::{PgWorkflowStore, WorkflowRegistry},
};
use anyhow::{Context, Result};
use axum::Router;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Build the block collaborators from configuration
pub fn build_services(config: &Config, pool: PgPool, publisher: Arc<dyn Publisher>) -> Result<BlockServices> {
    let execution = &config.execution;

    let tables = TableService::new(
        Arc::new(PgTableStore::new(pool.clone())),
        Arc::new(SlidingWindowLimiter::new(config.security.rate_limits.clone())),
        Arc::new(PgOwnershipLookup::new(pool)),
        publisher,
        execution.schema_cache_ttl(),
    );

    let http = reqwest::Client::builder()
        .timeout(execution.http_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let summarizer = OpenAiSummarizer::new(execution.ai_base_url.clone(), execution.http_timeout())
        .map_err(|e| anyhow::anyhow!("Failed to build AI client: {}", e))?;

    Ok(BlockServices {
        tables: Arc::new(tables),
        media: Arc::new(LocalMediaStore::new(&config.files.media_root)),
        mailer: Arc::new(LogMailer::new(None)),
        summarizer: Arc::new(summarizer),
        http,
        settings: BlockSettings {
            jwt_secret: config.security.jwt_secret.clone(),
            max_file_size: config.files.max_file_size,
            http_timeout: execution.http_timeout(),
            ..BlockSettings::default()
        },
    })
}

/// Create the Axum application
///
/// `transport` is an optional external queue; without it jobs run on the
/// in-process worker.
pub async fn create_app(config: Config, transport: Option<Arc<dyn QueueTransport>>) -> Result<Router> {
    tracing::info!("🗄️ Connecting to Postgres");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to Postgres")?;

    let workflow_store = PgWorkflowStore::new(pool.clone());
    workflow_store.init_schema().await.context("Failed to prepare workflows table")?;

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(Arc::new(workflow_store)));
    registry
        .init_from_storage()
        .await
        .context("Failed to load workflows from storage")?;

    let publisher: Arc<dyn Publisher> = Arc::new(BroadcastPublisher::default());
    let services = build_services(&config, pool, Arc::clone(&publisher))?;

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(ExecutionEngine::new(
        Arc::new(services),
        ExecutionLimits {
            block_timeout: config.execution.block_timeout(),
            run_timeout: config.execution.run_timeout(),
        },
    ));

    if let Some(transport) = &transport {
        tracing::info!("👷 Starting {} transport workers", config.execution.queue_workers);
        crate::runtime::queue::spawn_transport_workers(
            Arc::clone(transport),
            Arc::clone(&engine),
            Arc::clone(&publisher),
            config.execution.queue_workers,
            std::time::Duration::from_millis(500),
        );
    }
    let (queue, _worker) = WorkQueue::start(transport, Arc::clone(&engine), publisher);

    if config.security.webhook_secret.is_empty() {
        tracing::warn!("⚠️ APPFLOW_WEBHOOK_SECRET is not set, webhook calls will be refused");
    }

    let state = AppState {
        engine,
        queue: Arc::new(queue),
        registry,
        webhook_secret: Arc::from(config.security.webhook_secret.as_str()),
    };

    tracing::info!("✅ Application initialized successfully");
    Ok(build_router(state))
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting appflow server...");
    let app = create_app(config.clone(), None).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
