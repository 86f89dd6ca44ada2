//! Asynchronous execution of workflow jobs
//!
//! An external `QueueTransport` (for example Redis) is used when configured.
//! When it is absent or refuses a push, jobs go to an in-process FIFO channel
//! drained by a single worker. Callers see the same `enqueue` either way.

use crate::error::{EngineError, QueueError};
use crate::runtime::engine::ExecutionEngine;
use crate::services::publish::{app_channel, Publisher};
use crate::workflow::types::{ExecutionJob, ExecutionResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Attempts a transport job gets when the engine fails transiently
pub const MAX_JOB_ATTEMPTS: u32 = 3;

/// A job plus transport metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub id: String,
    pub attempt: u32,
    pub job: ExecutionJob,
}

impl JobEnvelope {
    pub fn new(job: ExecutionJob) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            attempt: 1,
            job,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueMode {
    Transport,
    InProcess,
}

/// What `enqueue` hands back to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReceipt {
    pub job_id: String,
    pub mode: QueueMode,
}

/// External job transport
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn push(&self, envelope: &JobEnvelope) -> Result<(), QueueError>;
    /// Next job, or `None` when the queue is empty
    async fn pop(&self) -> Result<Option<JobEnvelope>, QueueError>;
    async fn complete(&self, job_id: &str) -> Result<(), QueueError>;
    /// Put a job back for another attempt
    async fn retry(&self, envelope: &JobEnvelope) -> Result<(), QueueError>;
    async fn fail(&self, job_id: &str, reason: &str) -> Result<(), QueueError>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: ExecutionJob) -> Result<JobReceipt, QueueError>;
}

/// Transport-first queue with an in-process fallback
pub struct WorkQueue {
    transport: Option<Arc<dyn QueueTransport>>,
    local: mpsc::UnboundedSender<JobEnvelope>,
}

impl WorkQueue {
    /// Create the queue and spawn its in-process worker
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        transport: Option<Arc<dyn QueueTransport>>,
        engine: Arc<ExecutionEngine>,
        publisher: Arc<dyn Publisher>,
    ) -> (Self, JoinHandle<()>) {
        let (local, receiver) = mpsc::unbounded_channel();
        let worker = spawn_in_process_worker(receiver, engine, publisher);
        (Self { transport, local }, worker)
    }
}

#[async_trait]
impl JobQueue for WorkQueue {
    async fn enqueue(&self, job: ExecutionJob) -> Result<JobReceipt, QueueError> {
        let envelope = JobEnvelope::new(job);

        if let Some(transport) = &self.transport {
            match transport.push(&envelope).await {
                Ok(()) => {
                    tracing::info!("📬 Job {} queued on transport", envelope.id);
                    return Ok(JobReceipt {
                        job_id: envelope.id,
                        mode: QueueMode::Transport,
                    });
                }
                Err(e) => tracing::warn!("⚠️ Transport push failed, running job in-process: {}", e),
            }
        }

        let job_id = envelope.id.clone();
        self.local.send(envelope).map_err(|_| QueueError::Closed)?;
        tracing::info!("📬 Job {} queued in-process", job_id);
        Ok(JobReceipt {
            job_id,
            mode: QueueMode::InProcess,
        })
    }
}

/// Execute one job and announce its completion on the app channel
pub async fn run_job(
    engine: &ExecutionEngine,
    publisher: &dyn Publisher,
    envelope: &JobEnvelope,
) -> Result<ExecutionResponse, EngineError> {
    tracing::info!("⚙️ Running job {} (attempt {})", envelope.id, envelope.attempt);
    let outcome = engine.execute(&envelope.job).await;

    let payload = match &outcome {
        Ok(response) => json!({
            "jobId": envelope.id,
            "success": true,
            "results": response.results,
            "workflowId": envelope.job.workflow_id,
        }),
        Err(e) => json!({
            "jobId": envelope.id,
            "success": false,
            "error": e.to_string(),
            "workflowId": envelope.job.workflow_id,
        }),
    };
    publisher
        .publish(&app_channel(&envelope.job.app_id), "workflow:completed", payload)
        .await;
    outcome
}

/// Drain the in-process channel one job at a time
pub fn spawn_in_process_worker(
    mut receiver: mpsc::UnboundedReceiver<JobEnvelope>,
    engine: Arc<ExecutionEngine>,
    publisher: Arc<dyn Publisher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = receiver.recv().await {
            if let Err(e) = run_job(&engine, publisher.as_ref(), &envelope).await {
                tracing::error!("❌ In-process job {} failed: {}", envelope.id, e);
            }
        }
        tracing::info!("📭 In-process queue closed");
    })
}

/// Poll a transport with `workers` concurrent workers
pub fn spawn_transport_workers(
    transport: Arc<dyn QueueTransport>,
    engine: Arc<ExecutionEngine>,
    publisher: Arc<dyn Publisher>,
    workers: usize,
    poll_interval: Duration,
) -> Vec<JoinHandle<()>> {
    (0..workers.max(1))
        .map(|worker| {
            let transport = Arc::clone(&transport);
            let engine = Arc::clone(&engine);
            let publisher = Arc::clone(&publisher);
            tokio::spawn(async move {
                tracing::info!("👷 Transport worker {} started", worker);
                loop {
                    match transport.pop().await {
                        Ok(Some(envelope)) => {
                            process_transport_job(transport.as_ref(), &engine, publisher.as_ref(), envelope).await
                        }
                        Ok(None) => tokio::time::sleep(poll_interval).await,
                        Err(e) => {
                            tracing::error!("❌ Transport worker {} could not pop: {}", worker, e);
                            tokio::time::sleep(poll_interval).await;
                        }
                    }
                }
            })
        })
        .collect()
}

/// Run a popped job and settle it on the transport
///
/// Transient engine failures are retried until `MAX_JOB_ATTEMPTS`; anything
/// else, including block failures inside a finished run, completes the job.
pub async fn process_transport_job(
    transport: &dyn QueueTransport,
    engine: &ExecutionEngine,
    publisher: &dyn Publisher,
    envelope: JobEnvelope,
) {
    let settled = match run_job(engine, publisher, &envelope).await {
        Ok(_) => transport.complete(&envelope.id).await,
        Err(e) if e.is_transient() && envelope.attempt < MAX_JOB_ATTEMPTS => {
            tracing::warn!("🔁 Job {} failed transiently ({}), retrying", envelope.id, e);
            let retry = JobEnvelope {
                attempt: envelope.attempt + 1,
                ..envelope.clone()
            };
            transport.retry(&retry).await
        }
        Err(EngineError::InvalidGraph(reason)) => {
            tracing::error!("❌ Job {} has an invalid graph: {}", envelope.id, reason);
            transport.fail(&envelope.id, &reason).await
        }
        Err(e) => {
            tracing::error!("❌ Job {} failed after {} attempts: {}", envelope.id, envelope.attempt, e);
            transport.fail(&envelope.id, &e.to_string()).await
        }
    };
    if let Err(e) = settled {
        tracing::error!("❌ Could not settle job {} on transport: {}", envelope.id, e);
    }
}
