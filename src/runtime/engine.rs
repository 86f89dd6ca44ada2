//! Graph walk over a validated workflow
//!
//! The walk keeps a FIFO frontier. Each node is visited at most once, so
//! joins and cycles terminate. Every visit appends exactly one `NodeResult`,
//! success or not, and the engine alone applies context updates.

use crate::blocks::{dispatch, BlockOutcome, BlockServices};
use crate::error::EngineError;
use crate::workflow::context::ExecutionContext;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::{ExecutionJob, ExecutionResponse, NodeResult};
use petgraph::graph::NodeIndex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Time bounds for a run
#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    pub block_timeout: Duration,
    pub run_timeout: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            block_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(300),
        }
    }
}

/// Requests cancellation of the runs holding the paired `CancelSignal`
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Observed by the engine between and during blocks
#[derive(Debug, Clone)]
pub struct CancelSignal(Option<watch::Receiver<bool>>);

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle(tx), CancelSignal(Some(rx)))
    }

    /// A signal that never fires
    pub fn never() -> Self {
        CancelSignal(None)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        let Some(rx) = &self.0 else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling
                return std::future::pending().await;
            }
        }
    }
}

pub struct ExecutionEngine {
    services: Arc<BlockServices>,
    limits: ExecutionLimits,
}

impl ExecutionEngine {
    pub fn new(services: Arc<BlockServices>, limits: ExecutionLimits) -> Self {
        Self { services, limits }
    }

    /// Run from every node without incoming edges, or from `job.start_node`
    pub async fn execute(&self, job: &ExecutionJob) -> Result<ExecutionResponse, EngineError> {
        self.execute_with_cancel(job, CancelSignal::never()).await
    }

    /// Run from one explicit node
    pub async fn execute_from(&self, job: &ExecutionJob, start_node: &str) -> Result<ExecutionResponse, EngineError> {
        let mut job = job.clone();
        job.start_node = Some(start_node.to_string());
        self.execute(&job).await
    }

    pub async fn execute_with_cancel(
        &self,
        job: &ExecutionJob,
        cancel: CancelSignal,
    ) -> Result<ExecutionResponse, EngineError> {
        let graph = WorkflowGraph::build(&job.nodes, &job.edges)?;

        let starts = match job.start_node.as_deref() {
            Some(id) => vec![graph
                .index_of(id)
                .ok_or_else(|| EngineError::InvalidGraph(format!("start node '{}' not found", id)))?],
            None => graph.start_nodes(),
        };
        if starts.is_empty() && graph.node_count() > 0 {
            return Err(EngineError::InvalidGraph("workflow has no start node".to_string()));
        }

        let started = std::time::Instant::now();
        tracing::info!(
            "🚀 Starting workflow run for app '{}' ({} nodes)",
            job.app_id,
            graph.node_count()
        );

        let run_timeout = self.limits.run_timeout;
        let response = tokio::time::timeout(run_timeout, self.walk(&graph, starts, job, &cancel))
            .await
            .map_err(|_| {
                tracing::error!("⏰ Workflow run for app '{}' exceeded {:?}", job.app_id, run_timeout);
                EngineError::TimedOut(run_timeout)
            })??;

        tracing::info!(
            "🎉 Workflow run finished in {:?} ({} results)",
            started.elapsed(),
            response.results.len()
        );
        Ok(response)
    }

    async fn walk(
        &self,
        graph: &WorkflowGraph,
        starts: Vec<NodeIndex>,
        job: &ExecutionJob,
        cancel: &CancelSignal,
    ) -> Result<ExecutionResponse, EngineError> {
        let mut context = ExecutionContext::new(job.context.clone());
        let mut frontier: VecDeque<NodeIndex> = starts.into_iter().collect();
        let mut visited = HashSet::new();
        let mut results = Vec::new();

        while let Some(index) = frontier.pop_front() {
            if !visited.insert(index) {
                continue;
            }
            let node = graph.node(index);
            let block = graph.block(index);

            if cancel.is_cancelled() {
                tracing::warn!("🛑 Run cancelled before node '{}' after {} results", node.id, results.len());
                return Err(EngineError::Cancelled);
            }

            tracing::info!("📍 Executing node '{}' ({})", node.id, block.label());
            let node_started = std::time::Instant::now();
            let dispatched = tokio::time::timeout(
                self.limits.block_timeout,
                dispatch(block, node, &context, &job.app_id, &job.user_id, &self.services),
            );

            let outcome = tokio::select! {
                outcome = dispatched => outcome.unwrap_or_else(|_| {
                    tracing::warn!("⏰ Node '{}' timed out after {:?}", node.id, self.limits.block_timeout);
                    BlockOutcome::failure(block, format!("Block timed out after {:?}", self.limits.block_timeout))
                }),
                _ = cancel.cancelled() => {
                    tracing::warn!("🛑 Node '{}' ({}) aborted: execution cancelled", node.id, block.label());
                    return Err(EngineError::Cancelled);
                }
            };

            if outcome.result.success {
                tracing::info!("✅ Node '{}' completed in {:?}", node.id, node_started.elapsed());
            } else {
                tracing::info!(
                    "❌ Node '{}' failed in {:?}: {}",
                    node.id,
                    node_started.elapsed(),
                    outcome.result.error.as_deref().unwrap_or("unknown error")
                );
            }

            let branch = outcome.result.condition_value();
            context.apply(outcome.updates);
            results.push(NodeResult {
                node_id: node.id.clone(),
                result: outcome.result,
            });

            if let Some(next) = graph.next(index, branch) {
                if !visited.contains(&next) {
                    frontier.push_back(next);
                }
            }
        }

        Ok(ExecutionResponse {
            results,
            context: context.into_map(),
        })
    }
}
