//! Hot-reload workflow registry using ArcSwap
//!
//! Updates swap the whole map pointer, so lookups never block while a
//! workflow is being saved or removed.

use crate::workflow::graph::WorkflowGraph;
use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::Workflow;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// A workflow whose graph passed validation
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub workflow: Arc<Workflow>,
}

pub struct WorkflowRegistry {
    workflows: ArcSwap<HashMap<String, CompiledWorkflow>>,
    storage: Arc<dyn WorkflowStore>,
}

impl WorkflowRegistry {
    pub fn new(storage: Arc<dyn WorkflowStore>) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    pub fn storage(&self) -> &Arc<dyn WorkflowStore> {
        &self.storage
    }

    /// Load every stored workflow; invalid ones are logged and skipped
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all_workflows().await?;
        let mut compiled = HashMap::with_capacity(stored.len());
        for (id, workflow) in stored {
            match compile(workflow) {
                Ok(c) => {
                    compiled.insert(id, c);
                }
                Err(e) => tracing::warn!("⚠️ Not loading workflow '{}': {}", id, e),
            }
        }

        self.workflows.store(Arc::new(compiled));
        tracing::info!("📊 Initialized workflow registry with {} workflows", self.workflows.load().len());
        Ok(())
    }

    /// Validate, persist and publish a workflow in one step
    pub async fn save(&self, workflow: Workflow) -> Result<()> {
        let compiled = compile(workflow)?;
        self.storage.save_workflow(&compiled.workflow).await?;
        let id = compiled.workflow.id.clone();
        self.swap(|map| {
            map.insert(id.clone(), compiled);
        });
        tracing::info!("🔄 Hot-reloaded workflow: {}", id);
        Ok(())
    }

    /// Re-read one workflow from storage
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<()> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?;
        let compiled = compile(workflow)?;
        self.swap(|map| {
            map.insert(workflow_id.to_string(), compiled);
        });
        tracing::info!("🔄 Hot-reloaded workflow: {}", workflow_id);
        Ok(())
    }

    /// Delete from storage and registry; false when it did not exist
    pub async fn remove(&self, workflow_id: &str) -> Result<bool> {
        let deleted = self.storage.delete_workflow(workflow_id).await?;
        self.swap(|map| {
            map.remove(workflow_id);
        });
        if deleted {
            tracing::info!("🗑️ Removed workflow: {}", workflow_id);
        }
        Ok(deleted)
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Option<CompiledWorkflow> {
        self.workflows.load().get(workflow_id).cloned()
    }

    pub fn list_workflow_ids(&self) -> Vec<String> {
        self.workflows.load().keys().cloned().collect()
    }

    /// Workflows and trigger nodes listening on a webhook source
    pub fn webhook_targets(&self, source: &str) -> Vec<(Arc<Workflow>, String)> {
        let workflows = self.workflows.load();
        let mut targets: Vec<(Arc<Workflow>, String)> = workflows
            .values()
            .flat_map(|compiled| {
                compiled
                    .workflow
                    .webhook_triggers(source)
                    .map(|node_id| (Arc::clone(&compiled.workflow), node_id.to_string()))
            })
            .collect();
        targets.sort_by(|a, b| (&a.0.id, &a.1).cmp(&(&b.0.id, &b.1)));
        targets
    }

    fn swap(&self, edit: impl FnOnce(&mut HashMap<String, CompiledWorkflow>)) {
        let mut next = (**self.workflows.load()).clone();
        edit(&mut next);
        self.workflows.store(Arc::new(next));
    }
}

fn compile(workflow: Workflow) -> Result<CompiledWorkflow> {
    WorkflowGraph::build(&workflow.nodes, &workflow.edges)?;
    Ok(CompiledWorkflow {
        workflow: Arc::new(workflow),
    })
}
