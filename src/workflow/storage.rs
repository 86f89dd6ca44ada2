//! Postgres persistence for stored workflows
//!
//! Workflows are kept as a JSONB definition with a few indexed lookup columns.

use crate::workflow::types::Workflow;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{postgres::PgPool, Row};
use std::collections::HashMap;

/// Basic workflow metadata for listing operations
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub id: String,
    pub app_id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

/// Storage backend for workflow definitions
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert or replace a workflow
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()>;
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>>;
    async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>>;
    /// Every stored workflow keyed by id, for registry loading
    async fn load_all_workflows(&self) -> Result<HashMap<String, Workflow>>;
    /// Returns whether a row was removed
    async fn delete_workflow(&self, id: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the workflows table; safe to call repeatedly
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                name TEXT NOT NULL,
                definition JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_app_id ON workflows(app_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let definition = serde_json::to_value(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, app_id, name, definition, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (id) DO UPDATE SET
                app_id = excluded.app_id,
                name = excluded.name,
                definition = excluded.definition,
                updated_at = now()
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.app_id)
        .bind(&workflow.name)
        .bind(definition)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition: serde_json::Value = row.try_get("definition")?;
                Ok(Some(serde_json::from_value(definition)?))
            }
            None => Ok(None),
        }
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>> {
        let rows = sqlx::query("SELECT id, app_id, name, updated_at FROM workflows ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> Result<WorkflowMetadata> {
                Ok(WorkflowMetadata {
                    id: row.try_get("id")?,
                    app_id: row.try_get("app_id")?,
                    name: row.try_get("name")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    async fn load_all_workflows(&self) -> Result<HashMap<String, Workflow>> {
        let rows = sqlx::query("SELECT id, definition FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = HashMap::new();
        for row in rows {
            let id: String = row.try_get("id")?;
            let definition: serde_json::Value = row.try_get("definition")?;
            match serde_json::from_value::<Workflow>(definition) {
                Ok(workflow) => {
                    workflows.insert(id, workflow);
                }
                Err(e) => tracing::warn!("⚠️ Skipping unreadable workflow '{}': {}", id, e),
            }
        }

        Ok(workflows)
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
