//! Shared doubles for integration tests; nothing here needs a live database

#![allow(dead_code)]

use anyhow::Result;
use appflow::blocks::{BlockServices, BlockSettings};
use appflow::datatable::{
    BuiltQuery, ColumnMetadata, OwnershipLookup, Row, SlidingWindowLimiter, TableService, TableStore,
};
use appflow::error::{DataError, MailError, MediaError, ProviderError, QueueError};
use appflow::runtime::{ExecutionEngine, ExecutionLimits, JobQueue, JobReceipt, QueueMode};
use appflow::services::{
    BroadcastPublisher, EmailMessage, FileDescriptor, Mailer, MediaStore, Publisher, Summarizer, SummaryOptions,
};
use appflow::workflow::storage::{WorkflowMetadata, WorkflowStore};
use appflow::workflow::{ExecutionJob, Workflow};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const APP_ID: &str = "42";
pub const USER_ID: &str = "7";
pub const JWT_SECRET: &str = "test-jwt-secret";

/// Catalog and rows held in memory; every query is recorded
#[derive(Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, Vec<ColumnMetadata>>>,
    rows: Mutex<Vec<Row>>,
    pub queries: Mutex<Vec<BuiltQuery>>,
}

impl MemoryTableStore {
    pub fn with_table(self, name: &str, columns: Vec<ColumnMetadata>) -> Self {
        self.tables.lock().unwrap().insert(name.to_string(), columns);
        self
    }

    /// Rows returned by every following query
    pub fn returning(&self, rows: Vec<Value>) {
        *self.rows.lock().unwrap() = rows
            .into_iter()
            .filter_map(|row| row.as_object().cloned())
            .collect();
    }

    pub fn recorded(&self) -> Vec<BuiltQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn discover_columns(&self, table_name: &str) -> Result<Vec<ColumnMetadata>, DataError> {
        Ok(self.tables.lock().unwrap().get(table_name).cloned().unwrap_or_default())
    }

    async fn fetch_rows(&self, query: &BuiltQuery) -> Result<Vec<Row>, DataError> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(self.rows.lock().unwrap().clone())
    }
}

pub struct FixedOwnership(pub bool);

#[async_trait]
impl OwnershipLookup for FixedOwnership {
    async fn owns_app(&self, _app_id: &str, _user_id: &str) -> Result<bool, DataError> {
        Ok(self.0)
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<String, MailError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(format!("msg-{}", sent.len()))
    }
}

/// Summarizer that answers after `delay`
pub struct FakeSummarizer {
    pub delay: Duration,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, api_key: &str, text: &str, _options: &SummaryOptions) -> Result<String, ProviderError> {
        tokio::time::sleep(self.delay).await;
        if api_key == "bad-key" {
            return Err(ProviderError::InvalidApiKey);
        }
        Ok(format!("summary of {} chars", text.len()))
    }
}

/// Media store that keeps nothing on disk
#[derive(Default)]
pub struct MemoryMedia;

#[async_trait]
impl MediaStore for MemoryMedia {
    async fn resolve(&self, path: &str) -> Result<FileDescriptor, MediaError> {
        Err(MediaError::NotFound(path.to_string()))
    }

    async fn store(&self, app_id: &str, file: &FileDescriptor) -> Result<FileDescriptor, MediaError> {
        Ok(FileDescriptor {
            path: Some(format!("{}/{}", app_id, file.name)),
            url: Some(format!("/media/{}/{}", app_id, file.name)),
            content: None,
            ..file.clone()
        })
    }

    async fn read_text(&self, file: &FileDescriptor) -> Result<String, MediaError> {
        file.content.clone().ok_or_else(|| MediaError::NotFound(file.name.clone()))
    }
}

pub struct Harness {
    pub engine: Arc<ExecutionEngine>,
    pub store: Arc<MemoryTableStore>,
    pub publisher: Arc<BroadcastPublisher>,
    pub mailer: Arc<RecordingMailer>,
}

pub struct HarnessOptions {
    pub owns_app: bool,
    pub summarizer_delay: Duration,
    pub limits: ExecutionLimits,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            owns_app: true,
            summarizer_delay: Duration::ZERO,
            limits: ExecutionLimits::default(),
        }
    }
}

pub fn contacts_table() -> (String, Vec<ColumnMetadata>) {
    (
        format!("app_{}_contacts", APP_ID),
        vec![
            ColumnMetadata::new("id", "integer", false).with_default("nextval('contacts_id_seq')"),
            ColumnMetadata::new("email", "text", false),
            ColumnMetadata::new("status", "text", true),
            ColumnMetadata::new("age", "integer", true),
        ],
    )
}

pub fn harness() -> Harness {
    harness_with(HarnessOptions::default())
}

pub fn harness_with(options: HarnessOptions) -> Harness {
    let (table, columns) = contacts_table();
    let store = Arc::new(MemoryTableStore::default().with_table(&table, columns));
    let publisher = Arc::new(BroadcastPublisher::default());
    let mailer = Arc::new(RecordingMailer::default());

    let tables = TableService::new(
        store.clone(),
        Arc::new(SlidingWindowLimiter::default()),
        Arc::new(FixedOwnership(options.owns_app)),
        publisher.clone(),
        Duration::from_secs(60),
    );

    let services = BlockServices {
        tables: Arc::new(tables),
        media: Arc::new(MemoryMedia),
        mailer: mailer.clone(),
        summarizer: Arc::new(FakeSummarizer {
            delay: options.summarizer_delay,
        }),
        http: reqwest::Client::new(),
        settings: BlockSettings {
            jwt_secret: JWT_SECRET.to_string(),
            provider_retry_delay: Duration::from_millis(1),
            ..BlockSettings::default()
        },
    };

    Harness {
        engine: Arc::new(ExecutionEngine::new(Arc::new(services), options.limits)),
        store,
        publisher,
        mailer,
    }
}

/// A job for the test app from JSON nodes and edges
pub fn job(nodes: Value, edges: Value, context: Value) -> ExecutionJob {
    serde_json::from_value(json!({
        "appId": APP_ID,
        "userId": USER_ID,
        "nodes": nodes,
        "edges": edges,
        "context": context,
    }))
    .unwrap()
}

pub fn publisher_of(harness: &Harness) -> Arc<dyn Publisher> {
    harness.publisher.clone()
}

#[derive(Default)]
pub struct MemoryWorkflowStore {
    workflows: Mutex<HashMap<String, Workflow>>,
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.workflows
            .lock()
            .unwrap()
            .insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.workflows.lock().unwrap().get(id).cloned())
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>> {
        Ok(self
            .workflows
            .lock()
            .unwrap()
            .values()
            .map(|w| WorkflowMetadata {
                id: w.id.clone(),
                app_id: w.app_id.clone(),
                name: w.name.clone(),
                updated_at: chrono::Utc::now(),
            })
            .collect())
    }

    async fn load_all_workflows(&self) -> Result<HashMap<String, Workflow>> {
        Ok(self.workflows.lock().unwrap().clone())
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool> {
        Ok(self.workflows.lock().unwrap().remove(id).is_some())
    }
}

/// Queue that only records what it was given
#[derive(Default)]
pub struct RecordingQueue {
    pub jobs: Mutex<Vec<ExecutionJob>>,
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: ExecutionJob) -> Result<JobReceipt, QueueError> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job);
        Ok(JobReceipt {
            job_id: format!("job-{}", jobs.len()),
            mode: QueueMode::InProcess,
        })
    }
}

pub fn token(claims: Value) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn in_one_hour() -> i64 {
    chrono::Utc::now().timestamp() + 3600
}
