//! Error taxonomy for the data layer, block executors, engine and queue
//!
//! Each layer owns a typed error so callers can tell a rejected identifier from
//! an unavailable database. Everything here renders to a human-readable message
//! that is safe to return to workflow authors: no SQL text, no stack traces.

use std::time::Duration;
use thiserror::Error;

/// Identifier rejected by the identifier validator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{kind} name is required")]
    Empty { kind: &'static str },

    #[error("{kind} name '{name}' exceeds the {max} character limit")]
    TooLong {
        kind: &'static str,
        name: String,
        max: usize,
    },

    #[error("{kind} name '{name}' must start with a letter and contain only letters, digits and underscores")]
    InvalidFormat { kind: &'static str, name: String },

    #[error("{kind} name '{name}' contains forbidden keyword '{keyword}'")]
    ForbiddenKeyword {
        kind: &'static str,
        name: String,
        keyword: &'static str,
    },

    #[error("{kind} name '{name}' references system catalog prefix '{prefix}'")]
    SystemPrefix {
        kind: &'static str,
        name: String,
        prefix: &'static str,
    },

    #[error("Table '{name}' does not belong to app '{app_id}'")]
    WrongAppPrefix { name: String, app_id: String },

    #[error("Column '{0}' is reserved and cannot be written")]
    ReservedColumn(String),

    #[error("Invalid app id '{0}'")]
    InvalidAppId(String),
}

/// Value or condition rejected by the security validator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Value exceeds maximum length of {max} characters")]
    StringTooLong { max: usize },

    #[error("Value contains a potential SQL injection pattern")]
    SqlInjection,

    #[error("Value contains a potential script injection pattern")]
    ScriptInjection,

    #[error("Array exceeds maximum of {max} elements")]
    ArrayTooLarge { max: usize },

    #[error("Object exceeds maximum of {max} properties")]
    ObjectTooLarge { max: usize },

    #[error("Expected a value of type {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Too many conditions: {count} (maximum {max})")]
    TooManyConditions { count: usize, max: usize },

    #[error("Operator '{0}' is not allowed")]
    OperatorNotAllowed(String),

    #[error("Operator {operator} requires a non-empty array value")]
    InOperandNotArray { operator: &'static str },

    #[error("Operator {operator} cannot compare against null")]
    NullOperand { operator: &'static str },

    #[error("Operator {operator} accepts at most {max} values")]
    InOperandTooLarge { operator: &'static str, max: usize },

    #[error(transparent)]
    Identifier(#[from] ValidationError),
}

/// Query construction rejected by the safe query builder
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("UPDATE requires at least one WHERE condition")]
    MissingWhere,

    #[error("No data provided for {0}")]
    EmptyData(&'static str),

    #[error("Limit must be between 1 and {max}")]
    LimitOutOfRange { max: u64 },

    #[error("Offset must not exceed {max}")]
    OffsetOutOfRange { max: i64 },

    #[error("Operator {operator} expects {expected}")]
    InvalidOperand {
        operator: &'static str,
        expected: &'static str,
    },

    #[error(transparent)]
    Identifier(#[from] ValidationError),
}

/// Aggregated schema validation failure
///
/// Carries every problem found in a payload so authors can fix them in one pass.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Validation failed: {}", .0.join("; "))]
pub struct SchemaError(pub Vec<String>);

/// Errors surfaced by the dynamic-table service
#[derive(Debug, Error)]
pub enum DataError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Rate limit exceeded for {operation} operations, try again later")]
    RateLimited { operation: &'static str },

    #[error("Access denied: user does not own app '{app_id}'")]
    AccessDenied { app_id: String },

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    /// Driver details are logged, never displayed.
    #[error("Database operation failed")]
    Database(#[from] sqlx::Error),
}

/// Failure reported by an outbound HTTP or AI provider
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider rate limit exceeded")]
    RateLimited { retry_after: Option<u64> },

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,
}

impl ProviderError {
    /// Only provider rate limiting is retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// Media storage failure
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Path '{0}' is outside the media root")]
    OutsideRoot(String),

    #[error("Media storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound email failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Email delivery failed: {0}")]
pub struct MailError(pub String);

/// Error raised inside a block executor
///
/// The engine catches these at the dispatch boundary and records them as a
/// failed node result; they never abort the graph walk.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Mail(#[from] MailError),
}

/// Errors that end a workflow run as a whole
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    #[error("Workflow execution was cancelled")]
    Cancelled,

    #[error("Workflow execution exceeded {0:?}")]
    TimedOut(Duration),
}

impl EngineError {
    /// Transient failures are worth another attempt from the queue
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Cancelled | EngineError::TimedOut(_))
    }
}

/// Job queue failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue transport unavailable: {0}")]
    Unavailable(String),

    #[error("In-process queue is closed")]
    Closed,
}
