//! Secure access to tenant-owned, schema-on-write tables (`app_<appId>_<suffix>`)

pub mod identifier;
pub mod query_builder;
pub mod rate_limit;
pub mod schema;
pub mod security;
pub mod service;
pub mod store;

pub use query_builder::{BuiltQuery, Condition, Logic, Operator, SafeQueryBuilder, SortDirection};
pub use rate_limit::{Operation, RateLimiter, RateLimits, SlidingWindowLimiter};
pub use schema::{ColumnMetadata, SchemaRegistry, SqlValue, TableMetadata};
pub use security::OwnershipLookup;
pub use service::{Caller, FindRequest, OrderBy, Row, TableService};
pub use store::{PgOwnershipLookup, PgTableStore, TableStore};
