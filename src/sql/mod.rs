pub mod mysql;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::DbDriver;
use crate::engine::generator::GeneratedValue;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("{0}")]
    Driver(String),
}

/// A fully-typed argument produced by a generator, ready to bind to a
/// prepared statement in whichever driver-specific representation that
/// driver's adapter requires.
#[derive(Debug, Clone)]
pub enum Param {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(String),
}

impl From<GeneratedValue> for Param {
    fn from(value: GeneratedValue) -> Self {
        match value {
            GeneratedValue::Bool(b) => Param::Bool(b),
            GeneratedValue::Int(i) => Param::Int(i),
            GeneratedValue::Float(f) => Param::Float(f),
            GeneratedValue::Str(s) => Param::Str(s),
            GeneratedValue::Uuid(u) => Param::Str(u.to_string()),
            GeneratedValue::Timestamp(t) => Param::Timestamp(t),
        }
    }
}

/// Driver-reported outcome of a single call, before response-time is attached
/// by the executor adapter.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub rows_affected: u64,
}

/// The full per-execution record the thread runtime submits to its metrics.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Rendered SQL text (text mode) or a debug rendering of the bound
    /// argument tuple (bind mode) — used only for log events, never parsed.
    pub query_text: String,
    pub rows_affected: u64,
    pub response_time: Duration,
    pub error: Option<String>,
}

#[async_trait]
pub trait PreparedStatement: Send + Sync {
    async fn query_bound(&self, args: &[Param]) -> Result<QueryOutcome, SqlError>;
    async fn exec_bound(&self, args: &[Param]) -> Result<QueryOutcome, SqlError>;
    /// Idempotent: safe to call more than once (teardown may call it twice
    /// via overlapping cleanup paths).
    async fn close(&self) -> Result<(), SqlError>;
}

#[async_trait]
pub trait SqlClient: Send + Sync {
    async fn ping(&self) -> Result<(), SqlError>;
    async fn query(&self, sql: &str) -> Result<QueryOutcome, SqlError>;
    async fn exec(&self, sql: &str) -> Result<QueryOutcome, SqlError>;
    async fn prepare(&self, sql: &str) -> Result<Arc<dyn PreparedStatement>, SqlError>;
    /// Idempotent close.
    async fn close(&self) -> Result<(), SqlError>;
}

/// Connection pool sizing, shared by both driver adapters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolOptions {
    pub max_open_connections: Option<u32>,
    pub max_idle_connections: Option<u32>,
    pub conn_max_idle_time: Option<Duration>,
    pub conn_max_lifetime: Option<Duration>,
}

pub async fn open(driver: DbDriver, dsn: &str, pool: PoolOptions) -> Result<Arc<dyn SqlClient>, SqlError> {
    match driver {
        DbDriver::Postgres => Ok(Arc::new(postgres::PostgresClient::connect(dsn, pool).await?)),
        DbDriver::Mysql => Ok(Arc::new(mysql::MysqlClient::connect(dsn, pool)?)),
    }
}
