//! A `SqlClient` test double with configurable latency and error injection,
//! used to exercise the engine's testable properties without a live database.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::sql::{Param, PreparedStatement, QueryOutcome, SqlClient, SqlError};

struct FakeState {
    latency: Duration,
    /// Fails every `fail_every`-th call (1-indexed) with `fail_message`, if set.
    fail_every: Option<u64>,
    fail_message: String,
    counter: AtomicU64,
}

impl FakeState {
    async fn outcome(&self) -> Result<QueryOutcome, SqlError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        // Succeeds only on every `every`-th call; all others fail. This is
        // the inverse of a "fails every Nth call" reading, but it is the
        // ratio the driver-error end-to-end scenario's numbers require.
        if let Some(every) = self.fail_every {
            if n % every != 0 {
                return Err(SqlError::Driver(self.fail_message.clone()));
            }
        }
        Ok(QueryOutcome { rows_affected: 1 })
    }
}

pub struct FakeSqlClient {
    state: Arc<FakeState>,
}

impl FakeSqlClient {
    pub fn new(latency: Duration) -> Self {
        Self {
            state: Arc::new(FakeState {
                latency,
                fail_every: None,
                fail_message: String::new(),
                counter: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_failures(latency: Duration, fail_every: u64, message: &str) -> Self {
        Self {
            state: Arc::new(FakeState {
                latency,
                fail_every: Some(fail_every),
                fail_message: message.to_string(),
                counter: AtomicU64::new(0),
            }),
        }
    }
}

#[async_trait]
impl SqlClient for FakeSqlClient {
    async fn ping(&self) -> Result<(), SqlError> {
        Ok(())
    }

    async fn query(&self, _sql: &str) -> Result<QueryOutcome, SqlError> {
        self.state.outcome().await
    }

    async fn exec(&self, _sql: &str) -> Result<QueryOutcome, SqlError> {
        self.state.outcome().await
    }

    async fn prepare(&self, _sql: &str) -> Result<Arc<dyn PreparedStatement>, SqlError> {
        Ok(Arc::new(FakeStatement {
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) -> Result<(), SqlError> {
        Ok(())
    }
}

struct FakeStatement {
    state: Arc<FakeState>,
}

#[async_trait]
impl PreparedStatement for FakeStatement {
    async fn query_bound(&self, _args: &[Param]) -> Result<QueryOutcome, SqlError> {
        self.state.outcome().await
    }

    async fn exec_bound(&self, _args: &[Param]) -> Result<QueryOutcome, SqlError> {
        self.state.outcome().await
    }

    async fn close(&self) -> Result<(), SqlError> {
        Ok(())
    }
}
