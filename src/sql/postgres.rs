use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Statement};

use super::{Param, PoolOptions, PreparedStatement, QueryOutcome, SqlClient, SqlError};

/// A small round-robin connection pool. `tokio-postgres` has no pool of its
/// own (unlike `mysql_async`), so the adapter opens `max_open_connections`
/// raw connections up front, each with its background I/O task spawned —
/// the same shape the teacher's `load_postgres`/`bench_postgres` use per
/// worker, generalized here into one shared pool.
pub struct PostgresClient {
    connections: Vec<Arc<Client>>,
    next: AtomicUsize,
    closed: AtomicBool,
}

impl PostgresClient {
    pub async fn connect(dsn: &str, pool: PoolOptions) -> Result<Self, SqlError> {
        let size = pool.max_open_connections.unwrap_or(4).max(1);
        let mut connections = Vec::with_capacity(size as usize);
        for _ in 0..size {
            let (client, connection) = tokio_postgres::connect(dsn, NoTls)
                .await
                .map_err(|e| SqlError::Driver(format!("postgres connect failed: {e}")))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(error = %e, "postgres connection task ended with error");
                }
            });
            connections.push(Arc::new(client));
        }
        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn pick(&self) -> Arc<Client> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        Arc::clone(&self.connections[idx])
    }
}

#[async_trait]
impl SqlClient for PostgresClient {
    async fn ping(&self) -> Result<(), SqlError> {
        self.pick()
            .simple_query("SELECT 1")
            .await
            .map_err(|e| SqlError::Driver(format!("ping failed: {e}")))?;
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<QueryOutcome, SqlError> {
        let rows = self
            .pick()
            .query(sql, &[])
            .await
            .map_err(|e| SqlError::Driver(e.to_string()))?;
        Ok(QueryOutcome {
            rows_affected: rows.len() as u64,
        })
    }

    async fn exec(&self, sql: &str) -> Result<QueryOutcome, SqlError> {
        let n = self
            .pick()
            .execute(sql, &[])
            .await
            .map_err(|e| SqlError::Driver(e.to_string()))?;
        Ok(QueryOutcome { rows_affected: n })
    }

    async fn prepare(&self, sql: &str) -> Result<Arc<dyn PreparedStatement>, SqlError> {
        let mut statements = Vec::with_capacity(self.connections.len());
        for client in &self.connections {
            let stmt = client
                .prepare(sql)
                .await
                .map_err(|e| SqlError::Driver(format!("prepare failed: {e}")))?;
            statements.push((Arc::clone(client), stmt));
        }
        Ok(Arc::new(PostgresStatement {
            statements,
            next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), SqlError> {
        // tokio-postgres clients close their connection when dropped; this
        // just marks the client unusable for idempotent-close callers.
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

struct PostgresStatement {
    statements: Vec<(Arc<Client>, Statement)>,
    next: AtomicUsize,
    closed: AtomicBool,
}

impl PostgresStatement {
    fn pick(&self) -> &(Arc<Client>, Statement) {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.statements.len();
        &self.statements[idx]
    }
}

fn to_sql_params(args: &[Param]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    args.iter()
        .map(|p| -> Box<dyn ToSql + Sync + Send> {
            match p {
                Param::Bool(b) => Box::new(*b),
                Param::Int(i) => Box::new(*i),
                Param::Float(f) => Box::new(*f),
                Param::Str(s) => Box::new(s.clone()),
                Param::Timestamp(t) => Box::new(t.clone()),
            }
        })
        .collect()
}

#[async_trait]
impl PreparedStatement for PostgresStatement {
    async fn query_bound(&self, args: &[Param]) -> Result<QueryOutcome, SqlError> {
        let (client, stmt) = self.pick();
        let boxed = to_sql_params(args);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
        let rows = client
            .query(stmt, &refs)
            .await
            .map_err(|e| SqlError::Driver(e.to_string()))?;
        Ok(QueryOutcome {
            rows_affected: rows.len() as u64,
        })
    }

    async fn exec_bound(&self, args: &[Param]) -> Result<QueryOutcome, SqlError> {
        let (client, stmt) = self.pick();
        let boxed = to_sql_params(args);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
        let n = client
            .execute(stmt, &refs)
            .await
            .map_err(|e| SqlError::Driver(e.to_string()))?;
        Ok(QueryOutcome { rows_affected: n })
    }

    async fn close(&self) -> Result<(), SqlError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
