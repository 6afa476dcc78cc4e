use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, Value};

use super::{Param, PoolOptions, PreparedStatement, QueryOutcome, SqlClient, SqlError};

/// Wraps `mysql_async`'s own connection pool, which already does everything
/// this adapter needs pool-wise — unlike the postgres adapter there is no
/// hand-rolled round robin here.
pub struct MysqlClient {
    pool: Pool,
    closed: AtomicBool,
}

impl MysqlClient {
    pub fn connect(dsn: &str, pool: PoolOptions) -> Result<Self, SqlError> {
        let opts = Opts::from_url(dsn).map_err(|e| SqlError::Driver(format!("invalid mysql dsn: {e}")))?;

        let max_open = pool.max_open_connections.unwrap_or(10).max(1) as usize;
        let max_idle = pool
            .max_idle_connections
            .map(|n| n as usize)
            .unwrap_or(max_open)
            .min(max_open);
        let constraints = PoolConstraints::new(max_idle, max_open)
            .ok_or_else(|| SqlError::Driver("invalid pool size constraints".to_string()))?;

        let mut pool_opts = PoolOpts::default().with_constraints(constraints);
        if let Some(idle) = pool.conn_max_idle_time {
            pool_opts = pool_opts.with_inactive_connection_ttl(idle);
        }

        let mut builder = OptsBuilder::from_opts(opts).pool_opts(pool_opts);
        if let Some(lifetime) = pool.conn_max_lifetime {
            builder = builder.conn_ttl(Some(lifetime));
        }

        Ok(Self {
            pool: Pool::new(builder),
            closed: AtomicBool::new(false),
        })
    }
}

fn to_mysql_value(param: &Param) -> Value {
    match param {
        Param::Bool(b) => Value::Int(*b as i64),
        Param::Int(i) => Value::Int(*i),
        Param::Float(f) => Value::Double(*f),
        Param::Str(s) => Value::Bytes(s.clone().into_bytes()),
        Param::Timestamp(t) => Value::Bytes(t.clone().into_bytes()),
    }
}

#[async_trait]
impl SqlClient for MysqlClient {
    async fn ping(&self) -> Result<(), SqlError> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| SqlError::Driver(format!("checkout failed: {e}")))?;
        conn.ping().await.map_err(|e| SqlError::Driver(e.to_string()))
    }

    async fn query(&self, sql: &str) -> Result<QueryOutcome, SqlError> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| SqlError::Driver(format!("checkout failed: {e}")))?;
        let rows: Vec<mysql_async::Row> = conn
            .query(sql)
            .await
            .map_err(|e| SqlError::Driver(e.to_string()))?;
        Ok(QueryOutcome {
            rows_affected: rows.len() as u64,
        })
    }

    async fn exec(&self, sql: &str) -> Result<QueryOutcome, SqlError> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| SqlError::Driver(format!("checkout failed: {e}")))?;
        conn.query_drop(sql)
            .await
            .map_err(|e| SqlError::Driver(e.to_string()))?;
        Ok(QueryOutcome {
            rows_affected: conn.affected_rows(),
        })
    }

    async fn prepare(&self, sql: &str) -> Result<Arc<dyn PreparedStatement>, SqlError> {
        Ok(Arc::new(MysqlStatement {
            pool: self.pool.clone(),
            sql: sql.to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), SqlError> {
        if !self.closed.swap(true, Ordering::Relaxed) {
            self.pool
                .clone()
                .disconnect()
                .await
                .map_err(|e| SqlError::Driver(format!("disconnect failed: {e}")))?;
        }
        Ok(())
    }
}

/// `mysql_async` prepares per-connection, so this holds the text of the
/// statement and a handle to the pool; each call checks out a connection and
/// prepares against it — the driver's own statement cache makes this cheap
/// on repeat executions against the same connection.
struct MysqlStatement {
    pool: Pool,
    sql: String,
    closed: AtomicBool,
}

#[async_trait]
impl PreparedStatement for MysqlStatement {
    async fn query_bound(&self, args: &[Param]) -> Result<QueryOutcome, SqlError> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| SqlError::Driver(format!("checkout failed: {e}")))?;
        let params: Vec<Value> = args.iter().map(to_mysql_value).collect();
        let stmt = conn
            .prep(&self.sql)
            .await
            .map_err(|e| SqlError::Driver(format!("prepare failed: {e}")))?;
        let rows: Vec<mysql_async::Row> = conn
            .exec(&stmt, params)
            .await
            .map_err(|e| SqlError::Driver(e.to_string()))?;
        Ok(QueryOutcome {
            rows_affected: rows.len() as u64,
        })
    }

    async fn exec_bound(&self, args: &[Param]) -> Result<QueryOutcome, SqlError> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| SqlError::Driver(format!("checkout failed: {e}")))?;
        let params: Vec<Value> = args.iter().map(to_mysql_value).collect();
        let stmt = conn
            .prep(&self.sql)
            .await
            .map_err(|e| SqlError::Driver(format!("prepare failed: {e}")))?;
        conn.exec_drop(&stmt, params)
            .await
            .map_err(|e| SqlError::Driver(e.to_string()))?;
        Ok(QueryOutcome {
            rows_affected: conn.affected_rows(),
        })
    }

    async fn close(&self) -> Result<(), SqlError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
