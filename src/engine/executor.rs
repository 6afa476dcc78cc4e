use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;

use crate::engine::error::EngineError;
use crate::engine::generator::GeneratorSpec;
use crate::engine::template::{CompiledQuery, QueryClass};
use crate::sql::{Param, QueryOutcome, QueryResult, SqlClient, SqlError};

/// One `exec(ctx) -> QueryResult` callable per scenario, selected once at
/// build time from the {text,bind} x {exec,read} product so no iteration
/// ever branches on mode again.
pub struct Executor {
    kind: ExecutorKind,
}

enum ExecutorKind {
    TextRead { sql: String, client: Arc<dyn SqlClient> },
    TextExec { sql: String, client: Arc<dyn SqlClient> },
    BindRead {
        stmt: Arc<dyn crate::sql::PreparedStatement>,
        generators: Vec<GeneratorSpec>,
    },
    BindExec {
        stmt: Arc<dyn crate::sql::PreparedStatement>,
        generators: Vec<GeneratorSpec>,
    },
}

impl Executor {
    pub async fn build(compiled: CompiledQuery, client: Arc<dyn SqlClient>) -> Result<Self, EngineError> {
        let kind = match compiled {
            CompiledQuery::Text { sql, class } => match class {
                QueryClass::Read => ExecutorKind::TextRead { sql, client },
                QueryClass::Exec => ExecutorKind::TextExec { sql, client },
            },
            CompiledQuery::Bind { sql, class, generators } => {
                let stmt = client
                    .prepare(&sql)
                    .await
                    .map_err(|e| EngineError::Build(format!("prepare failed: {e}")))?;
                match class {
                    QueryClass::Read => ExecutorKind::BindRead { stmt, generators },
                    QueryClass::Exec => ExecutorKind::BindExec { stmt, generators },
                }
            }
        };
        Ok(Self { kind })
    }

    pub async fn exec(&self, rng: &mut StdRng) -> QueryResult {
        let start = Instant::now();
        match &self.kind {
            ExecutorKind::TextRead { sql, client } => {
                let outcome = client.query(sql).await;
                to_result(sql.clone(), start, outcome)
            }
            ExecutorKind::TextExec { sql, client } => {
                let outcome = client.exec(sql).await;
                to_result(sql.clone(), start, outcome)
            }
            ExecutorKind::BindRead { stmt, generators } => {
                let params = bind_params(generators, rng);
                let query_text = render_params(&params);
                let outcome = stmt.query_bound(&params).await;
                to_result(query_text, start, outcome)
            }
            ExecutorKind::BindExec { stmt, generators } => {
                let params = bind_params(generators, rng);
                let query_text = render_params(&params);
                let outcome = stmt.exec_bound(&params).await;
                to_result(query_text, start, outcome)
            }
        }
    }

    /// Idempotent: safe from both workflow teardown and rollback-on-build-failure.
    pub async fn close(&self) -> Result<(), EngineError> {
        match &self.kind {
            ExecutorKind::BindRead { stmt, .. } | ExecutorKind::BindExec { stmt, .. } => stmt
                .close()
                .await
                .map_err(|e| EngineError::Internal(format!("statement close failed: {e}"))),
            ExecutorKind::TextRead { .. } | ExecutorKind::TextExec { .. } => Ok(()),
        }
    }
}

fn bind_params(generators: &[GeneratorSpec], rng: &mut StdRng) -> Vec<Param> {
    generators.iter().map(|g| Param::from(g.generate(rng))).collect()
}

fn render_params(params: &[Param]) -> String {
    let rendered: Vec<String> = params
        .iter()
        .map(|p| match p {
            Param::Bool(b) => b.to_string(),
            Param::Int(i) => i.to_string(),
            Param::Float(f) => f.to_string(),
            Param::Str(s) => format!("'{}'", s.replace('\'', "''")),
            Param::Timestamp(t) => format!("'{t}'"),
        })
        .collect();
    format!("[{}]", rendered.join(", "))
}

fn to_result(query_text: String, start: Instant, outcome: Result<QueryOutcome, SqlError>) -> QueryResult {
    let response_time = start.elapsed();
    match outcome {
        Ok(o) => QueryResult {
            query_text,
            rows_affected: o.rows_affected,
            response_time,
            error: None,
        },
        Err(e) => QueryResult {
            query_text,
            rows_affected: 0,
            response_time,
            error: Some(e.to_string()),
        },
    }
}
