use thiserror::Error;

/// Fatal error kinds the engine surfaces to its caller. `RuntimeError` (a
/// driver error during query execution) is deliberately absent: it is never
/// fatal and lives only inside `ThreadMetric::err_map`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("build error: {0}")]
    Build(String),

    #[error("metrics merge failed: {0}")]
    Merge(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("internal engine error: {0}")]
    Internal(String),
}
