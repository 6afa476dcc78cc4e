use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnPoolConfig, DbDriver, RunConfig, ScenarioConfig};
use crate::engine::error::EngineError;
use crate::engine::event::EventSink;
use crate::engine::executor::Executor;
use crate::engine::ids::ThreadIdAllocator;
use crate::engine::scenario::ScenarioDriver;
use crate::engine::template;
use crate::report::{format_duration, format_rate, Report, ScenarioReport};
use crate::sql::{self, PoolOptions, SqlClient};

/// Builds every scenario from a validated `RunConfig`, runs them
/// concurrently under one shared deadline, and assembles the final report.
/// Build is transactional: any failure rolls back everything already opened.
pub struct Workflow {
    config: RunConfig,
    client: Arc<dyn SqlClient>,
    scenarios: Vec<ScenarioDriver>,
    id_alloc: Arc<ThreadIdAllocator>,
    event_sink: Arc<dyn EventSink>,
}

impl Workflow {
    pub async fn build(config: RunConfig, event_sink: Arc<dyn EventSink>) -> Result<Self, EngineError> {
        let pool_opts = pool_options(config.db.conn_pool.as_ref());
        let client = sql::open(config.db.driver, &config.db.dsn, pool_opts)
            .await
            .map_err(|e| EngineError::Build(format!("connection failed: {e}")))?;
        client
            .ping()
            .await
            .map_err(|e| EngineError::Build(format!("ping failed: {e}")))?;

        event_sink.on_info("Database connection established");
        event_sink.on_info("Initializing scenarios");

        let mut scenarios = Vec::with_capacity(config.scenarios.len());
        for (index, scenario_cfg) in config.scenarios.iter().enumerate() {
            let built = build_one_scenario(
                scenario_cfg,
                index as u64 + 1,
                config.db.driver,
                Arc::clone(&client),
                Arc::clone(&event_sink),
            )
            .await;
            match built {
                Ok(driver) => scenarios.push(driver),
                Err(e) => {
                    rollback(&scenarios, &client).await;
                    return Err(e);
                }
            }
        }

        Ok(Self {
            config,
            client,
            scenarios,
            id_alloc: Arc::new(ThreadIdAllocator::new()),
            event_sink,
        })
    }

    /// Runs all scenarios concurrently. The shared cancellation token is
    /// tripped both by external cancellation (`parent`) and by the first
    /// scenario to return a fatal, non-cancellation error, cancelling peers.
    /// Always produces a report from whatever was collected; `error` is set
    /// when the run should be treated as a failure (exit code 1) even though
    /// a report is available.
    pub async fn run(self, parent: CancellationToken) -> WorkflowOutcome {
        let start = Instant::now();
        let group_cancel = parent.child_token();

        let mut joins: JoinSet<(usize, ScenarioDriver, Result<(), EngineError>)> = JoinSet::new();
        for (index, driver) in self.scenarios.into_iter().enumerate() {
            let cancel = group_cancel.clone();
            let id_alloc = Arc::clone(&self.id_alloc);
            joins.spawn(async move {
                let (driver, result) = driver.run(cancel, id_alloc).await;
                (index, driver, result)
            });
        }

        let mut first_error: Option<EngineError> = None;
        let mut finished: Vec<(usize, ScenarioDriver)> = Vec::new();
        while let Some(joined) = joins.join_next().await {
            match joined {
                Ok((index, driver, result)) => {
                    if let Err(e) = &result {
                        if first_error.is_none() && !matches!(e, EngineError::Cancelled) {
                            first_error = Some(clone_error(e));
                            group_cancel.cancel();
                        }
                    }
                    finished.push((index, driver));
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(EngineError::Internal(format!("scenario task panicked: {e}")));
                    }
                    group_cancel.cancel();
                }
            }
        }

        finished.sort_by_key(|(index, _)| *index);
        let scenarios: Vec<ScenarioDriver> = finished.into_iter().map(|(_, driver)| driver).collect();

        for scenario in &scenarios {
            if let Err(e) = scenario.close().await {
                tracing::warn!(error = %e, scenario = scenario.name(), "scenario teardown close failed");
            }
        }
        if let Err(e) = self.client.close().await {
            tracing::warn!(error = %e, "sql client close failed");
        }

        let scenario_reports: Vec<ScenarioReport> = scenarios.iter().map(scenario_report).collect();
        let report = Report {
            run_config: self.config.clone(),
            db_driver: self.config.db.driver,
            test_duration: start.elapsed(),
            scenarios: scenario_reports,
        };

        let error = match first_error {
            Some(err) => Some(err),
            None if group_cancel.is_cancelled() => Some(EngineError::Cancelled),
            None => None,
        };

        match &error {
            None => {
                self.event_sink.on_info("All scenarios completed successfully");
                self.event_sink.on_info("Test completed successfully");
            }
            Some(_) => self.event_sink.on_info("Test completed successfully"),
        }

        WorkflowOutcome { report, error }
    }
}

/// Outcome of a run: the report is always populated from whatever metrics
/// were collected before teardown; `error` is `Some` when the caller should
/// treat the run as failed (non-zero exit) despite a report being available.
pub struct WorkflowOutcome {
    pub report: Report,
    pub error: Option<EngineError>,
}

fn scenario_report(scenario: &ScenarioDriver) -> ScenarioReport {
    let derived = scenario.derived();
    let counters = scenario.counters();
    ScenarioReport {
        name: scenario.name().to_string(),
        threads_total: scenario.threads_total(),
        iterations_total: counters.iterations_total,
        queries_total: counters.queries_total,
        qps: derived.qps,
        rows_affected: counters.rows_affected,
        errors_total: counters.errors_total,
        success_rate: format_rate(derived.success_rate),
        failed_rate: format_rate(derived.failed_rate),
        min: format_duration(derived.min),
        max: format_duration(derived.max),
        p50: format_duration(derived.p50),
        p90: format_duration(derived.p90),
        p95: format_duration(derived.p95),
        p99: format_duration(derived.p99),
        top_errors: derived.top_errors,
    }
}

fn clone_error(e: &EngineError) -> EngineError {
    match e {
        EngineError::Config(s) => EngineError::Config(s.clone()),
        EngineError::Build(s) => EngineError::Build(s.clone()),
        EngineError::Merge(s) => EngineError::Merge(s.clone()),
        EngineError::Cancelled => EngineError::Cancelled,
        EngineError::Internal(s) => EngineError::Internal(s.clone()),
    }
}

async fn build_one_scenario(
    cfg: &ScenarioConfig,
    id: u64,
    driver: DbDriver,
    client: Arc<dyn SqlClient>,
    event_sink: Arc<dyn EventSink>,
) -> Result<ScenarioDriver, EngineError> {
    let args = cfg.statement.args.clone().unwrap_or_default();
    let compiled = template::compile(&cfg.statement.query, &args, driver)?;
    let executor = Arc::new(Executor::build(compiled, client).await?);
    Ok(ScenarioDriver::new(
        Arc::from(cfg.name.as_str()),
        id,
        cfg.threads,
        cfg.termination,
        cfg.ramp_up,
        cfg.pacing,
        executor,
        event_sink,
    ))
}

async fn rollback(built: &[ScenarioDriver], client: &Arc<dyn SqlClient>) {
    for scenario in built {
        let _ = scenario.close().await;
    }
    let _ = client.close().await;
}

fn pool_options(cfg: Option<&ConnPoolConfig>) -> PoolOptions {
    match cfg {
        None => PoolOptions::default(),
        Some(cfg) => PoolOptions {
            max_open_connections: cfg.max_open_connections,
            max_idle_connections: cfg.max_idle_connections,
            conn_max_idle_time: cfg.conn_max_idle_time.map(Into::into),
            conn_max_lifetime: cfg.conn_max_lifetime.map(Into::into),
        },
    }
}
