use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use crate::engine::event::EventSink;
use crate::engine::executor::Executor;
use crate::engine::metrics::{ThreadMetrics, ThreadMetricsSnapshot};
use crate::sql::QueryResult;

/// Error message recorded for an iteration whose driver call was still
/// in flight when cancellation won the race; the query's own outcome is
/// never observed, so no latency sample is added to the digest.
const CANCELLED_ERROR: &str = "cancelled";

/// One cooperative worker: loops under an iteration or deadline bound,
/// calling the scenario's executor and recording each outcome into its own
/// exclusively-owned metrics.
pub struct Thread {
    id: u64,
    scenario_name: Arc<str>,
    scenario_id: u64,
    executor: Arc<Executor>,
    pacing: Duration,
    event_sink: Arc<dyn EventSink>,
    metrics: ThreadMetrics,
}

impl Thread {
    pub fn new(
        id: u64,
        scenario_name: Arc<str>,
        scenario_id: u64,
        executor: Arc<Executor>,
        pacing: Duration,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            id,
            scenario_name,
            scenario_id,
            executor,
            pacing,
            event_sink,
            metrics: ThreadMetrics::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runs until `cancel` fires. `stop_time` is always recorded, regardless
    /// of how the loop exits.
    pub async fn run_on_duration(&self, cancel: CancellationToken) -> ThreadMetricsSnapshot {
        self.metrics.mark_start();
        let mut rng = StdRng::from_entropy();
        while !cancel.is_cancelled() {
            let t0 = Instant::now();
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.record(&cancelled_result(t0));
                    break;
                }
                result = self.executor.exec(&mut rng) => {
                    self.record(&result);
                }
            }
            self.pace(t0, &cancel).await;
        }
        self.metrics.mark_stop();
        self.metrics.snapshot()
    }

    /// Runs for up to `n` iterations, exiting early on cancellation.
    pub async fn run_on_iterations(&self, cancel: CancellationToken, n: u64) -> ThreadMetricsSnapshot {
        self.metrics.mark_start();
        let mut rng = StdRng::from_entropy();
        for _ in 0..n {
            if cancel.is_cancelled() {
                break;
            }
            let t0 = Instant::now();
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.record(&cancelled_result(t0));
                    break;
                }
                result = self.executor.exec(&mut rng) => {
                    self.record(&result);
                }
            }
            self.pace(t0, &cancel).await;
        }
        self.metrics.mark_stop();
        self.metrics.snapshot()
    }

    fn record(&self, result: &QueryResult) {
        match &result.error {
            Some(error) => self.event_sink.on_query_error(
                &self.scenario_name,
                self.scenario_id,
                self.id,
                &result.query_text,
                result.response_time,
                error,
            ),
            None => self.event_sink.on_query(
                &self.scenario_name,
                self.scenario_id,
                self.id,
                &result.query_text,
                result.response_time,
            ),
        }
        self.metrics.submit(result);
        self.metrics.add_iteration();
    }

    /// Sleeps for `max(0, pacing - elapsed_since_t0)`, cut short by cancellation.
    async fn pace(&self, t0: Instant, cancel: &CancellationToken) {
        if self.pacing.is_zero() {
            return;
        }
        let elapsed = t0.elapsed();
        if elapsed >= self.pacing {
            return;
        }
        let remaining = self.pacing - elapsed;
        tokio::select! {
            _ = tokio::time::sleep(remaining) => {}
            _ = cancel.cancelled() => {}
        }
    }
}

/// Synthesizes the partial `QueryResult` for an iteration cut short by
/// cancellation: no rows, no latency sample, error set to the cancellation
/// cause. Counted toward `queries_total`/`errors_total` but never the digest.
fn cancelled_result(t0: Instant) -> QueryResult {
    QueryResult {
        query_text: String::new(),
        rows_affected: 0,
        response_time: t0.elapsed(),
        error: Some(CANCELLED_ERROR.to_string()),
    }
}
