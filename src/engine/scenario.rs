use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Termination;
use crate::engine::error::EngineError;
use crate::engine::event::EventSink;
use crate::engine::executor::Executor;
use crate::engine::ids::ThreadIdAllocator;
use crate::engine::metrics::{DerivedMetrics, ScenarioMetrics, ThreadMetricsSnapshot};
use crate::engine::thread::Thread;

const MIN_RAMP_TICK: Duration = Duration::from_millis(10);

/// Drives one scenario: ramp-up, duration/iteration termination, and the
/// thread-metrics merge into a scenario-level aggregate.
pub struct ScenarioDriver {
    name: Arc<str>,
    id: u64,
    threads_total: usize,
    termination: Termination,
    ramp_up: Duration,
    pacing: Duration,
    executor: Arc<Executor>,
    event_sink: Arc<dyn EventSink>,
    metrics: ScenarioMetrics,
}

impl ScenarioDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: Arc<str>,
        id: u64,
        threads_total: usize,
        termination: Termination,
        ramp_up: Duration,
        pacing: Duration,
        executor: Arc<Executor>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            name,
            id,
            threads_total,
            termination,
            ramp_up,
            pacing,
            executor,
            event_sink,
            metrics: ScenarioMetrics::new(threads_total),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn close(&self) -> Result<(), EngineError> {
        self.executor.close().await
    }

    /// Runs the scenario to completion under `parent`, then hands itself
    /// back so the caller can read its metrics and call `close()` during
    /// teardown. Returns `EngineError::Cancelled` if no thread was ever
    /// launched because the parent was already cancelled during ramp-up;
    /// otherwise returns the merge result.
    pub async fn run(mut self, parent: CancellationToken, id_alloc: Arc<ThreadIdAllocator>) -> (Self, Result<(), EngineError>) {
        let deadline = parent.child_token();
        let _timer_guard = match self.termination {
            Termination::Duration(d) => Some(spawn_deadline_timer(deadline.clone(), d)),
            Termination::Iterations(_) => None,
        };

        self.metrics.mark_start();

        let shares = match self.termination {
            Termination::Duration(_) => vec![None; self.threads_total],
            Termination::Iterations(total) => distribute_iterations(total, self.threads_total)
                .into_iter()
                .map(Some)
                .collect(),
        };

        let tick = if self.threads_total > 1 && self.ramp_up > Duration::ZERO {
            Some((self.ramp_up / self.threads_total as u32).max(MIN_RAMP_TICK))
        } else {
            None
        };

        let mut joins: JoinSet<ThreadMetricsSnapshot> = JoinSet::new();
        let mut launched = 0usize;
        for share in shares {
            if let Some(tick) = tick {
                tokio::select! {
                    _ = tokio::time::sleep(tick) => {}
                    _ = deadline.cancelled() => {}
                }
            }
            if deadline.is_cancelled() {
                break;
            }

            let thread = Thread::new(
                id_alloc.next(),
                Arc::clone(&self.name),
                self.id,
                Arc::clone(&self.executor),
                self.pacing,
                Arc::clone(&self.event_sink),
            );
            let cancel = deadline.clone();
            match share {
                Some(n) => {
                    joins.spawn(async move { thread.run_on_iterations(cancel, n).await });
                }
                None => {
                    joins.spawn(async move { thread.run_on_duration(cancel).await });
                }
            }
            launched += 1;
        }

        let cancelled_before_launch = launched == 0 && deadline.is_cancelled();

        let mut snapshots = Vec::with_capacity(launched);
        while let Some(result) = joins.join_next().await {
            match result {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    return (self, Err(EngineError::Internal(format!("thread task panicked: {e}"))));
                }
            }
        }

        self.metrics.mark_stop();

        if cancelled_before_launch {
            return (self, Err(EngineError::Cancelled));
        }

        let merge_result = self.metrics.merge_from(&snapshots);
        (self, merge_result)
    }

    pub fn derived(&self) -> DerivedMetrics {
        self.metrics.derived()
    }

    pub fn counters(&self) -> &crate::engine::metrics::MetricCounters {
        &self.metrics.counters
    }

    pub fn threads_total(&self) -> usize {
        self.threads_total
    }
}

/// Spawns the background task that cancels `token` when `duration` elapses,
/// or leaves it alone if the parent cancels first (the token is already
/// cancelled via `child_token` propagation in that case).
fn spawn_deadline_timer(token: CancellationToken, duration: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(duration) => token.cancel(),
            _ = token.cancelled() => {}
        }
    })
}

/// Balanced split: the first `total mod threads` workers get one extra
/// iteration. Equivalent to the ceil-division formula
/// `ceil((total-i)/threads) - ceil((total-i-1)/threads)`.
fn distribute_iterations(total: u64, threads: usize) -> Vec<u64> {
    let threads_u64 = threads as u64;
    let base = total / threads_u64;
    let remainder = total % threads_u64;
    (0..threads)
        .map(|i| if (i as u64) < remainder { base + 1 } else { base })
        .collect()
}
