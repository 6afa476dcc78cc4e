use std::collections::HashMap;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::RwLock;

use crate::engine::error::EngineError;
use crate::sql::QueryResult;

/// Compression precision for the latency digest, in significant decimal
/// digits retained per order of magnitude — hdrhistogram's equivalent of the
/// t-digest "compression constant" mentioned in the design.
const DIGEST_SIGFIGS: u8 = 3;
/// Nanosecond latencies up to one hour; generous enough that merges never
/// fail on an out-of-range sample from a legitimately slow query.
const DIGEST_MAX_NANOS: u64 = 3_600_000_000_000;

fn new_digest() -> Histogram<u64> {
    Histogram::new_with_bounds(1, DIGEST_MAX_NANOS, DIGEST_SIGFIGS)
        .expect("static histogram bounds are valid")
}

/// Counters and digest shared by everything in `ThreadMetrics`/`ScenarioMetrics`.
#[derive(Debug, Clone)]
pub struct MetricCounters {
    pub start_time: Option<Instant>,
    pub stop_time: Option<Instant>,
    pub iterations_total: u64,
    pub queries_total: u64,
    pub rows_affected: u64,
    pub errors_total: u64,
    pub err_map: HashMap<String, u64>,
}

impl Default for MetricCounters {
    fn default() -> Self {
        Self {
            start_time: None,
            stop_time: None,
            iterations_total: 0,
            queries_total: 0,
            rows_affected: 0,
            errors_total: 0,
            err_map: HashMap::new(),
        }
    }
}

/// A read-only copy of one thread's metrics, taken after it has joined.
/// Merging requires this happens-before: threads are never read before join.
pub struct ThreadMetricsSnapshot {
    pub counters: MetricCounters,
    pub digest: Histogram<u64>,
}

/// Per-worker metrics, exclusively owned and mutated by its thread. Guarded
/// by a lock per the spec even though only one writer ever exists, so the
/// finalization read path (taken from a different task after join) is sound.
pub struct ThreadMetrics {
    inner: RwLock<ThreadMetricsInner>,
}

struct ThreadMetricsInner {
    counters: MetricCounters,
    digest: Histogram<u64>,
}

impl Default for ThreadMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadMetrics {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ThreadMetricsInner {
                counters: MetricCounters::default(),
                digest: new_digest(),
            }),
        }
    }

    pub fn mark_start(&self) {
        self.inner.write().counters.start_time = Some(Instant::now());
    }

    pub fn mark_stop(&self) {
        self.inner.write().counters.stop_time = Some(Instant::now());
    }

    pub fn add_iteration(&self) {
        self.inner.write().counters.iterations_total += 1;
    }

    /// Records the outcome of one query execution (§4.7 per-thread submit).
    pub fn submit(&self, result: &QueryResult) {
        let mut guard = self.inner.write();
        guard.counters.queries_total += 1;
        guard.counters.rows_affected += result.rows_affected;
        match &result.error {
            Some(message) => {
                guard.counters.errors_total += 1;
                *guard.counters.err_map.entry(message.clone()).or_insert(0) += 1;
            }
            None => {
                let nanos = result.response_time.as_nanos().min(DIGEST_MAX_NANOS as u128) as u64;
                guard
                    .digest
                    .record(nanos.max(1))
                    .expect("sample within configured digest bounds");
            }
        }
    }

    pub fn snapshot(&self) -> ThreadMetricsSnapshot {
        let guard = self.inner.read();
        ThreadMetricsSnapshot {
            counters: guard.counters.clone(),
            digest: guard.digest.clone(),
        }
    }
}

/// Scenario-level aggregate: same shape as `ThreadMetrics` plus `threads_total`.
/// Only ever written during the merge phase; read-only afterwards.
pub struct ScenarioMetrics {
    pub threads_total: usize,
    pub counters: MetricCounters,
    pub digest: Histogram<u64>,
}

impl ScenarioMetrics {
    pub fn new(threads_total: usize) -> Self {
        Self {
            threads_total,
            counters: MetricCounters::default(),
            digest: new_digest(),
        }
    }

    pub fn mark_start(&mut self) {
        self.counters.start_time = Some(Instant::now());
    }

    pub fn mark_stop(&mut self) {
        self.counters.stop_time = Some(Instant::now());
    }

    /// Merges per-thread snapshots into this scenario's aggregate. Associative
    /// and commutative over thread order: counters sum, error maps union by
    /// addition, digests merge via hdrhistogram's `add`.
    pub fn merge_from(&mut self, snapshots: &[ThreadMetricsSnapshot]) -> Result<(), EngineError> {
        for snap in snapshots {
            self.counters.iterations_total += snap.counters.iterations_total;
            self.counters.queries_total += snap.counters.queries_total;
            self.counters.rows_affected += snap.counters.rows_affected;
            self.counters.errors_total += snap.counters.errors_total;
            for (message, count) in &snap.counters.err_map {
                *self.counters.err_map.entry(message.clone()).or_insert(0) += count;
            }
            self.digest
                .add(&snap.digest)
                .map_err(|e| EngineError::Merge(format!("digest merge failed: {e}")))?;
        }
        Ok(())
    }

    pub fn derived(&self) -> DerivedMetrics {
        let wall = match (self.counters.start_time, self.counters.stop_time) {
            (Some(start), Some(stop)) => stop.saturating_duration_since(start),
            _ => Duration::ZERO,
        };

        let qps = if wall > Duration::ZERO {
            self.counters.queries_total as f64 / wall.as_secs_f64()
        } else {
            0.0
        };

        let (success_rate, failed_rate) = if self.counters.queries_total > 0 {
            let failed = 100.0 * (self.counters.errors_total as f64 / self.counters.queries_total as f64);
            (100.0 - failed, failed)
        } else {
            (0.0, 0.0)
        };

        let quantile = |q: f64| Duration::from_nanos(self.digest.value_at_quantile(q));

        DerivedMetrics {
            wall_duration: wall,
            qps,
            success_rate,
            failed_rate,
            min: Duration::from_nanos(self.digest.min()),
            max: Duration::from_nanos(self.digest.max()),
            p50: quantile(0.50),
            p90: quantile(0.90),
            p95: quantile(0.95),
            p99: quantile(0.99),
            top_errors: top_k_errors(&self.counters.err_map, 5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DerivedMetrics {
    pub wall_duration: Duration,
    pub qps: f64,
    pub success_rate: f64,
    pub failed_rate: f64,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub top_errors: Vec<(String, u64)>,
}

/// Descending by count, ties broken by message for determinism.
fn top_k_errors(err_map: &HashMap<String, u64>, k: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = err_map.iter().map(|(m, c)| (m.clone(), *c)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(k);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::QueryResult;

    fn ok_result(nanos: u64) -> QueryResult {
        QueryResult {
            query_text: "SELECT 1".to_string(),
            rows_affected: 1,
            response_time: Duration::from_nanos(nanos),
            error: None,
        }
    }

    fn err_result(message: &str) -> QueryResult {
        QueryResult {
            query_text: "SELECT 1".to_string(),
            rows_affected: 0,
            response_time: Duration::from_nanos(1),
            error: Some(message.to_string()),
        }
    }

    #[test]
    fn submit_tracks_counters_and_digest() {
        let metrics = ThreadMetrics::new();
        metrics.submit(&ok_result(1_000_000));
        metrics.submit(&err_result("EOF"));
        let snap = metrics.snapshot();
        assert_eq!(snap.counters.queries_total, 2);
        assert_eq!(snap.counters.errors_total, 1);
        assert_eq!(snap.counters.rows_affected, 1);
        assert_eq!(*snap.counters.err_map.get("EOF").unwrap(), 1);
    }

    #[test]
    fn merge_sums_counters_and_unions_errors() {
        let t1 = ThreadMetrics::new();
        let t2 = ThreadMetrics::new();
        for _ in 0..3 {
            t1.submit(&ok_result(1_000_000));
        }
        t2.submit(&err_result("EOF"));
        t2.submit(&err_result("EOF"));
        t1.add_iteration();
        t2.add_iteration();

        let mut scenario = ScenarioMetrics::new(2);
        scenario
            .merge_from(&[t1.snapshot(), t2.snapshot()])
            .unwrap();

        assert_eq!(scenario.counters.queries_total, 5);
        assert_eq!(scenario.counters.errors_total, 2);
        assert_eq!(scenario.counters.iterations_total, 2);
        assert_eq!(*scenario.counters.err_map.get("EOF").unwrap(), 2);
    }

    #[test]
    fn merge_is_order_independent() {
        let t1 = ThreadMetrics::new();
        let t2 = ThreadMetrics::new();
        t1.submit(&ok_result(5_000_000));
        t2.submit(&ok_result(10_000_000));

        let mut a = ScenarioMetrics::new(2);
        a.merge_from(&[t1.snapshot(), t2.snapshot()]).unwrap();
        let mut b = ScenarioMetrics::new(2);
        b.merge_from(&[t2.snapshot(), t1.snapshot()]).unwrap();

        assert_eq!(a.counters.queries_total, b.counters.queries_total);
        assert_eq!(a.digest.len(), b.digest.len());
    }

    #[test]
    fn top_k_errors_sorted_descending() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), 1u64);
        map.insert("b".to_string(), 5u64);
        map.insert("c".to_string(), 3u64);
        let top = top_k_errors(&map, 2);
        assert_eq!(top, vec![("b".to_string(), 5), ("c".to_string(), 3)]);
    }

    #[test]
    fn quantiles_are_monotone() {
        let metrics = ThreadMetrics::new();
        for ns in [1_000, 5_000, 9_000, 2_000, 7_000] {
            metrics.submit(&ok_result(ns));
        }
        let mut scenario = ScenarioMetrics::new(1);
        scenario.merge_from(&[metrics.snapshot()]).unwrap();
        let d = scenario.derived();
        assert!(d.min <= d.p50);
        assert!(d.p50 <= d.p90);
        assert!(d.p90 <= d.p95);
        assert!(d.p95 <= d.max);
    }
}
