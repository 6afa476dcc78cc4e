use std::time::Duration;

/// Minimal capability the engine depends on for observability. Extracted so
/// log/progress rendering stays a collaborator, not a dependency of the
/// engine itself (see spec design notes on progress-bar/logging coupling).
pub trait EventSink: Send + Sync {
    fn on_info(&self, message: &str);
    fn on_query(&self, scenario_name: &str, scenario_id: u64, thread_id: u64, query: &str, duration: Duration);
    fn on_query_error(
        &self,
        scenario_name: &str,
        scenario_id: u64,
        thread_id: u64,
        query: &str,
        duration: Duration,
        error: &str,
    );
}

/// Default sink: emits structured `tracing` events, matching the fields in
/// the engine's log-event contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_info(&self, message: &str) {
        tracing::info!(message);
    }

    fn on_query(&self, scenario_name: &str, scenario_id: u64, thread_id: u64, query: &str, duration: Duration) {
        tracing::debug!(
            scenario_name,
            scenario_id,
            thread_id,
            query,
            duration_ms = duration.as_secs_f64() * 1000.0,
            "query completed"
        );
    }

    fn on_query_error(
        &self,
        scenario_name: &str,
        scenario_id: u64,
        thread_id: u64,
        query: &str,
        duration: Duration,
        error: &str,
    ) {
        tracing::warn!(
            scenario_name,
            scenario_id,
            thread_id,
            query,
            duration_ms = duration.as_secs_f64() * 1000.0,
            error,
            "query failed"
        );
    }
}
