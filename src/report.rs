use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::config::{DbDriver, RunConfig};
use crate::engine::error::EngineError;

/// One scenario's contribution to the final report (§6.4 payload), already
/// rendered into display-ready strings — durations as `"100ms"`/`"1.234s"`,
/// rates as `"NN.NN%"`.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub threads_total: usize,
    pub iterations_total: u64,
    pub queries_total: u64,
    pub qps: f64,
    pub rows_affected: u64,
    pub errors_total: u64,
    pub success_rate: String,
    pub failed_rate: String,
    pub min: String,
    pub max: String,
    pub p50: String,
    pub p90: String,
    pub p95: String,
    pub p99: String,
    pub top_errors: Vec<(String, u64)>,
}

/// The final payload handed to the report renderer: the validated run
/// configuration echoed back verbatim, the wall-clock test duration, and
/// each scenario's aggregated metrics (§6.4).
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_config: RunConfig,
    pub db_driver: DbDriver,
    #[serde(serialize_with = "serialize_duration")]
    pub test_duration: Duration,
    pub scenarios: Vec<ScenarioReport>,
}

pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format_duration(*duration))
}

impl Report {
    pub fn to_json_pretty(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Internal(format!("report serialization failed: {e}")))
    }

    /// Renders a fixed-width console table, one row per scenario, matching
    /// the fields in the report payload.
    pub fn to_console_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("test duration: {}\n", format_duration(self.test_duration)));
        out.push_str(&format!(
            "{:<16} {:>7} {:>10} {:>10} {:>8} {:>10} {:>8} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}\n",
            "scenario", "threads", "iters", "queries", "qps", "rows", "errors", "success", "min", "p50", "p90", "p95", "max",
        ));
        for s in &self.scenarios {
            out.push_str(&format!(
                "{:<16} {:>7} {:>10} {:>10} {:>8.2} {:>10} {:>8} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}\n",
                s.name,
                s.threads_total,
                s.iterations_total,
                s.queries_total,
                s.qps,
                s.rows_affected,
                s.errors_total,
                s.success_rate,
                s.min,
                s.p50,
                s.p90,
                s.p95,
                s.max,
            ));
            if !s.top_errors.is_empty() {
                let errs: Vec<String> = s.top_errors.iter().map(|(msg, n)| format!("{msg} x{n}")).collect();
                out.push_str(&format!("  top errors: {}\n", errs.join(", ")));
            }
        }
        out
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), EngineError> {
        let json = self.to_json_pretty()?;
        fs::write(path, json).map_err(|e| EngineError::Internal(format!("failed to write report to {path:?}: {e}")))
    }
}

/// `"100ms"` below one second, `"1.234s"` at or above.
pub fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.3}s", d.as_secs_f64())
    }
}

/// `"NN.NN%"`.
pub fn format_rate(rate: f64) -> String {
    format!("{rate:.2}%")
}
