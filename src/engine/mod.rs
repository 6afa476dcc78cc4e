pub mod error;
pub mod event;
pub mod executor;
#[cfg(test)]
mod fake_sql;
pub mod generator;
pub mod ids;
pub mod metrics;
pub mod scenario;
pub mod template;
pub mod thread;
pub mod workflow;

#[cfg(test)]
mod e2e_tests;

pub use error::EngineError;
pub use event::{EventSink, TracingEventSink};
pub use workflow::{Workflow, WorkflowOutcome};
