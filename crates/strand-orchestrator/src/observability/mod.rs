// crates/strand-orchestrator/src/observability/mod.rs

//! Metrics, tracing, and structured logging for workflow execution.
//!
//! Each component is a no-op shell when constructed disabled, so callers
//! never branch on whether observability is wired up.

pub mod logging;
pub mod metrics;
pub mod trace;

pub use logging::AiLogger;
pub use metrics::AiMetrics;
pub use trace::{AiTracer, PipelineSpan};
