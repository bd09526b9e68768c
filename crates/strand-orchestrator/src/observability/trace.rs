// crates/strand-orchestrator/src/observability/trace.rs

//! Tracing spans for pipeline execution.

use rust_decimal::Decimal;
use tracing::{info_span, Span};

/// Span factory for pipeline executions; a no-op shell when disabled.
#[derive(Debug, Clone)]
pub struct AiTracer {
    enabled: bool,
}

impl Default for AiTracer {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AiTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Open a span covering one pipeline execution.
    pub fn pipeline_span(
        &self,
        pipeline_name: &str,
        execution_id: &str,
        tenant_id: Option<&str>,
    ) -> PipelineSpan {
        if !self.enabled {
            return PipelineSpan { span: None };
        }
        let span = info_span!(
            "ai.pipeline",
            pipeline = pipeline_name,
            execution_id = execution_id,
            tenant_id = tenant_id.unwrap_or(""),
            otel.status_code = tracing::field::Empty,
        );
        PipelineSpan { span: Some(span) }
    }
}

/// Guard for a pipeline execution span.
pub struct PipelineSpan {
    span: Option<Span>,
}

impl PipelineSpan {
    pub fn record_success(&self, completed_steps: usize, total_cost_usd: Decimal, duration_ms: f64) {
        if let Some(span) = &self.span {
            span.record("otel.status_code", "OK");
            let _guard = span.enter();
            tracing::info!(
                completed_steps,
                cost_usd = %total_cost_usd,
                duration_ms,
                "pipeline succeeded"
            );
        }
    }

    pub fn record_failure(&self, failed_step: Option<&str>, error: &str) {
        if let Some(span) = &self.span {
            span.record("otel.status_code", "ERROR");
            let _guard = span.enter();
            tracing::warn!(
                failed_step = failed_step.unwrap_or(""),
                error,
                "pipeline failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tracer_produces_inert_spans() {
        let tracer = AiTracer::disabled();
        let span = tracer.pipeline_span("p", "exec-1", None);
        // Recording on a disabled span must not panic.
        span.record_success(1, Decimal::ZERO, 0.0);
        span.record_failure(Some("s"), "boom");
    }
}
