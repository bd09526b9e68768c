// crates/strand-orchestrator/src/observability/metrics.rs

//! Prometheus metrics for pipelines, steps, providers, and budgets.

use log::debug;
use prometheus::{
    CounterVec, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

struct Collectors {
    registry: Registry,

    pipelines_started: IntCounterVec,
    pipelines_active: IntGaugeVec,
    pipeline_executions: IntCounterVec,
    pipeline_duration_seconds: HistogramVec,
    pipeline_cost_usd: HistogramVec,

    step_executions: IntCounterVec,
    step_duration_seconds: HistogramVec,
    step_skipped: IntCounterVec,
    step_fallbacks: IntCounterVec,
    step_retries: IntCounterVec,

    provider_requests: IntCounterVec,
    provider_latency_seconds: HistogramVec,
    provider_cost_usd: CounterVec,
    tokens_processed: IntCounterVec,
    audio_seconds: CounterVec,

    budget_spend_ratio: GaugeVec,
    budget_exceeded: IntCounterVec,

    compensations: IntCounterVec,
}

impl Collectors {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let pipelines_started = IntCounterVec::new(
            Opts::new("ai_pipelines_started_total", "Pipelines started"),
            &["pipeline"],
        )?;
        let pipelines_active = IntGaugeVec::new(
            Opts::new("ai_pipelines_active", "Pipelines currently executing"),
            &["pipeline"],
        )?;
        let pipeline_executions = IntCounterVec::new(
            Opts::new("ai_pipeline_executions_total", "Completed pipeline executions"),
            &["pipeline", "status"],
        )?;
        let pipeline_duration_seconds = HistogramVec::new(
            HistogramOpts::new("ai_pipeline_duration_seconds", "Pipeline wall time")
                .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
            &["pipeline", "status"],
        )?;
        let pipeline_cost_usd = HistogramVec::new(
            HistogramOpts::new("ai_pipeline_cost_usd", "Pipeline cost in USD")
                .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["pipeline"],
        )?;

        let step_executions = IntCounterVec::new(
            Opts::new("ai_step_executions_total", "Step executions"),
            &["pipeline", "step", "capability", "status"],
        )?;
        let step_duration_seconds = HistogramVec::new(
            HistogramOpts::new("ai_step_duration_seconds", "Step wall time")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
            &["pipeline", "step"],
        )?;
        let step_skipped = IntCounterVec::new(
            Opts::new("ai_step_skipped_total", "Steps skipped by condition"),
            &["pipeline", "step", "reason"],
        )?;
        let step_fallbacks = IntCounterVec::new(
            Opts::new("ai_step_fallbacks_total", "Provider fallbacks per step"),
            &["pipeline", "step", "from_provider", "to_provider"],
        )?;
        let step_retries = IntCounterVec::new(
            Opts::new("ai_step_retries_total", "Retries performed per step"),
            &["pipeline", "step"],
        )?;

        let provider_requests = IntCounterVec::new(
            Opts::new("ai_provider_requests_total", "Provider requests"),
            &["provider", "capability", "status"],
        )?;
        let provider_latency_seconds = HistogramVec::new(
            HistogramOpts::new("ai_provider_latency_seconds", "Provider call latency")
                .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["provider", "capability"],
        )?;
        let provider_cost_usd = CounterVec::new(
            Opts::new("ai_provider_cost_usd_total", "Accumulated provider cost in USD"),
            &["provider", "capability"],
        )?;
        let tokens_processed = IntCounterVec::new(
            Opts::new("ai_tokens_processed_total", "LLM tokens processed"),
            &["provider", "capability", "direction"],
        )?;
        let audio_seconds = CounterVec::new(
            Opts::new("ai_audio_seconds_total", "Audio seconds transcribed"),
            &["provider", "capability"],
        )?;

        let budget_spend_ratio = GaugeVec::new(
            Opts::new("ai_budget_spend_ratio", "Spend as a fraction of the budget limit"),
            &["tenant", "period"],
        )?;
        let budget_exceeded = IntCounterVec::new(
            Opts::new("ai_budget_exceeded_total", "Budget check overruns"),
            &["tenant", "action"],
        )?;

        let compensations = IntCounterVec::new(
            Opts::new("ai_compensations_total", "Saga compensation runs"),
            &["pipeline", "status"],
        )?;

        for collector in [
            Box::new(pipelines_started.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(pipelines_active.clone()),
            Box::new(pipeline_executions.clone()),
            Box::new(pipeline_duration_seconds.clone()),
            Box::new(pipeline_cost_usd.clone()),
            Box::new(step_executions.clone()),
            Box::new(step_duration_seconds.clone()),
            Box::new(step_skipped.clone()),
            Box::new(step_fallbacks.clone()),
            Box::new(step_retries.clone()),
            Box::new(provider_requests.clone()),
            Box::new(provider_latency_seconds.clone()),
            Box::new(provider_cost_usd.clone()),
            Box::new(tokens_processed.clone()),
            Box::new(audio_seconds.clone()),
            Box::new(budget_spend_ratio.clone()),
            Box::new(budget_exceeded.clone()),
            Box::new(compensations.clone()),
        ] {
            registry.register(collector)?;
        }

        Ok(Self {
            registry,
            pipelines_started,
            pipelines_active,
            pipeline_executions,
            pipeline_duration_seconds,
            pipeline_cost_usd,
            step_executions,
            step_duration_seconds,
            step_skipped,
            step_fallbacks,
            step_retries,
            provider_requests,
            provider_latency_seconds,
            provider_cost_usd,
            tokens_processed,
            audio_seconds,
            budget_spend_ratio,
            budget_exceeded,
            compensations,
        })
    }
}

/// AI workflow metrics. Every recording method is a no-op when the
/// metrics are disabled.
pub struct AiMetrics {
    collectors: Option<Collectors>,
}

impl Default for AiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AiMetrics {
    pub fn new() -> Self {
        match Collectors::new() {
            Ok(collectors) => Self {
                collectors: Some(collectors),
            },
            Err(err) => {
                debug!("metrics registration failed, running disabled: {err}");
                Self { collectors: None }
            }
        }
    }

    pub fn disabled() -> Self {
        Self { collectors: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.collectors.is_some()
    }

    /// Gather the current metric families for exposition.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.collectors
            .as_ref()
            .map(|c| c.registry.gather())
            .unwrap_or_default()
    }

    pub fn record_pipeline_started(&self, pipeline: &str) {
        if let Some(c) = &self.collectors {
            c.pipelines_started.with_label_values(&[pipeline]).inc();
            c.pipelines_active.with_label_values(&[pipeline]).inc();
        }
    }

    /// Decrement the in-flight gauge; paired with `record_pipeline_started`.
    pub fn record_pipeline_completed(&self, pipeline: &str) {
        if let Some(c) = &self.collectors {
            c.pipelines_active.with_label_values(&[pipeline]).dec();
        }
    }

    pub fn record_pipeline_execution(
        &self,
        pipeline: &str,
        status: &str,
        duration_seconds: f64,
        total_cost_usd: Decimal,
    ) {
        if let Some(c) = &self.collectors {
            c.pipeline_executions
                .with_label_values(&[pipeline, status])
                .inc();
            c.pipeline_duration_seconds
                .with_label_values(&[pipeline, status])
                .observe(duration_seconds);
            c.pipeline_cost_usd
                .with_label_values(&[pipeline])
                .observe(total_cost_usd.to_f64().unwrap_or(0.0));
        }
    }

    pub fn record_step_execution(
        &self,
        pipeline: &str,
        step: &str,
        capability: &str,
        status: &str,
        duration_seconds: f64,
        retries: u32,
    ) {
        if let Some(c) = &self.collectors {
            c.step_executions
                .with_label_values(&[pipeline, step, capability, status])
                .inc();
            c.step_duration_seconds
                .with_label_values(&[pipeline, step])
                .observe(duration_seconds);
            if retries > 0 {
                c.step_retries
                    .with_label_values(&[pipeline, step])
                    .inc_by(retries as u64);
            }
        }
    }

    pub fn record_step_skipped(&self, pipeline: &str, step: &str, reason: &str) {
        if let Some(c) = &self.collectors {
            c.step_skipped
                .with_label_values(&[pipeline, step, reason])
                .inc();
        }
    }

    pub fn record_step_fallback(
        &self,
        pipeline: &str,
        step: &str,
        from_provider: &str,
        to_provider: &str,
    ) {
        if let Some(c) = &self.collectors {
            c.step_fallbacks
                .with_label_values(&[pipeline, step, from_provider, to_provider])
                .inc();
        }
    }

    pub fn record_provider_request(
        &self,
        provider: &str,
        capability: &str,
        status: &str,
        latency_seconds: f64,
        cost_usd: Decimal,
    ) {
        if let Some(c) = &self.collectors {
            c.provider_requests
                .with_label_values(&[provider, capability, status])
                .inc();
            c.provider_latency_seconds
                .with_label_values(&[provider, capability])
                .observe(latency_seconds);
            let cost = cost_usd.to_f64().unwrap_or(0.0);
            if cost > 0.0 {
                c.provider_cost_usd
                    .with_label_values(&[provider, capability])
                    .inc_by(cost);
            }
        }
    }

    pub fn record_token_usage(
        &self,
        provider: &str,
        capability: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) {
        if let Some(c) = &self.collectors {
            c.tokens_processed
                .with_label_values(&[provider, capability, "input"])
                .inc_by(input_tokens);
            c.tokens_processed
                .with_label_values(&[provider, capability, "output"])
                .inc_by(output_tokens);
        }
    }

    pub fn record_audio_duration(&self, provider: &str, capability: &str, seconds: f64) {
        if let Some(c) = &self.collectors {
            c.audio_seconds
                .with_label_values(&[provider, capability])
                .inc_by(seconds);
        }
    }

    pub fn record_budget_status(
        &self,
        tenant: &str,
        period: &str,
        spend_usd: Decimal,
        limit_usd: Decimal,
    ) {
        if let Some(c) = &self.collectors {
            let ratio = if limit_usd > Decimal::ZERO {
                (spend_usd / limit_usd).to_f64().unwrap_or(0.0)
            } else {
                0.0
            };
            c.budget_spend_ratio
                .with_label_values(&[tenant, period])
                .set(ratio);
        }
    }

    pub fn record_budget_exceeded(&self, tenant: &str, action: &str) {
        if let Some(c) = &self.collectors {
            c.budget_exceeded.with_label_values(&[tenant, action]).inc();
        }
    }

    pub fn record_compensation(&self, pipeline: &str, status: &str) {
        if let Some(c) = &self.collectors {
            c.compensations.with_label_values(&[pipeline, status]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_metrics_are_inert() {
        let metrics = AiMetrics::disabled();
        assert!(!metrics.is_enabled());
        metrics.record_pipeline_started("p");
        metrics.record_budget_exceeded("t", "blocked");
        assert!(metrics.gather().is_empty());
    }

    #[test]
    fn recorded_metrics_appear_in_gather() {
        let metrics = AiMetrics::new();
        assert!(metrics.is_enabled());

        metrics.record_pipeline_started("call_analysis");
        metrics.record_pipeline_execution("call_analysis", "success", 12.5, Decimal::new(15, 2));
        metrics.record_provider_request(
            "deepgram",
            "transcription",
            "success",
            1.2,
            Decimal::new(43, 4),
        );
        metrics.record_pipeline_completed("call_analysis");

        let families = metrics.gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"ai_pipelines_started_total"));
        assert!(names.contains(&"ai_provider_requests_total"));

        let active = families
            .iter()
            .find(|f| f.get_name() == "ai_pipelines_active")
            .unwrap();
        assert_eq!(active.get_metric()[0].get_gauge().get_value(), 0.0);
    }
}
