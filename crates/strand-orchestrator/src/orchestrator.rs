// crates/strand-orchestrator/src/orchestrator.rs

//! Instrumented orchestrator facade
//!
//! The top-level entry point for workflow execution. Owns the registry,
//! the saga coordinator, the budget service, and the observability
//! components, and wires them into a single `execute` call:
//!
//! 1. Pre-flight budget gate (the only entry-point error)
//! 2. Pipeline span
//! 3. Saga execution with full event emission
//! 4. Metric recording for pipeline, steps, providers, and fallbacks
//! 5. Post-flight spend tracking
//!
//! The ancillary read surface (`stream_events`, `get_workflow_state`,
//! `get_progress`, budget queries) backs the host's transport layer.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use strand_engines::registry::CapabilityRegistry;

use crate::budget::{BudgetCheckResult, BudgetPeriod, BudgetService, SpendRecord, SpendSummary};
use crate::error::OrchestratorError;
use crate::events::saga::SagaCoordinator;
use crate::events::store::{EventStore, EventStream, InMemoryEventStore, WorkflowState};
use crate::events::types::EventType;
use crate::observability::{AiLogger, AiMetrics, AiTracer};
use crate::pipeline::executor::ExecutionOptions;
use crate::pipeline::types::{
    ContextData, PipelineDefinition, PipelineResult, StepStatus,
};

/// Options for one orchestrated execution.
#[derive(Clone, Debug, Default)]
pub struct ExecuteOptions {
    pub tenant_id: Option<String>,
    pub api_key_overrides: HashMap<String, String>,
    pub model_overrides: HashMap<String, String>,
    /// Per-execution budget; overruns are warned mid-flight, never
    /// aborted.
    pub budget_limit_usd: Option<Decimal>,
    pub skip_budget_check: bool,
    pub cancellation: Option<CancellationToken>,
}

impl ExecuteOptions {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Default::default()
        }
    }
}

/// Progress projection folded from the event stream.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionProgress {
    pub execution_id: String,
    pub status: String,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub total_steps: Option<usize>,
    pub progress_percent: f64,
    pub current_cost_usd: Decimal,
}

pub struct OrchestratorBuilder {
    registry: Arc<CapabilityRegistry>,
    event_store: Option<Arc<dyn EventStore>>,
    budget: Option<Arc<BudgetService>>,
    api_keys: HashMap<String, String>,
    model_overrides: HashMap<String, String>,
    enable_metrics: bool,
    enable_tracing: bool,
    enable_logging: bool,
    enable_budget: bool,
}

impl OrchestratorBuilder {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            event_store: None,
            budget: None,
            api_keys: HashMap::new(),
            model_overrides: HashMap::new(),
            enable_metrics: true,
            enable_tracing: true,
            enable_logging: true,
            enable_budget: true,
        }
    }

    pub fn event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    pub fn budget_service(mut self, budget: Arc<BudgetService>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn api_keys(mut self, api_keys: HashMap<String, String>) -> Self {
        self.api_keys = api_keys;
        self
    }

    pub fn model_overrides(mut self, model_overrides: HashMap<String, String>) -> Self {
        self.model_overrides = model_overrides;
        self
    }

    pub fn without_metrics(mut self) -> Self {
        self.enable_metrics = false;
        self
    }

    pub fn without_tracing(mut self) -> Self {
        self.enable_tracing = false;
        self
    }

    pub fn without_logging(mut self) -> Self {
        self.enable_logging = false;
        self
    }

    pub fn without_budget_enforcement(mut self) -> Self {
        self.enable_budget = false;
        self
    }

    pub fn build(self) -> InstrumentedOrchestrator {
        let event_store = self
            .event_store
            .unwrap_or_else(|| Arc::new(InMemoryEventStore::default()));
        let saga = SagaCoordinator::new(self.registry.clone(), event_store.clone())
            .with_api_keys(self.api_keys)
            .with_model_overrides(self.model_overrides);
        let budget = if self.enable_budget {
            Some(
                self.budget
                    .unwrap_or_else(|| Arc::new(BudgetService::default())),
            )
        } else {
            None
        };

        InstrumentedOrchestrator {
            registry: self.registry,
            event_store,
            saga,
            budget,
            metrics: Arc::new(if self.enable_metrics {
                AiMetrics::new()
            } else {
                AiMetrics::disabled()
            }),
            tracer: if self.enable_tracing {
                AiTracer::new()
            } else {
                AiTracer::disabled()
            },
            logger: if self.enable_logging {
                AiLogger::new()
            } else {
                AiLogger::disabled()
            },
        }
    }
}

pub struct InstrumentedOrchestrator {
    registry: Arc<CapabilityRegistry>,
    event_store: Arc<dyn EventStore>,
    saga: SagaCoordinator,
    budget: Option<Arc<BudgetService>>,
    metrics: Arc<AiMetrics>,
    tracer: AiTracer,
    logger: AiLogger,
}

impl InstrumentedOrchestrator {
    /// Execute a pipeline with full observability.
    ///
    /// Fails with `OrchestratorError::BudgetExceeded` before any work
    /// when the tenant's budget policy blocks; all downstream failures
    /// come back as `PipelineResult { success: false }`.
    pub async fn execute(
        &self,
        pipeline: &PipelineDefinition,
        input: ContextData,
        options: ExecuteOptions,
    ) -> Result<PipelineResult, OrchestratorError> {
        if let (Some(budget), Some(tenant_id)) = (&self.budget, &options.tenant_id) {
            if !options.skip_budget_check {
                let check = budget
                    .check_budget(tenant_id, pipeline.estimated_cost_usd)
                    .await;
                self.logger.budget_check(
                    tenant_id,
                    action_label(&check),
                    check.current_spend_usd,
                    check.limit_usd,
                    check.percent_used,
                );
                if !check.allowed {
                    self.logger
                        .budget_exceeded(tenant_id, check.period.as_str(), &check.message);
                    self.metrics.record_budget_exceeded(tenant_id, "blocked");
                    return Err(OrchestratorError::BudgetExceeded {
                        tenant_id: tenant_id.clone(),
                        check,
                    });
                }
                if check.action == crate::budget::BudgetAction::Warned {
                    warn!(
                        "budget warning for tenant '{tenant_id}': {}",
                        check.message
                    );
                }
            }
        }

        self.metrics.record_pipeline_started(&pipeline.name);
        self.logger.pipeline_started(
            &pipeline.name,
            "-",
            options.tenant_id.as_deref(),
            pipeline.steps.len(),
            pipeline.estimated_cost_usd,
        );

        let span = self.tracer.pipeline_span(
            &pipeline.name,
            "-",
            options.tenant_id.as_deref(),
        );

        let exec_options = ExecutionOptions {
            tenant_id: options.tenant_id.clone(),
            api_key_overrides: options.api_key_overrides.clone(),
            model_overrides: options.model_overrides.clone(),
            budget_limit_usd: options.budget_limit_usd,
            cancellation: options.cancellation.clone(),
        };
        let result = self.saga.execute(pipeline, input, &exec_options).await;

        if result.success {
            span.record_success(
                result.completed_steps.len(),
                result.total_cost_usd,
                result.total_duration_ms,
            );
            self.logger.pipeline_completed(
                &pipeline.name,
                &result.execution_id,
                result.total_duration_ms,
                result.total_cost_usd,
                result.completed_steps.len(),
            );
        } else {
            span.record_failure(
                result.failed_step.as_deref(),
                result.error.as_deref().unwrap_or("unknown error"),
            );
            self.logger.pipeline_failed(
                &pipeline.name,
                &result.execution_id,
                result.failed_step.as_deref(),
                result.error.as_deref().unwrap_or("unknown error"),
                result.compensation_performed,
            );
        }

        self.record_execution_metrics(pipeline, &result);

        if let (Some(budget), Some(tenant_id)) = (&self.budget, &options.tenant_id) {
            if result.total_cost_usd > Decimal::ZERO {
                budget
                    .track_spend(SpendRecord {
                        tenant_id: tenant_id.clone(),
                        cost_usd: result.total_cost_usd,
                        pipeline_name: Some(pipeline.name.clone()),
                        execution_id: Some(result.execution_id.clone()),
                        provider: None,
                        capability: None,
                        timestamp: chrono::Utc::now(),
                        metadata: HashMap::new(),
                    })
                    .await;
                self.logger.spend_tracked(
                    tenant_id,
                    result.total_cost_usd,
                    &pipeline.name,
                    &result.execution_id,
                );
            }
        }

        // In-flight gauge is decremented on every path.
        self.metrics.record_pipeline_completed(&pipeline.name);

        Ok(result)
    }

    fn record_execution_metrics(&self, pipeline: &PipelineDefinition, result: &PipelineResult) {
        let status = if result.success { "success" } else { "failure" };
        self.metrics.record_pipeline_execution(
            &pipeline.name,
            status,
            result.total_duration_ms / 1000.0,
            result.total_cost_usd,
        );

        for (step_name, step_result) in &result.step_results {
            let capability = pipeline
                .get_step(step_name)
                .map(|s| s.capability.to_string())
                .unwrap_or_else(|| "unknown".to_string());

            match step_result.status {
                StepStatus::Completed | StepStatus::Failed => {
                    let step_status = if step_result.status == StepStatus::Completed {
                        "completed"
                    } else {
                        "failed"
                    };
                    self.metrics.record_step_execution(
                        &pipeline.name,
                        step_name,
                        &capability,
                        step_status,
                        step_result.duration_ms().unwrap_or(0.0) / 1000.0,
                        step_result.retries,
                    );

                    if let (Some(provider), Some(op)) =
                        (&step_result.provider_used, &step_result.operation_result)
                    {
                        self.metrics.record_provider_request(
                            provider,
                            &capability,
                            if op.success { "success" } else { "failure" },
                            op.latency_ms / 1000.0,
                            op.cost_usd,
                        );
                        if op.usage.contains_key("input_tokens")
                            || op.usage.contains_key("output_tokens")
                        {
                            self.metrics.record_token_usage(
                                provider,
                                &capability,
                                op.input_tokens(),
                                op.output_tokens(),
                            );
                        }
                        if let Some(seconds) = op.usage.get("duration_seconds") {
                            self.metrics
                                .record_audio_duration(provider, &capability, *seconds);
                        }
                    }
                }
                StepStatus::Skipped => {
                    self.metrics.record_step_skipped(
                        &pipeline.name,
                        step_name,
                        step_result
                            .skipped_reason
                            .as_deref()
                            .unwrap_or("condition_not_met"),
                    );
                }
                _ => {}
            }

            for (position, from_provider) in step_result.fallbacks_attempted.iter().enumerate() {
                let to_provider = step_result
                    .fallbacks_attempted
                    .get(position + 1)
                    .or(step_result.provider_used.as_ref());
                if let Some(to_provider) = to_provider {
                    self.metrics.record_step_fallback(
                        &pipeline.name,
                        step_name,
                        from_provider,
                        to_provider,
                    );
                }
            }
        }

        if result.compensation_performed {
            let status = if result.compensated_steps.is_empty() {
                "failed"
            } else {
                "success"
            };
            self.metrics.record_compensation(&pipeline.name, status);
        }
    }

    /// Live event stream for a workflow execution.
    pub async fn stream_events(
        &self,
        execution_id: &str,
        event_types: Option<Vec<EventType>>,
    ) -> EventStream {
        self.saga.stream_events(execution_id, event_types).await
    }

    pub async fn get_workflow_state(&self, execution_id: &str) -> Option<WorkflowState> {
        self.event_store.workflow_state(execution_id).await
    }

    /// Reconstruct an execution summary from the folded event state.
    ///
    /// Step outputs are not persisted in events, so `output` and
    /// `step_results` come back empty; callers needing those hold on to
    /// the original `PipelineResult`.
    pub async fn get_execution(&self, execution_id: &str) -> Option<PipelineResult> {
        let state = self.get_workflow_state(execution_id).await?;
        let now = chrono::Utc::now();
        Some(PipelineResult {
            execution_id: state.execution_id.clone(),
            pipeline_name: state
                .pipeline_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            pipeline_version: state
                .pipeline_version
                .clone()
                .unwrap_or_else(|| "1.0.0".to_string()),
            success: state.status == "completed",
            completed_steps: state.completed_steps.clone(),
            failed_step: state.failed_step.clone(),
            error: state.error.clone(),
            output: ContextData::new(),
            step_results: HashMap::new(),
            total_duration_ms: state.total_duration_ms,
            total_cost_usd: state.total_cost_usd,
            started_at: state.started_at.unwrap_or(now),
            completed_at: state.completed_at.unwrap_or(now),
            compensation_performed: state.compensation_performed,
            compensated_steps: state.compensated_steps,
        })
    }

    pub async fn get_progress(&self, execution_id: &str) -> Option<ExecutionProgress> {
        let state = self.get_workflow_state(execution_id).await?;
        Some(ExecutionProgress {
            execution_id: state.execution_id,
            status: state.status,
            current_step: state.current_step,
            completed_steps: state.completed_steps,
            total_steps: state.total_steps,
            progress_percent: state.progress_percent,
            current_cost_usd: state.total_cost_usd,
        })
    }

    pub async fn get_budget_status(&self, tenant_id: &str) -> Option<BudgetCheckResult> {
        match &self.budget {
            Some(budget) => Some(budget.check_budget(tenant_id, None).await),
            None => None,
        }
    }

    pub async fn get_spend_summary(
        &self,
        tenant_id: &str,
        period: BudgetPeriod,
    ) -> Option<SpendSummary> {
        match &self.budget {
            Some(budget) => Some(budget.get_spend_summary(tenant_id, period).await),
            None => None,
        }
    }

    pub fn registry(&self) -> Arc<CapabilityRegistry> {
        self.registry.clone()
    }

    pub fn event_store(&self) -> Arc<dyn EventStore> {
        self.event_store.clone()
    }

    pub fn budget_service(&self) -> Option<Arc<BudgetService>> {
        self.budget.clone()
    }

    pub fn metrics(&self) -> Arc<AiMetrics> {
        self.metrics.clone()
    }
}

fn action_label(check: &BudgetCheckResult) -> &'static str {
    match check.action {
        crate::budget::BudgetAction::Allowed => "allowed",
        crate::budget::BudgetAction::Warned => "warned",
        crate::budget::BudgetAction::Blocked => "blocked",
    }
}
