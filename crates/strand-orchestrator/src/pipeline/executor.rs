// crates/strand-orchestrator/src/pipeline/executor.rs

//! Pipeline executor
//!
//! Runs a pipeline definition step by step: condition gate, provider
//! fallback chain from the registry, retry loop with exponential backoff
//! under the step timeout, output storage into the context, and saga
//! compensation of completed steps when a required step fails.
//!
//! The executor is stateless across executions apart from the adapter
//! cache; each execution owns its `PipelineContext`. Event emission is
//! optional: the saga coordinator passes a publisher to get the full
//! event stream, a bare `execute` runs silently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{info, warn};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use strand_core::error::codes;
use strand_core::types::OperationResult;
use strand_core::ProviderAdapter;
use strand_engines::registry::{AdapterConfig, CapabilityRegistry};

use crate::events::store::EventPublisher;
use crate::events::types::EventPayload;

use super::types::{
    ContextData, PipelineContext, PipelineDefinition, PipelineResult, PipelineStep, StepResult,
    StepStatus,
};

/// Per-execution options: tenant attribution, credential and model
/// overrides, an optional per-execution budget (warn-only), and an
/// external cancellation token.
#[derive(Clone, Debug, Default)]
pub struct ExecutionOptions {
    pub tenant_id: Option<String>,
    pub api_key_overrides: HashMap<String, String>,
    pub model_overrides: HashMap<String, String>,
    pub budget_limit_usd: Option<Decimal>,
    pub cancellation: Option<CancellationToken>,
}

impl ExecutionOptions {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Default::default()
        }
    }
}

type AdapterKey = (String, Option<String>, Option<String>);

pub struct PipelineExecutor {
    registry: Arc<CapabilityRegistry>,
    default_api_keys: HashMap<String, String>,
    default_model_overrides: HashMap<String, String>,
    adapter_cache: Mutex<HashMap<AdapterKey, Arc<dyn ProviderAdapter>>>,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            default_api_keys: HashMap::new(),
            default_model_overrides: HashMap::new(),
            adapter_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_api_keys(mut self, api_keys: HashMap<String, String>) -> Self {
        self.default_api_keys = api_keys;
        self
    }

    pub fn with_model_overrides(mut self, model_overrides: HashMap<String, String>) -> Self {
        self.default_model_overrides = model_overrides;
        self
    }

    /// Execute a pipeline without event emission.
    pub async fn execute(
        &self,
        pipeline: &PipelineDefinition,
        input: ContextData,
        options: &ExecutionOptions,
    ) -> PipelineResult {
        let mut context =
            PipelineContext::new(&pipeline.name, options.tenant_id.clone(), input);
        self.run(pipeline, &mut context, options, None).await
    }

    /// Execution loop shared with the saga coordinator, which passes a
    /// publisher to receive the event stream.
    pub(crate) async fn run(
        &self,
        pipeline: &PipelineDefinition,
        context: &mut PipelineContext,
        options: &ExecutionOptions,
        publisher: Option<&EventPublisher>,
    ) -> PipelineResult {
        let total_steps = pipeline.steps.len();
        let total_weight = pipeline.total_progress_weight().max(f64::EPSILON);
        let mut completed_weight = 0.0;
        let mut total_cost = Decimal::ZERO;
        let mut compensation_ran = false;
        let mut budget_warned = false;
        let mut budget_exceeded = false;

        let deadline = Instant::now() + Duration::from_secs(pipeline.timeout_seconds);
        let api_keys = merge(&self.default_api_keys, &options.api_key_overrides);
        let models = merge(&self.default_model_overrides, &options.model_overrides);

        info!(
            "starting pipeline '{}' execution={} steps={}",
            pipeline.name, context.execution_id, total_steps
        );

        for (index, step) in pipeline.steps.iter().enumerate() {
            context.current_step = Some(step.name.clone());

            if options
                .cancellation
                .as_ref()
                .map(|t| t.is_cancelled())
                .unwrap_or(false)
            {
                self.record_interrupt(
                    context,
                    step,
                    "execution cancelled",
                    codes::CANCELLED,
                )
                .await;
                if pipeline.enable_compensation && !compensation_ran {
                    self.run_compensation(pipeline, context, publisher).await;
                    compensation_ran = true;
                }
                return self.finalize(pipeline, context, total_cost, compensation_ran);
            }

            if Instant::now() >= deadline {
                self.record_interrupt(
                    context,
                    step,
                    format!("pipeline timed out after {}s", pipeline.timeout_seconds),
                    codes::TIMEOUT,
                )
                .await;
                if pipeline.enable_compensation && !compensation_ran {
                    self.run_compensation(pipeline, context, publisher).await;
                    compensation_ran = true;
                }
                return self.finalize(pipeline, context, total_cost, compensation_ran);
            }

            if !step.should_execute(&context.data) {
                info!(
                    "skipping step '{}' (condition not met) execution={}",
                    step.name, context.execution_id
                );
                emit(
                    publisher,
                    context,
                    EventPayload::StepSkipped {
                        step_name: step.name.clone(),
                        reason: "Condition not met".to_string(),
                    },
                )
                .await;
                context
                    .step_results
                    .insert(step.name.clone(), StepResult::skipped(&step.name, "Condition not met"));
                continue;
            }

            let percent = completed_weight / total_weight * 100.0;
            context.set_progress(percent);
            emit(
                publisher,
                context,
                EventPayload::ProgressUpdate {
                    percent,
                    message: format!("Running: {}", step.name),
                    current_step: Some(step.name.clone()),
                    steps_completed: context.completed_steps.len(),
                    total_steps,
                },
            )
            .await;

            emit(
                publisher,
                context,
                EventPayload::StepStarted {
                    step_name: step.name.clone(),
                    step_index: index + 1,
                    total_steps,
                    capability: step.capability.to_string(),
                    provider_preference: step.provider_preference.clone(),
                },
            )
            .await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            let step_result = self
                .execute_step(step, context, &api_keys, &models, remaining, options, publisher)
                .await;

            match step_result.status {
                StepStatus::Completed => {
                    context.completed_steps.push(step.name.clone());
                    completed_weight += step.progress_weight;
                    let step_cost = step_result.cost_usd();
                    total_cost += step_cost;

                    if step_cost > Decimal::ZERO {
                        emit(
                            publisher,
                            context,
                            EventPayload::CostIncurred {
                                step_name: step.name.clone(),
                                provider: step_result
                                    .provider_used
                                    .clone()
                                    .unwrap_or_else(|| "unknown".to_string()),
                                capability: step.capability.to_string(),
                                cost_usd: step_cost,
                            },
                        )
                        .await;
                    }

                    // Per-execution budget is warn-only mid-flight; only
                    // the orchestrator's pre-flight check blocks.
                    if let Some(budget) = options.budget_limit_usd {
                        self.check_execution_budget(
                            context,
                            budget,
                            total_cost,
                            &mut budget_warned,
                            &mut budget_exceeded,
                            publisher,
                        )
                        .await;
                    }

                    if let Some(op) = &step_result.operation_result {
                        if let Some(data) = &op.data {
                            let output = match &step.output_transform {
                                Some(transform) => transform(data.clone()),
                                None => data.clone(),
                            };
                            context.data.insert(step.output_key().to_string(), output);
                        }
                    }

                    emit(
                        publisher,
                        context,
                        EventPayload::StepCompleted {
                            step_name: step.name.clone(),
                            provider_used: step_result
                                .provider_used
                                .clone()
                                .unwrap_or_else(|| "unknown".to_string()),
                            fallbacks_attempted: step_result.fallbacks_attempted.clone(),
                            retries: step_result.retries,
                            duration_ms: step_result.duration_ms().unwrap_or(0.0),
                            cost_usd: step_cost,
                            output_key: step.output_key().to_string(),
                        },
                    )
                    .await;

                    if pipeline.progress_checkpoints.contains(&step.name) {
                        let percent = completed_weight / total_weight * 100.0;
                        emit(
                            publisher,
                            context,
                            EventPayload::CheckpointReached {
                                checkpoint_name: step.name.clone(),
                                step_name: step.name.clone(),
                                percent,
                                data_snapshot_keys: context.data.keys().cloned().collect(),
                            },
                        )
                        .await;
                    }

                    context.step_results.insert(step.name.clone(), step_result);
                }

                StepStatus::Failed => {
                    let continue_pipeline = step.continue_on_failure || !step.required;
                    emit(
                        publisher,
                        context,
                        EventPayload::StepFailed {
                            step_name: step.name.clone(),
                            error: step_result
                                .error
                                .clone()
                                .unwrap_or_else(|| "unknown error".to_string()),
                            error_code: step_result.error_code.clone(),
                            fallbacks_attempted: step_result.fallbacks_attempted.clone(),
                            retries: step_result.retries,
                            duration_ms: step_result.duration_ms().unwrap_or(0.0),
                            continue_pipeline,
                        },
                    )
                    .await;

                    if continue_pipeline {
                        warn!(
                            "step '{}' failed but pipeline continues execution={}",
                            step.name, context.execution_id
                        );
                        completed_weight += step.progress_weight;
                        context.step_results.insert(step.name.clone(), step_result);
                        continue;
                    }

                    context.failed_step = Some(step.name.clone());
                    context.failure_error = step_result.error.clone();
                    let cancelled =
                        step_result.error_code.as_deref() == Some(codes::CANCELLED);
                    context.step_results.insert(step.name.clone(), step_result);

                    if pipeline.enable_compensation && !compensation_ran {
                        self.run_compensation(pipeline, context, publisher).await;
                        compensation_ran = true;
                    }

                    if pipeline.fail_fast || cancelled {
                        return self.finalize(pipeline, context, total_cost, compensation_ran);
                    }
                }

                _ => {
                    context.step_results.insert(step.name.clone(), step_result);
                }
            }
        }

        if context.failed_step.is_none() {
            context.set_progress(100.0);
            emit(
                publisher,
                context,
                EventPayload::ProgressUpdate {
                    percent: 100.0,
                    message: "Complete".to_string(),
                    current_step: None,
                    steps_completed: context.completed_steps.len(),
                    total_steps,
                },
            )
            .await;
        }

        self.finalize(pipeline, context, total_cost, compensation_ran)
    }

    /// Execute one step: build the fallback chain, then try each provider
    /// with the step's retry policy until one succeeds.
    async fn execute_step(
        &self,
        step: &PipelineStep,
        context: &PipelineContext,
        api_keys: &HashMap<String, String>,
        models: &HashMap<String, String>,
        remaining: Duration,
        options: &ExecutionOptions,
        publisher: Option<&EventPublisher>,
    ) -> StepResult {
        let started_at = Utc::now();
        let chain = self.build_fallback_chain(step);

        if chain.is_empty() {
            return StepResult {
                step_name: step.name.clone(),
                status: StepStatus::Failed,
                operation_result: None,
                provider_used: None,
                fallbacks_attempted: Vec::new(),
                retries: 0,
                started_at: Some(started_at),
                completed_at: Some(Utc::now()),
                error: Some(format!(
                    "no providers available for capability: {}",
                    step.capability
                )),
                error_code: Some(codes::NO_PROVIDERS.to_string()),
                skipped_reason: None,
            };
        }

        let input = step.input_for(&context.data);
        let deadline = Instant::now() + remaining;
        let mut fallbacks_attempted: Vec<String> = Vec::new();
        let mut last_error: Option<String> = None;
        let mut last_error_code: Option<String> = None;
        let mut last_retries = 0;

        for (position, provider_name) in chain.iter().enumerate() {
            let adapter = match self.adapter_for(
                provider_name,
                api_keys.get(provider_name),
                models.get(provider_name),
            ) {
                Ok(adapter) => adapter,
                Err(err) => {
                    warn!(
                        "adapter creation failed for '{provider_name}': {err} execution={}",
                        context.execution_id
                    );
                    fallbacks_attempted.push(provider_name.clone());
                    last_error = Some(err.to_string());
                    last_error_code = Some(codes::EXCEPTION.to_string());
                    self.emit_fallback(
                        publisher,
                        context,
                        step,
                        &chain,
                        position,
                        &err.to_string(),
                    )
                    .await;
                    continue;
                }
            };

            let (result, retries) = self
                .execute_with_retry(
                    adapter.as_ref(),
                    step,
                    input.clone(),
                    deadline,
                    options.cancellation.as_ref(),
                    context,
                    publisher,
                )
                .await;
            last_retries = retries;

            if result.success {
                return StepResult {
                    step_name: step.name.clone(),
                    status: StepStatus::Completed,
                    provider_used: Some(provider_name.clone()),
                    operation_result: Some(result),
                    fallbacks_attempted,
                    retries,
                    started_at: Some(started_at),
                    completed_at: Some(Utc::now()),
                    error: None,
                    error_code: None,
                    skipped_reason: None,
                };
            }

            warn!(
                "provider '{provider_name}' failed for step '{}': {} execution={}",
                step.name,
                result.error.as_deref().unwrap_or("unknown"),
                context.execution_id
            );
            fallbacks_attempted.push(provider_name.clone());
            last_error = result.error.clone();
            last_error_code = result.error_code.clone();

            // Cancellation is final; don't burn through the rest of the
            // chain.
            if last_error_code.as_deref() == Some(codes::CANCELLED)
                || Instant::now() >= deadline
            {
                break;
            }

            self.emit_fallback(
                publisher,
                context,
                step,
                &chain,
                position,
                last_error.as_deref().unwrap_or("unknown error"),
            )
            .await;
        }

        StepResult {
            step_name: step.name.clone(),
            status: StepStatus::Failed,
            operation_result: None,
            provider_used: None,
            fallbacks_attempted,
            retries: last_retries,
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            error: Some(last_error.unwrap_or_else(|| "all providers failed".to_string())),
            error_code: last_error_code,
            skipped_reason: None,
        }
    }

    /// Retry loop for one provider. Returns the final result and the
    /// number of retries performed (attempts minus one).
    #[allow(clippy::too_many_arguments)]
    async fn execute_with_retry(
        &self,
        adapter: &dyn ProviderAdapter,
        step: &PipelineStep,
        input: Value,
        deadline: Instant,
        cancellation: Option<&CancellationToken>,
        context: &PipelineContext,
        publisher: Option<&EventPublisher>,
    ) -> (OperationResult, u32) {
        let policy = &step.retry_policy;
        let provider = adapter.provider_name();
        let max_attempts = policy.max_attempts.max(1);
        let mut last: Option<OperationResult> = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            let step_timeout = Duration::from_secs(step.timeout_seconds);
            let budget = step_timeout.min(deadline.saturating_duration_since(Instant::now()));

            let call = adapter.execute(step.capability, input.clone(), &step.options);
            let result = if let Some(token) = cancellation {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => OperationResult::failure(
                        &provider,
                        step.capability,
                        "execution cancelled",
                        Some(codes::CANCELLED),
                        false,
                    ),
                    outcome = tokio::time::timeout(budget, call) => match outcome {
                        Ok(result) => result,
                        Err(_) => timeout_result(&provider, step),
                    },
                }
            } else {
                match tokio::time::timeout(budget, call).await {
                    Ok(result) => result,
                    Err(_) => timeout_result(&provider, step),
                }
            };

            let stop = result.success
                || !result.retryable
                || !code_is_retryable(policy.retryable_errors.as_deref(), &result.error_code);
            let error = result.error.clone();
            last = Some(result);
            if stop {
                break;
            }

            if attempt < max_attempts {
                emit(
                    publisher,
                    context,
                    EventPayload::StepRetrying {
                        step_name: step.name.clone(),
                        provider: provider.clone(),
                        attempt,
                        error: error.unwrap_or_else(|| "unknown error".to_string()),
                    },
                )
                .await;
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
        }

        let result = last.unwrap_or_else(|| {
            OperationResult::failure(
                &provider,
                step.capability,
                "max retries exceeded",
                Some(codes::MAX_RETRIES),
                false,
            )
        });
        (result, attempts.saturating_sub(1))
    }

    /// Provider order for a step: the registry chain, or just the first
    /// preference when fallback is disabled.
    fn build_fallback_chain(&self, step: &PipelineStep) -> Vec<String> {
        if !step.fallback_config.enabled {
            if let Some(primary) = step.provider_preference.first() {
                return vec![primary.clone()];
            }
            return self
                .registry
                .get_providers_for_capability(
                    step.capability,
                    step.required_quality_tier,
                    &[],
                    true,
                )
                .first()
                .map(|reg| vec![reg.provider_name.clone()])
                .unwrap_or_default();
        }

        self.registry.build_fallback_chain(
            step.capability,
            step.provider_preference.first().map(String::as_str),
            step.fallback_config.max_fallbacks,
            &step.fallback_config.excluded_providers,
            step.fallback_config.prefer_same_quality,
        )
    }

    /// Get or create an adapter, cached by (provider, api key, model).
    fn adapter_for(
        &self,
        provider_name: &str,
        api_key: Option<&String>,
        model_name: Option<&String>,
    ) -> anyhow::Result<Arc<dyn ProviderAdapter>> {
        let key: AdapterKey = (
            provider_name.to_string(),
            api_key.cloned(),
            model_name.cloned(),
        );

        {
            let cache = self.adapter_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(adapter) = cache.get(&key) {
                return Ok(adapter.clone());
            }
        }

        let config = AdapterConfig {
            api_key: api_key.cloned(),
            model_name: model_name.cloned(),
            ..Default::default()
        };
        let adapter = self.registry.create_adapter(provider_name, &config)?;

        let mut cache = self.adapter_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, adapter.clone());
        Ok(adapter)
    }

    /// Saga unwind: compensate completed steps in reverse order, bounded
    /// by per-action timeouts and the pipeline's overall compensation
    /// deadline.
    async fn run_compensation(
        &self,
        pipeline: &PipelineDefinition,
        context: &mut PipelineContext,
        publisher: Option<&EventPublisher>,
    ) {
        let steps_to_compensate: Vec<String> =
            context.completed_steps.iter().rev().cloned().collect();

        info!(
            "starting compensation for pipeline '{}' execution={} steps={:?}",
            pipeline.name, context.execution_id, steps_to_compensate
        );

        emit(
            publisher,
            context,
            EventPayload::CompensationStarted {
                failed_step: context
                    .failed_step
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                steps_to_compensate: steps_to_compensate.clone(),
                failure_reason: context
                    .failure_error
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            },
        )
        .await;

        let overall_deadline =
            Instant::now() + Duration::from_secs(pipeline.compensation_timeout_seconds);
        let mut compensated: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        for step_name in &steps_to_compensate {
            let Some(step) = pipeline.get_step(step_name) else {
                continue;
            };
            let Some(action) = &step.compensation else {
                continue;
            };

            let remaining = overall_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                failed.push(step_name.clone());
                let error = format!("compensation deadline exceeded before '{step_name}'");
                context.compensation_errors.push(error.clone());
                emit(
                    publisher,
                    context,
                    EventPayload::CompensationStep {
                        step_name: step_name.clone(),
                        success: false,
                        error: Some(error),
                        duration_ms: 0.0,
                    },
                )
                .await;
                continue;
            }

            let budget = remaining.min(Duration::from_secs(action.timeout_seconds));
            let started = Instant::now();
            let outcome =
                tokio::time::timeout(budget, action.execute(context.data.clone())).await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            let error = match outcome {
                Ok(true) => {
                    compensated.push(step_name.clone());
                    info!(
                        "compensation succeeded: {step_name} execution={}",
                        context.execution_id
                    );
                    None
                }
                Ok(false) => Some(format!("compensation handler reported failure: {step_name}")),
                Err(_) => Some(format!(
                    "compensation timed out after {}s: {step_name}",
                    action.timeout_seconds
                )),
            };

            if let Some(error) = &error {
                failed.push(step_name.clone());
                context.compensation_errors.push(error.clone());
                warn!("{error} execution={}", context.execution_id);
            }

            emit(
                publisher,
                context,
                EventPayload::CompensationStep {
                    step_name: step_name.clone(),
                    success: error.is_none(),
                    error,
                    duration_ms,
                },
            )
            .await;
        }

        context.compensated_steps = compensated.clone();

        emit(
            publisher,
            context,
            EventPayload::CompensationCompleted {
                compensated_steps: compensated,
                failed_compensations: failed.clone(),
                full_rollback: failed.is_empty(),
            },
        )
        .await;
    }

    async fn check_execution_budget(
        &self,
        context: &PipelineContext,
        budget: Decimal,
        total_cost: Decimal,
        budget_warned: &mut bool,
        budget_exceeded: &mut bool,
        publisher: Option<&EventPublisher>,
    ) {
        if total_cost > budget && !*budget_exceeded {
            *budget_exceeded = true;
            warn!(
                "execution budget exceeded: spent {total_cost} of {budget} execution={}",
                context.execution_id
            );
            emit(
                publisher,
                context,
                EventPayload::BudgetExceeded {
                    budget_limit_usd: budget,
                    current_spend_usd: total_cost,
                    exceeded_by_usd: total_cost - budget,
                    action_taken: "warned".to_string(),
                },
            )
            .await;
        } else if !*budget_warned && budget > Decimal::ZERO {
            let ratio = total_cost / budget * Decimal::from(100);
            if ratio >= Decimal::from(80) {
                *budget_warned = true;
                emit(
                    publisher,
                    context,
                    EventPayload::BudgetWarning {
                        current_spend_usd: total_cost,
                        limit_usd: budget,
                        percent_used: ratio.to_f64().unwrap_or(0.0),
                        period: "execution".to_string(),
                    },
                )
                .await;
            }
        }
    }

    /// Record a failure for a step that never ran (cancellation or
    /// pipeline timeout caught between steps).
    async fn record_interrupt(
        &self,
        context: &mut PipelineContext,
        step: &PipelineStep,
        error: impl Into<String>,
        error_code: &str,
    ) {
        let error = error.into();
        warn!(
            "pipeline interrupted at step '{}': {error} execution={}",
            step.name, context.execution_id
        );
        let now = Utc::now();
        context.failed_step = Some(step.name.clone());
        context.failure_error = Some(error.clone());
        context.step_results.insert(
            step.name.clone(),
            StepResult {
                step_name: step.name.clone(),
                status: StepStatus::Failed,
                operation_result: None,
                provider_used: None,
                fallbacks_attempted: Vec::new(),
                retries: 0,
                started_at: Some(now),
                completed_at: Some(now),
                error: Some(error),
                error_code: Some(error_code.to_string()),
                skipped_reason: None,
            },
        );
    }

    async fn emit_fallback(
        &self,
        publisher: Option<&EventPublisher>,
        context: &PipelineContext,
        step: &PipelineStep,
        chain: &[String],
        failed_position: usize,
        error: &str,
    ) {
        if let Some(next_provider) = chain.get(failed_position + 1) {
            emit(
                publisher,
                context,
                EventPayload::ProviderFallback {
                    step_name: step.name.clone(),
                    failed_provider: chain[failed_position].clone(),
                    next_provider: next_provider.clone(),
                    error: error.to_string(),
                },
            )
            .await;
        }
    }

    fn finalize(
        &self,
        pipeline: &PipelineDefinition,
        context: &PipelineContext,
        total_cost: Decimal,
        compensation_ran: bool,
    ) -> PipelineResult {
        let completed_at = Utc::now();
        let success = context.failed_step.is_none();

        info!(
            "pipeline '{}' finished execution={} success={} cost={}",
            pipeline.name, context.execution_id, success, total_cost
        );

        PipelineResult {
            execution_id: context.execution_id.clone(),
            pipeline_name: pipeline.name.clone(),
            pipeline_version: pipeline.version.clone(),
            success,
            completed_steps: context.completed_steps.clone(),
            failed_step: context.failed_step.clone(),
            error: context.failure_error.clone(),
            output: context.data.clone(),
            step_results: context.step_results.clone(),
            total_duration_ms: (completed_at - context.started_at)
                .num_microseconds()
                .unwrap_or(0) as f64
                / 1000.0,
            total_cost_usd: total_cost,
            started_at: context.started_at,
            completed_at,
            compensation_performed: compensation_ran,
            compensated_steps: context.compensated_steps.clone(),
        }
    }
}

async fn emit(
    publisher: Option<&EventPublisher>,
    context: &PipelineContext,
    payload: EventPayload,
) {
    if let Some(publisher) = publisher {
        publisher
            .emit(&context.execution_id, &context.tenant_id, payload)
            .await;
    }
}

fn timeout_result(provider: &str, step: &PipelineStep) -> OperationResult {
    OperationResult::failure(
        provider,
        step.capability,
        format!("timeout after {}s", step.timeout_seconds),
        Some(codes::TIMEOUT),
        true,
    )
}

/// A `None` allow-list retries everything the provider marked retryable;
/// otherwise only listed codes are retried.
fn code_is_retryable(allow_list: Option<&[String]>, error_code: &Option<String>) -> bool {
    match (allow_list, error_code) {
        (None, _) => true,
        (Some(allowed), Some(code)) => allowed.iter().any(|c| c == code),
        (Some(_), None) => false,
    }
}

fn merge(
    defaults: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = defaults.clone();
    merged.extend(overrides.clone());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_code_allow_list() {
        assert!(code_is_retryable(None, &Some("TIMEOUT".to_string())));
        assert!(code_is_retryable(None, &None));

        let allow = vec!["TIMEOUT".to_string(), "RATE_LIMIT".to_string()];
        assert!(code_is_retryable(Some(&allow), &Some("TIMEOUT".to_string())));
        assert!(!code_is_retryable(Some(&allow), &Some("EXCEPTION".to_string())));
        assert!(!code_is_retryable(Some(&allow), &None));
    }

    #[test]
    fn overrides_win_on_merge() {
        let mut defaults = HashMap::new();
        defaults.insert("openai".to_string(), "sk-default".to_string());
        defaults.insert("deepgram".to_string(), "dg-default".to_string());
        let mut overrides = HashMap::new();
        overrides.insert("openai".to_string(), "sk-tenant".to_string());

        let merged = merge(&defaults, &overrides);
        assert_eq!(merged["openai"], "sk-tenant");
        assert_eq!(merged["deepgram"], "dg-default");
    }
}
