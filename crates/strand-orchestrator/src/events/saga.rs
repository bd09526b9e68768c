// crates/strand-orchestrator/src/events/saga.rs

//! Saga coordinator
//!
//! Wraps the pipeline executor with full event emission: a workflow
//! lifecycle event on entry and exit, and the step/progress/cost/
//! compensation stream produced while the executor runs. On failure of a
//! required step, completed steps are compensated in reverse order and
//! every compensation outcome is recorded as an event.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;

use strand_core::error::codes;
use strand_engines::registry::CapabilityRegistry;

use crate::pipeline::executor::{ExecutionOptions, PipelineExecutor};
use crate::pipeline::types::{ContextData, PipelineContext, PipelineDefinition, PipelineResult};

use super::store::{EventFilter, EventPublisher, EventStore, EventStream, WorkflowState};
use super::types::{EventPayload, EventType};

pub struct SagaCoordinator {
    executor: PipelineExecutor,
    event_store: Arc<dyn EventStore>,
    publisher: EventPublisher,
}

impl SagaCoordinator {
    pub fn new(registry: Arc<CapabilityRegistry>, event_store: Arc<dyn EventStore>) -> Self {
        let publisher = EventPublisher::new(event_store.clone());
        Self {
            executor: PipelineExecutor::new(registry),
            event_store,
            publisher,
        }
    }

    pub fn with_api_keys(mut self, api_keys: HashMap<String, String>) -> Self {
        self.executor = self.executor.with_api_keys(api_keys);
        self
    }

    pub fn with_model_overrides(mut self, model_overrides: HashMap<String, String>) -> Self {
        self.executor = self.executor.with_model_overrides(model_overrides);
        self
    }

    /// Execute a pipeline with full event tracking.
    pub async fn execute(
        &self,
        pipeline: &PipelineDefinition,
        input: ContextData,
        options: &ExecutionOptions,
    ) -> PipelineResult {
        let mut context =
            PipelineContext::new(&pipeline.name, options.tenant_id.clone(), input);

        info!(
            "saga starting: {} execution={} tenant={:?}",
            pipeline.name, context.execution_id, context.tenant_id
        );

        self.publisher
            .emit(
                &context.execution_id,
                &context.tenant_id,
                EventPayload::WorkflowStarted {
                    pipeline_name: pipeline.name.clone(),
                    pipeline_version: pipeline.version.clone(),
                    input_keys: context.data.keys().cloned().collect(),
                    estimated_duration_seconds: pipeline.estimated_duration_seconds,
                    estimated_cost_usd: pipeline.estimated_cost_usd,
                },
            )
            .await;

        let result = self
            .executor
            .run(pipeline, &mut context, options, Some(&self.publisher))
            .await;

        let terminal = if result.success {
            EventPayload::WorkflowCompleted {
                pipeline_name: pipeline.name.clone(),
                completed_steps: result.completed_steps.clone(),
                total_duration_ms: result.total_duration_ms,
                total_cost_usd: result.total_cost_usd,
                output_keys: result.output.keys().cloned().collect(),
            }
        } else if was_cancelled(&result) {
            EventPayload::WorkflowCancelled {
                pipeline_name: pipeline.name.clone(),
                reason: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "execution cancelled".to_string()),
            }
        } else {
            EventPayload::WorkflowFailed {
                pipeline_name: pipeline.name.clone(),
                failed_step: result.failed_step.clone(),
                error: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
                completed_steps: result.completed_steps.clone(),
                total_duration_ms: result.total_duration_ms,
                total_cost_usd: result.total_cost_usd,
                retryable: is_retryable(&result),
            }
        };
        self.publisher
            .emit(&result.execution_id, &options.tenant_id, terminal)
            .await;

        result
    }

    /// Live event stream for an execution.
    pub async fn stream_events(
        &self,
        execution_id: &str,
        event_types: Option<Vec<EventType>>,
    ) -> EventStream {
        let mut filter = EventFilter::for_execution(execution_id);
        filter.event_types = event_types;
        self.event_store.subscribe(filter).await
    }

    pub async fn workflow_state(&self, execution_id: &str) -> Option<WorkflowState> {
        self.event_store.workflow_state(execution_id).await
    }

    pub fn event_store(&self) -> Arc<dyn EventStore> {
        self.event_store.clone()
    }
}

fn was_cancelled(result: &PipelineResult) -> bool {
    result
        .failed_step
        .as_ref()
        .and_then(|step| result.step_results.get(step))
        .map(|sr| sr.error_code.as_deref() == Some(codes::CANCELLED))
        .unwrap_or(false)
}

/// A failed workflow is retryable when its failing operation was.
fn is_retryable(result: &PipelineResult) -> bool {
    result
        .failed_step
        .as_ref()
        .and_then(|step| result.step_results.get(step))
        .and_then(|sr| sr.operation_result.as_ref())
        .map(|op| op.retryable)
        .unwrap_or(false)
}
