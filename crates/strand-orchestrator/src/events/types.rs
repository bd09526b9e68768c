// crates/strand-orchestrator/src/events/types.rs

//! Workflow event taxonomy
//!
//! Every state transition during pipeline execution produces one immutable
//! event. Events serialize to a flat JSON object: base fields (`event_id`,
//! `event_type`, `execution_id`, `timestamp`, `tenant_id`, `metadata`)
//! followed by the variant's specific fields. WebSocket/SSE consumers rely
//! on this exact shape.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Workflow lifecycle
    #[serde(rename = "workflow.started")]
    WorkflowStarted,
    #[serde(rename = "workflow.completed")]
    WorkflowCompleted,
    #[serde(rename = "workflow.failed")]
    WorkflowFailed,
    #[serde(rename = "workflow.cancelled")]
    WorkflowCancelled,

    // Step lifecycle
    #[serde(rename = "step.started")]
    StepStarted,
    #[serde(rename = "step.completed")]
    StepCompleted,
    #[serde(rename = "step.failed")]
    StepFailed,
    #[serde(rename = "step.skipped")]
    StepSkipped,
    #[serde(rename = "step.retrying")]
    StepRetrying,

    // Provider events
    #[serde(rename = "provider.called")]
    ProviderCalled,
    #[serde(rename = "provider.succeeded")]
    ProviderSucceeded,
    #[serde(rename = "provider.failed")]
    ProviderFailed,
    #[serde(rename = "provider.fallback")]
    ProviderFallback,

    // Progress events
    #[serde(rename = "progress.update")]
    ProgressUpdate,
    #[serde(rename = "checkpoint.reached")]
    CheckpointReached,

    // Cost events
    #[serde(rename = "cost.incurred")]
    CostIncurred,
    #[serde(rename = "budget.warning")]
    BudgetWarning,
    #[serde(rename = "budget.exceeded")]
    BudgetExceeded,

    // Compensation events
    #[serde(rename = "compensation.started")]
    CompensationStarted,
    #[serde(rename = "compensation.step")]
    CompensationStep,
    #[serde(rename = "compensation.completed")]
    CompensationCompleted,
    #[serde(rename = "compensation.failed")]
    CompensationFailed,
}

/// Variant-specific event fields, flattened into the serialized event.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    WorkflowStarted {
        pipeline_name: String,
        pipeline_version: String,
        input_keys: Vec<String>,
        estimated_duration_seconds: Option<u64>,
        estimated_cost_usd: Option<Decimal>,
    },
    WorkflowCompleted {
        pipeline_name: String,
        completed_steps: Vec<String>,
        total_duration_ms: f64,
        total_cost_usd: Decimal,
        output_keys: Vec<String>,
    },
    WorkflowFailed {
        pipeline_name: String,
        failed_step: Option<String>,
        error: String,
        completed_steps: Vec<String>,
        total_duration_ms: f64,
        total_cost_usd: Decimal,
        retryable: bool,
    },
    WorkflowCancelled {
        pipeline_name: String,
        reason: String,
    },
    StepStarted {
        step_name: String,
        step_index: usize,
        total_steps: usize,
        capability: String,
        provider_preference: Vec<String>,
    },
    StepCompleted {
        step_name: String,
        provider_used: String,
        fallbacks_attempted: Vec<String>,
        retries: u32,
        duration_ms: f64,
        cost_usd: Decimal,
        output_key: String,
    },
    StepFailed {
        step_name: String,
        error: String,
        error_code: Option<String>,
        fallbacks_attempted: Vec<String>,
        retries: u32,
        duration_ms: f64,
        continue_pipeline: bool,
    },
    StepSkipped {
        step_name: String,
        reason: String,
    },
    StepRetrying {
        step_name: String,
        provider: String,
        attempt: u32,
        error: String,
    },
    ProviderCalled {
        step_name: String,
        provider: String,
        capability: String,
    },
    ProviderSucceeded {
        step_name: String,
        provider: String,
        latency_ms: f64,
        cost_usd: Decimal,
    },
    ProviderFailed {
        step_name: String,
        provider: String,
        error: String,
        error_code: Option<String>,
        retryable: bool,
    },
    ProviderFallback {
        step_name: String,
        failed_provider: String,
        next_provider: String,
        error: String,
    },
    ProgressUpdate {
        percent: f64,
        message: String,
        current_step: Option<String>,
        steps_completed: usize,
        total_steps: usize,
    },
    CheckpointReached {
        checkpoint_name: String,
        step_name: String,
        percent: f64,
        data_snapshot_keys: Vec<String>,
    },
    CostIncurred {
        step_name: String,
        provider: String,
        capability: String,
        cost_usd: Decimal,
    },
    BudgetWarning {
        current_spend_usd: Decimal,
        limit_usd: Decimal,
        percent_used: f64,
        period: String,
    },
    BudgetExceeded {
        budget_limit_usd: Decimal,
        current_spend_usd: Decimal,
        exceeded_by_usd: Decimal,
        action_taken: String,
    },
    CompensationStarted {
        failed_step: String,
        steps_to_compensate: Vec<String>,
        failure_reason: String,
    },
    CompensationStep {
        step_name: String,
        success: bool,
        error: Option<String>,
        duration_ms: f64,
    },
    CompensationCompleted {
        compensated_steps: Vec<String>,
        failed_compensations: Vec<String>,
        full_rollback: bool,
    },
    CompensationFailed {
        step_name: String,
        error: String,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::WorkflowStarted { .. } => EventType::WorkflowStarted,
            EventPayload::WorkflowCompleted { .. } => EventType::WorkflowCompleted,
            EventPayload::WorkflowFailed { .. } => EventType::WorkflowFailed,
            EventPayload::WorkflowCancelled { .. } => EventType::WorkflowCancelled,
            EventPayload::StepStarted { .. } => EventType::StepStarted,
            EventPayload::StepCompleted { .. } => EventType::StepCompleted,
            EventPayload::StepFailed { .. } => EventType::StepFailed,
            EventPayload::StepSkipped { .. } => EventType::StepSkipped,
            EventPayload::StepRetrying { .. } => EventType::StepRetrying,
            EventPayload::ProviderCalled { .. } => EventType::ProviderCalled,
            EventPayload::ProviderSucceeded { .. } => EventType::ProviderSucceeded,
            EventPayload::ProviderFailed { .. } => EventType::ProviderFailed,
            EventPayload::ProviderFallback { .. } => EventType::ProviderFallback,
            EventPayload::ProgressUpdate { .. } => EventType::ProgressUpdate,
            EventPayload::CheckpointReached { .. } => EventType::CheckpointReached,
            EventPayload::CostIncurred { .. } => EventType::CostIncurred,
            EventPayload::BudgetWarning { .. } => EventType::BudgetWarning,
            EventPayload::BudgetExceeded { .. } => EventType::BudgetExceeded,
            EventPayload::CompensationStarted { .. } => EventType::CompensationStarted,
            EventPayload::CompensationStep { .. } => EventType::CompensationStep,
            EventPayload::CompensationCompleted { .. } => EventType::CompensationCompleted,
            EventPayload::CompensationFailed { .. } => EventType::CompensationFailed,
        }
    }
}

/// An immutable record of one workflow state transition.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub execution_id: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: Option<String>,
    pub metadata: HashMap<String, Value>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl WorkflowEvent {
    /// Build an event; the `event_type` discriminant is derived from the
    /// payload so the two can never disagree.
    pub fn new(
        execution_id: impl Into<String>,
        tenant_id: Option<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: payload.event_type(),
            execution_id: execution_id.into(),
            timestamp: Utc::now(),
            tenant_id,
            metadata: HashMap::new(),
            payload,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
