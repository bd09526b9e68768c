// crates/strand-orchestrator/src/pipeline/types.rs

//! Pipeline value types
//!
//! Definitions are immutable and reusable; each execution gets its own
//! mutable `PipelineContext` that carries data between steps and is frozen
//! into a `PipelineResult` on return. Steps can declare compensation
//! actions that the saga coordinator runs in reverse order on failure.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use strand_core::types::{Capability, OperationResult, QualityTier};

/// Workflow-local data carried between steps.
pub type ContextData = HashMap<String, Value>;

/// Transform applied to the context to produce a step's input.
pub type InputTransform = Arc<dyn Fn(&ContextData) -> Value + Send + Sync>;

/// Transform applied to a step's output before it is stored.
pub type OutputTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Compensating,
    Compensated,
}

/// Operators for path-based step conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Exists,
    NotExists,
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

/// Condition gating step execution.
///
/// Either a path predicate evaluated against the context via dot
/// navigation, or an arbitrary closure over the context.
#[derive(Clone)]
pub enum StepCondition {
    Path {
        context_path: String,
        operator: ConditionOperator,
        value: Option<Value>,
    },
    Func(Arc<dyn Fn(&ContextData) -> bool + Send + Sync>),
}

impl fmt::Debug for StepCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepCondition::Path {
                context_path,
                operator,
                value,
            } => f
                .debug_struct("StepCondition::Path")
                .field("context_path", context_path)
                .field("operator", operator)
                .field("value", value)
                .finish(),
            StepCondition::Func(_) => f.write_str("StepCondition::Func(..)"),
        }
    }
}

impl StepCondition {
    pub fn exists(context_path: impl Into<String>) -> Self {
        StepCondition::Path {
            context_path: context_path.into(),
            operator: ConditionOperator::Exists,
            value: None,
        }
    }

    pub fn equals(context_path: impl Into<String>, value: impl Into<Value>) -> Self {
        StepCondition::Path {
            context_path: context_path.into(),
            operator: ConditionOperator::Equals,
            value: Some(value.into()),
        }
    }

    pub fn func<F>(condition: F) -> Self
    where
        F: Fn(&ContextData) -> bool + Send + Sync + 'static,
    {
        StepCondition::Func(Arc::new(condition))
    }

    pub fn evaluate(&self, data: &ContextData) -> bool {
        match self {
            StepCondition::Func(condition) => condition(data),
            StepCondition::Path {
                context_path,
                operator,
                value,
            } => {
                let current = navigate(data, context_path);
                match operator {
                    ConditionOperator::Exists => current.is_some(),
                    ConditionOperator::NotExists => current.is_none(),
                    ConditionOperator::Equals => {
                        matches!((&current, value), (Some(c), Some(v)) if c == v)
                    }
                    ConditionOperator::NotEquals => match (&current, value) {
                        (Some(c), Some(v)) => c != v,
                        _ => true,
                    },
                    ConditionOperator::Contains => match (&current, value) {
                        (Some(c), Some(v)) => contains(c, v),
                        _ => false,
                    },
                    ConditionOperator::GreaterThan => compare(&current, value)
                        .map(|o| o == std::cmp::Ordering::Greater)
                        .unwrap_or(false),
                    ConditionOperator::LessThan => compare(&current, value)
                        .map(|o| o == std::cmp::Ordering::Less)
                        .unwrap_or(false),
                }
            }
        }
    }
}

/// Walk a dot-separated path through the context, `None` on any missing
/// segment.
fn navigate(data: &ContextData, path: &str) -> Option<Value> {
    let mut parts = path.split('.');
    let mut current = data.get(parts.next()?)?.clone();
    for part in parts {
        current = current.get(part)?.clone();
    }
    Some(current)
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::Array(items) => items.contains(needle),
        Value::Object(map) => needle.as_str().map(|n| map.contains_key(n)).unwrap_or(false),
        _ => false,
    }
}

fn compare(current: &Option<Value>, value: &Option<Value>) -> Option<std::cmp::Ordering> {
    let (current, value) = (current.as_ref()?, value.as_ref()?);
    if let (Some(a), Some(b)) = (current.as_f64(), value.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (current.as_str(), value.as_str()) {
        return Some(a.cmp(b));
    }
    None
}

/// Retry policy for a pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub exponential_backoff: bool,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Allow-list of retryable error codes. `None` retries every error
    /// the provider marks retryable.
    pub retryable_errors: Option<Vec<String>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            exponential_backoff: true,
            backoff_multiplier: 2.0,
            max_delay_ms: 30000,
            retryable_errors: None,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before the retry following `attempt` (1-indexed).
    ///
    /// `min(initial_delay * multiplier^(attempt - 1), max_delay)` with
    /// exponential backoff, else a flat `initial_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = if self.exponential_backoff {
            let factor = self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);
            (self.initial_delay_ms as f64 * factor) as u64
        } else {
            self.initial_delay_ms
        };
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Fallback behavior when a step's provider fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub max_fallbacks: usize,
    pub prefer_same_quality: bool,
    /// Allow a lower quality tier when falling back.
    pub fallback_quality_degradation: bool,
    pub excluded_providers: Vec<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_fallbacks: 3,
            prefer_same_quality: true,
            fallback_quality_degradation: true,
            excluded_providers: Vec::new(),
        }
    }
}

impl FallbackConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

type CompensationHandler = Arc<dyn Fn(ContextData) -> BoxFuture<'static, bool> + Send + Sync>;

/// Rollback action invoked during saga unwind when a later step fails.
///
/// The handler receives a snapshot of the context data and reports whether
/// the compensation succeeded.
#[derive(Clone)]
pub struct CompensationAction {
    handler: CompensationHandler,
    pub description: String,
    pub timeout_seconds: u64,
    pub required: bool,
}

impl fmt::Debug for CompensationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompensationAction")
            .field("description", &self.description)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("required", &self.required)
            .finish()
    }
}

impl CompensationAction {
    pub fn new<F, Fut>(handler: F, description: impl Into<String>) -> Self
    where
        F: Fn(ContextData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |data| Box::pin(handler(data))),
            description: description.into(),
            timeout_seconds: 30,
            required: true,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub async fn execute(&self, data: ContextData) -> bool {
        (self.handler)(data).await
    }
}

/// One unit of work in a pipeline, pinned to a capability.
#[derive(Clone)]
pub struct PipelineStep {
    pub name: String,
    pub description: String,

    pub capability: Capability,
    pub provider_preference: Vec<String>,
    pub required_quality_tier: Option<QualityTier>,

    /// Options passed through to `ProviderAdapter::execute`.
    pub options: HashMap<String, Value>,

    pub input_key: Option<String>,
    pub output_key: Option<String>,
    pub input_transform: Option<InputTransform>,
    pub output_transform: Option<OutputTransform>,

    pub condition: Option<StepCondition>,
    pub continue_on_failure: bool,
    pub required: bool,

    pub fallback_config: FallbackConfig,
    pub retry_policy: RetryPolicy,
    pub timeout_seconds: u64,

    pub compensation: Option<CompensationAction>,

    /// Relative weight for progress calculation.
    pub progress_weight: f64,
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("name", &self.name)
            .field("capability", &self.capability)
            .field("provider_preference", &self.provider_preference)
            .field("required", &self.required)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish_non_exhaustive()
    }
}

impl PipelineStep {
    /// Key under which this step's output is stored (defaults to the step
    /// name).
    pub fn output_key(&self) -> &str {
        self.output_key.as_deref().unwrap_or(&self.name)
    }

    pub fn should_execute(&self, data: &ContextData) -> bool {
        match &self.condition {
            Some(condition) => condition.evaluate(data),
            None => true,
        }
    }

    /// Resolve this step's input: transform if present, else the value at
    /// `input_key`, else the full context data.
    pub fn input_for(&self, data: &ContextData) -> Value {
        if let Some(transform) = &self.input_transform {
            return transform(data);
        }
        if let Some(key) = &self.input_key {
            return data.get(key).cloned().unwrap_or(Value::Null);
        }
        Value::Object(data.clone().into_iter().collect())
    }
}

/// Immutable pipeline specification, built once and reused.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub name: String,
    pub version: String,
    pub description: String,
    pub tags: Vec<String>,

    pub steps: Vec<PipelineStep>,

    pub timeout_seconds: u64,
    /// Stop on first required-step failure.
    pub fail_fast: bool,

    pub enable_compensation: bool,
    /// Overall bound on the compensation unwind.
    pub compensation_timeout_seconds: u64,

    pub progress_checkpoints: Vec<String>,

    pub estimated_duration_seconds: Option<u64>,
    pub estimated_cost_usd: Option<Decimal>,
}

impl PipelineDefinition {
    pub fn get_step(&self, name: &str) -> Option<&PipelineStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn total_progress_weight(&self) -> f64 {
        self.steps.iter().map(|s| s.progress_weight).sum()
    }
}

/// Result of executing a single pipeline step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_name: String,
    pub status: StepStatus,
    pub operation_result: Option<OperationResult>,
    pub provider_used: Option<String>,
    pub fallbacks_attempted: Vec<String>,
    pub retries: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub skipped_reason: Option<String>,
}

impl StepResult {
    pub fn skipped(step_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            step_name: step_name.into(),
            status: StepStatus::Skipped,
            operation_result: None,
            provider_used: None,
            fallbacks_attempted: Vec::new(),
            retries: 0,
            started_at: Some(now),
            completed_at: Some(now),
            error: None,
            error_code: None,
            skipped_reason: Some(reason.into()),
        }
    }

    pub fn duration_ms(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_microseconds().unwrap_or(0) as f64 / 1000.0)
            }
            _ => None,
        }
    }

    pub fn cost_usd(&self) -> Decimal {
        self.operation_result
            .as_ref()
            .map(|op| op.cost_usd)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Mutable per-execution state, owned by exactly one execution.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub execution_id: String,
    pub pipeline_name: String,
    pub tenant_id: Option<String>,

    pub data: ContextData,
    pub initial_input: ContextData,

    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub step_results: HashMap<String, StepResult>,

    pub progress_percent: f64,
    pub started_at: DateTime<Utc>,

    pub compensated_steps: Vec<String>,
    pub compensation_errors: Vec<String>,

    pub failed_step: Option<String>,
    pub failure_error: Option<String>,
}

impl PipelineContext {
    pub fn new(pipeline_name: &str, tenant_id: Option<String>, input: ContextData) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            pipeline_name: pipeline_name.to_string(),
            tenant_id,
            data: input.clone(),
            initial_input: input,
            current_step: None,
            completed_steps: Vec::new(),
            step_results: HashMap::new(),
            progress_percent: 0.0,
            started_at: Utc::now(),
            compensated_steps: Vec::new(),
            compensation_errors: Vec::new(),
            failed_step: None,
            failure_error: None,
        }
    }

    pub fn set_progress(&mut self, percent: f64) {
        self.progress_percent = percent.clamp(0.0, 100.0);
    }
}

/// Final summary of a pipeline execution.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub execution_id: String,
    pub pipeline_name: String,
    pub pipeline_version: String,

    pub success: bool,
    pub completed_steps: Vec<String>,
    pub failed_step: Option<String>,
    pub error: Option<String>,

    /// Snapshot of context data at completion.
    pub output: ContextData,
    pub step_results: HashMap<String, StepResult>,

    pub total_duration_ms: f64,
    pub total_cost_usd: Decimal,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    pub compensation_performed: bool,
    pub compensated_steps: Vec<String>,
}

impl PipelineResult {
    pub fn get_step_result(&self, step_name: &str) -> Option<&StepResult> {
        self.step_results.get(step_name)
    }

    pub fn get_output(&self, key: &str) -> Option<&Value> {
        self.output.get(key)
    }
}
