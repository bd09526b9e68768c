// crates/strand-orchestrator/src/pipeline/builder.rs

//! Fluent pipeline builder DSL
//!
//! Pipelines read top to bottom: `.step("transcribe")` opens a step
//! builder, `.done()` climbs back to the pipeline, `.build()` validates
//! the whole definition and freezes it. Validation errors (missing
//! capability, duplicate step names, empty pipeline) surface at `build()`.
//!
//! ```rust
//! use strand_core::Capability;
//! use strand_orchestrator::pipeline::builder::PipelineBuilder;
//!
//! # fn example() -> anyhow::Result<()> {
//! let pipeline = PipelineBuilder::new("transcription_with_redaction")
//!     .version("1.0.0")
//!     .timeout(600)
//!     .step("transcribe")
//!         .capability(Capability::TranscriptionDiarization)
//!         .prefer_providers(&["deepgram", "openai"])
//!         .output_as("transcript")
//!         .with_retry(3, 1000, true)
//!         .done()
//!     .step("redact_pii")
//!         .capability(Capability::PiiRedaction)
//!         .prefer_providers(&["redaction"])
//!         .input_from("transcript")
//!         .output_as("redacted_transcript")
//!         .no_fallback()
//!         .done()
//!     .build()?;
//! assert_eq!(pipeline.steps.len(), 2);
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

use strand_core::types::{Capability, QualityTier};

use super::types::{
    CompensationAction, ContextData, FallbackConfig, InputTransform, OutputTransform,
    PipelineDefinition, PipelineStep, RetryPolicy, StepCondition,
};

#[derive(Debug, Error)]
pub enum PipelineBuildError {
    #[error("pipeline name is required")]
    EmptyName,
    #[error("pipeline '{pipeline}' has no steps")]
    NoSteps { pipeline: String },
    #[error("step '{step}' requires a capability")]
    MissingCapability { step: String },
    #[error("duplicate step name: {name}")]
    DuplicateStepName { name: String },
    #[error("unknown predefined pipeline: {0}")]
    UnknownPipeline(String),
}

/// A step under construction; capability is validated at `build()`.
struct PendingStep {
    name: String,
    description: String,
    capability: Option<Capability>,
    provider_preference: Vec<String>,
    required_quality_tier: Option<QualityTier>,
    options: HashMap<String, Value>,
    input_key: Option<String>,
    output_key: Option<String>,
    input_transform: Option<InputTransform>,
    output_transform: Option<OutputTransform>,
    condition: Option<StepCondition>,
    continue_on_failure: bool,
    required: bool,
    fallback_config: FallbackConfig,
    retry_policy: RetryPolicy,
    timeout_seconds: u64,
    compensation: Option<CompensationAction>,
    progress_weight: f64,
}

impl PendingStep {
    fn new(name: String) -> Self {
        Self {
            name,
            description: String::new(),
            capability: None,
            provider_preference: Vec::new(),
            required_quality_tier: None,
            options: HashMap::new(),
            input_key: None,
            output_key: None,
            input_transform: None,
            output_transform: None,
            condition: None,
            continue_on_failure: false,
            required: true,
            fallback_config: FallbackConfig::default(),
            retry_policy: RetryPolicy::default(),
            timeout_seconds: 120,
            compensation: None,
            progress_weight: 1.0,
        }
    }

    fn build(self) -> Result<PipelineStep, PipelineBuildError> {
        let capability = self
            .capability
            .ok_or(PipelineBuildError::MissingCapability { step: self.name.clone() })?;

        Ok(PipelineStep {
            name: self.name,
            description: self.description,
            capability,
            provider_preference: self.provider_preference,
            required_quality_tier: self.required_quality_tier,
            options: self.options,
            input_key: self.input_key,
            output_key: self.output_key,
            input_transform: self.input_transform,
            output_transform: self.output_transform,
            condition: self.condition,
            continue_on_failure: self.continue_on_failure,
            required: self.required,
            fallback_config: self.fallback_config,
            retry_policy: self.retry_policy,
            timeout_seconds: self.timeout_seconds,
            compensation: self.compensation,
            progress_weight: self.progress_weight,
        })
    }
}

/// Builder for a single pipeline step. `done()` returns to the parent
/// pipeline builder.
pub struct StepBuilder {
    pipeline: PipelineBuilder,
    step: PendingStep,
}

impl StepBuilder {
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.step.description = desc.into();
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.step.capability = Some(capability);
        self
    }

    /// Providers to try, in preference order.
    pub fn prefer_providers(mut self, providers: &[&str]) -> Self {
        self.step.provider_preference = providers.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn require_quality(mut self, tier: QualityTier) -> Self {
        self.step.required_quality_tier = Some(tier);
        self
    }

    /// Add an option passed to the adapter's execute call.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.step.options.insert(key.into(), value.into());
        self
    }

    /// Read this step's input from a context key.
    pub fn input_from(mut self, key: impl Into<String>) -> Self {
        self.step.input_key = Some(key.into());
        self
    }

    /// Compute this step's input from the full context.
    pub fn input_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&ContextData) -> Value + Send + Sync + 'static,
    {
        self.step.input_transform = Some(Arc::new(transform));
        self
    }

    /// Store this step's output under a context key.
    pub fn output_as(mut self, key: impl Into<String>) -> Self {
        self.step.output_key = Some(key.into());
        self
    }

    pub fn output_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.step.output_transform = Some(Arc::new(transform));
        self
    }

    /// Skip this step unless the closure returns true.
    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(&ContextData) -> bool + Send + Sync + 'static,
    {
        self.step.condition = Some(StepCondition::func(condition));
        self
    }

    pub fn when_exists(mut self, context_path: impl Into<String>) -> Self {
        self.step.condition = Some(StepCondition::exists(context_path));
        self
    }

    pub fn when_equals(mut self, context_path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.step.condition = Some(StepCondition::equals(context_path, value));
        self
    }

    /// Pipeline continues if this step fails.
    pub fn optional(mut self) -> Self {
        self.step.required = false;
        self.step.continue_on_failure = true;
        self
    }

    pub fn continue_on_failure(mut self) -> Self {
        self.step.continue_on_failure = true;
        self
    }

    pub fn with_fallback(mut self, max_fallbacks: usize) -> Self {
        self.step.fallback_config = FallbackConfig {
            enabled: true,
            max_fallbacks,
            ..FallbackConfig::default()
        };
        self
    }

    pub fn exclude_providers(mut self, providers: &[&str]) -> Self {
        self.step.fallback_config.excluded_providers =
            providers.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn no_fallback(mut self) -> Self {
        self.step.fallback_config = FallbackConfig::disabled();
        self
    }

    pub fn with_retry(
        mut self,
        max_attempts: u32,
        initial_delay_ms: u64,
        exponential_backoff: bool,
    ) -> Self {
        self.step.retry_policy = RetryPolicy {
            max_attempts,
            initial_delay_ms,
            exponential_backoff,
            ..RetryPolicy::default()
        };
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.step.retry_policy = policy;
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.step.retry_policy = RetryPolicy::no_retry();
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.step.timeout_seconds = seconds;
        self
    }

    /// Attach a compensation handler run during saga rollback.
    pub fn compensate_with<F, Fut>(mut self, handler: F, description: impl Into<String>) -> Self
    where
        F: Fn(ContextData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.step.compensation = Some(CompensationAction::new(handler, description));
        self
    }

    pub fn compensation(mut self, action: CompensationAction) -> Self {
        self.step.compensation = Some(action);
        self
    }

    pub fn progress_weight(mut self, weight: f64) -> Self {
        self.step.progress_weight = weight;
        self
    }

    /// Finish this step and return to the pipeline builder.
    pub fn done(mut self) -> PipelineBuilder {
        self.pipeline.pending.push(self.step);
        self.pipeline
    }
}

/// Builder for pipeline definitions.
pub struct PipelineBuilder {
    name: String,
    version: String,
    description: String,
    tags: Vec<String>,
    pending: Vec<PendingStep>,
    prebuilt: Vec<PipelineStep>,
    timeout_seconds: u64,
    fail_fast: bool,
    enable_compensation: bool,
    compensation_timeout_seconds: u64,
    progress_checkpoints: Vec<String>,
    estimated_duration_seconds: Option<u64>,
    estimated_cost_usd: Option<Decimal>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            description: String::new(),
            tags: Vec::new(),
            pending: Vec::new(),
            prebuilt: Vec::new(),
            timeout_seconds: 600,
            fail_fast: true,
            enable_compensation: true,
            compensation_timeout_seconds: 120,
            progress_checkpoints: Vec::new(),
            estimated_duration_seconds: None,
            estimated_cost_usd: None,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.tags.extend(tags.iter().map(|t| t.to_string()));
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Continue executing later steps after a required-step failure.
    pub fn no_fail_fast(mut self) -> Self {
        self.fail_fast = false;
        self
    }

    pub fn with_compensation(mut self, timeout_seconds: u64) -> Self {
        self.enable_compensation = true;
        self.compensation_timeout_seconds = timeout_seconds;
        self
    }

    pub fn no_compensation(mut self) -> Self {
        self.enable_compensation = false;
        self
    }

    /// Mark a step as a progress checkpoint.
    pub fn checkpoint(mut self, step_name: impl Into<String>) -> Self {
        self.progress_checkpoints.push(step_name.into());
        self
    }

    pub fn estimated_duration(mut self, seconds: u64) -> Self {
        self.estimated_duration_seconds = Some(seconds);
        self
    }

    pub fn estimated_cost(mut self, usd: Decimal) -> Self {
        self.estimated_cost_usd = Some(usd);
        self
    }

    /// Start building a new step.
    pub fn step(self, name: impl Into<String>) -> StepBuilder {
        StepBuilder {
            step: PendingStep::new(name.into()),
            pipeline: self,
        }
    }

    /// Add a pre-built step.
    pub fn add_step(mut self, step: PipelineStep) -> Self {
        self.prebuilt.push(step);
        self
    }

    /// Validate and freeze the pipeline definition.
    pub fn build(self) -> Result<PipelineDefinition, PipelineBuildError> {
        if self.name.is_empty() {
            return Err(PipelineBuildError::EmptyName);
        }

        let mut steps: Vec<PipelineStep> = self.prebuilt;
        for pending in self.pending {
            steps.push(pending.build()?);
        }

        if steps.is_empty() {
            return Err(PipelineBuildError::NoSteps { pipeline: self.name });
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name.clone()) {
                return Err(PipelineBuildError::DuplicateStepName {
                    name: step.name.clone(),
                });
            }
        }

        Ok(PipelineDefinition {
            name: self.name,
            version: self.version,
            description: self.description,
            tags: self.tags,
            steps,
            timeout_seconds: self.timeout_seconds,
            fail_fast: self.fail_fast,
            enable_compensation: self.enable_compensation,
            compensation_timeout_seconds: self.compensation_timeout_seconds,
            progress_checkpoints: self.progress_checkpoints,
            estimated_duration_seconds: self.estimated_duration_seconds,
            estimated_cost_usd: self.estimated_cost_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_pipeline_with_steps_in_order() {
        let pipeline = PipelineBuilder::new("call_analysis")
            .version("2.1.0")
            .tags(&["analysis", "audio"])
            .step("transcribe")
                .capability(Capability::TranscriptionDiarization)
                .prefer_providers(&["deepgram", "openai"])
                .output_as("transcript")
                .progress_weight(3.0)
                .done()
            .step("summarize")
                .capability(Capability::Summarization)
                .input_from("transcript")
                .done()
            .checkpoint("transcribe")
            .build()
            .unwrap();

        assert_eq!(pipeline.version, "2.1.0");
        assert_eq!(pipeline.steps.len(), 2);
        assert_eq!(pipeline.steps[0].name, "transcribe");
        assert_eq!(pipeline.steps[1].name, "summarize");
        assert_eq!(pipeline.total_progress_weight(), 4.0);
        assert_eq!(pipeline.progress_checkpoints, vec!["transcribe"]);

        let step = pipeline.get_step("transcribe").unwrap();
        assert_eq!(step.output_key(), "transcript");
        assert_eq!(step.provider_preference, vec!["deepgram", "openai"]);
    }

    #[test]
    fn missing_capability_fails_at_build() {
        let err = PipelineBuilder::new("p")
            .step("incomplete")
                .output_as("x")
                .done()
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineBuildError::MissingCapability { .. }));
    }

    #[test]
    fn duplicate_step_names_fail_at_build() {
        let err = PipelineBuilder::new("p")
            .step("same")
                .capability(Capability::Transcription)
                .done()
            .step("same")
                .capability(Capability::Summarization)
                .done()
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineBuildError::DuplicateStepName { .. }));
    }

    #[test]
    fn empty_pipeline_fails_at_build() {
        let err = PipelineBuilder::new("empty").build().unwrap_err();
        assert!(matches!(err, PipelineBuildError::NoSteps { .. }));
    }

    #[test]
    fn conditions_and_flags_flow_through() {
        let pipeline = PipelineBuilder::new("p")
            .no_fail_fast()
            .with_compensation(90)
            .step("conditional")
                .capability(Capability::Summarization)
                .when_equals("flag", json!(true))
                .optional()
                .no_retry()
                .no_fallback()
                .timeout(30)
                .done()
            .build()
            .unwrap();

        assert!(!pipeline.fail_fast);
        assert_eq!(pipeline.compensation_timeout_seconds, 90);

        let step = pipeline.get_step("conditional").unwrap();
        assert!(!step.required);
        assert!(step.continue_on_failure);
        assert!(!step.fallback_config.enabled);
        assert_eq!(step.retry_policy.max_attempts, 1);
        assert_eq!(step.timeout_seconds, 30);
        assert!(step.condition.is_some());
    }
}
