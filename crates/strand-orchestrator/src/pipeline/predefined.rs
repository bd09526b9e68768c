// crates/strand-orchestrator/src/pipeline/predefined.rs

//! Predefined pipelines for common AI workflows
//!
//! Ready-to-use definitions, each parameterizable by a small option bag:
//! transcription, transcription with PII redaction, full call analysis,
//! dual-channel analysis, PII detection, and text summarization. All are
//! built with the pipeline DSL and can serve as templates for custom
//! pipelines.

use log::warn;
use rust_decimal::Decimal;
use serde::Serialize;

use strand_core::Capability;

use super::builder::{PipelineBuildError, PipelineBuilder};
use super::types::PipelineDefinition;

pub const PIPELINE_NAMES: [&str; 6] = [
    "transcription",
    "transcription_with_redaction",
    "call_analysis",
    "dual_channel_analysis",
    "pii_detection",
    "text_summarization",
];

const DEFAULT_ENTITY_TYPES: [&str; 5] = [
    "PERSON",
    "EMAIL_ADDRESS",
    "PHONE_NUMBER",
    "CREDIT_CARD",
    "US_SSN",
];

/// Option bag accepted by every predefined pipeline; each pipeline reads
/// the fields relevant to it.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub with_diarization: bool,
    pub transcription_providers: Option<Vec<String>>,
    pub llm_providers: Option<Vec<String>>,
    pub entity_types: Option<Vec<String>>,
    pub redaction_method: String,
    pub include_summary: bool,
    pub include_sentiment: bool,
    pub include_coaching: bool,
    pub summary_max_length: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            with_diarization: true,
            transcription_providers: None,
            llm_providers: None,
            entity_types: None,
            redaction_method: "mask".to_string(),
            include_summary: true,
            include_sentiment: true,
            include_coaching: true,
            summary_max_length: 500,
        }
    }
}

impl PipelineOptions {
    fn transcription_providers(&self) -> Vec<String> {
        self.transcription_providers
            .clone()
            .unwrap_or_else(|| vec!["deepgram".to_string(), "openai".to_string()])
    }

    fn llm_providers(&self) -> Vec<String> {
        self.llm_providers
            .clone()
            .unwrap_or_else(|| vec!["anthropic".to_string(), "openai".to_string()])
    }

    fn entity_types(&self) -> Vec<String> {
        self.entity_types.clone().unwrap_or_else(|| {
            DEFAULT_ENTITY_TYPES.iter().map(|s| s.to_string()).collect()
        })
    }
}

/// Metadata describing one predefined pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub tags: Vec<String>,
    pub step_count: usize,
    pub estimated_duration_seconds: Option<u64>,
    pub estimated_cost_usd: Option<Decimal>,
    pub required_capabilities: Vec<String>,
}

impl PipelineInfo {
    fn from_definition(definition: &PipelineDefinition) -> Self {
        let mut required_capabilities: Vec<String> = definition
            .steps
            .iter()
            .map(|s| s.capability.to_string())
            .collect();
        required_capabilities.sort();
        required_capabilities.dedup();

        Self {
            name: definition.name.clone(),
            version: definition.version.clone(),
            description: definition.description.clone(),
            tags: definition.tags.clone(),
            step_count: definition.steps.len(),
            estimated_duration_seconds: definition.estimated_duration_seconds,
            estimated_cost_usd: definition.estimated_cost_usd,
            required_capabilities,
        }
    }
}

/// Build a predefined pipeline by name.
pub fn get_pipeline(
    name: &str,
    options: &PipelineOptions,
) -> Result<PipelineDefinition, PipelineBuildError> {
    match name {
        "transcription" => transcription_pipeline(options),
        "transcription_with_redaction" => transcription_with_redaction_pipeline(options),
        "call_analysis" => call_analysis_pipeline(options),
        "dual_channel_analysis" => dual_channel_analysis_pipeline(options),
        "pii_detection" => pii_detection_pipeline(options),
        "text_summarization" => text_summarization_pipeline(options),
        other => Err(PipelineBuildError::UnknownPipeline(other.to_string())),
    }
}

/// Metadata for every predefined pipeline, built with default options.
pub fn list_pipelines() -> Vec<PipelineInfo> {
    let defaults = PipelineOptions::default();
    PIPELINE_NAMES
        .iter()
        .filter_map(|name| match get_pipeline(name, &defaults) {
            Ok(definition) => Some(PipelineInfo::from_definition(&definition)),
            Err(err) => {
                warn!("predefined pipeline '{name}' failed to build: {err}");
                None
            }
        })
        .collect()
}

/// Basic audio transcription with provider fallback.
pub fn transcription_pipeline(
    options: &PipelineOptions,
) -> Result<PipelineDefinition, PipelineBuildError> {
    let capability = if options.with_diarization {
        Capability::TranscriptionDiarization
    } else {
        Capability::Transcription
    };
    let providers = options.transcription_providers();
    let providers: Vec<&str> = providers.iter().map(String::as_str).collect();

    PipelineBuilder::new("transcription")
        .version("1.0.0")
        .description("Transcribe audio with optional speaker diarization")
        .tags(&["transcription", "audio"])
        .timeout(600)
        .estimated_duration(120)
        .step("transcribe")
            .description("Transcribe audio to text")
            .capability(capability)
            .prefer_providers(&providers)
            .output_as("transcript")
            .with_fallback(2)
            .with_retry(3, 1000, true)
            .timeout(300)
            .done()
        .build()
}

/// Transcription followed by PII redaction of the transcript.
pub fn transcription_with_redaction_pipeline(
    options: &PipelineOptions,
) -> Result<PipelineDefinition, PipelineBuildError> {
    let capability = if options.with_diarization {
        Capability::TranscriptionDiarization
    } else {
        Capability::Transcription
    };
    let providers = options.transcription_providers();
    let providers: Vec<&str> = providers.iter().map(String::as_str).collect();
    let entity_types = options.entity_types();
    let redaction_method = options.redaction_method.clone();

    PipelineBuilder::new("transcription_with_redaction")
        .version("1.0.0")
        .description("Transcribe audio and redact PII from the transcript")
        .tags(&["transcription", "pii", "redaction", "compliance"])
        .timeout(600)
        .estimated_duration(180)
        .with_compensation(120)
        .step("transcribe")
            .description("Transcribe audio to text with speaker identification")
            .capability(capability)
            .prefer_providers(&providers)
            .output_as("transcript")
            .with_fallback(2)
            .with_retry(3, 1000, true)
            .timeout(300)
            .progress_weight(3.0)
            .done()
        .step("redact_pii")
            .description("Detect and redact personally identifiable information")
            .capability(Capability::PiiRedaction)
            .prefer_providers(&["redaction"])
            .input_transform(move |ctx| {
                serde_json::json!({
                    "segments": ctx
                        .get("transcript")
                        .and_then(|t| t.get("segments"))
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!([])),
                    "entity_types": entity_types,
                    "redaction_method": redaction_method,
                })
            })
            .output_as("redacted_transcript")
            .no_fallback()
            .with_retry(2, 1000, true)
            .timeout(60)
            .done()
        .checkpoint("transcribe")
        .checkpoint("redact_pii")
        .build()
}

/// Full call analysis: transcription, redaction, then the configured
/// insight steps.
pub fn call_analysis_pipeline(
    options: &PipelineOptions,
) -> Result<PipelineDefinition, PipelineBuildError> {
    let transcription_providers = options.transcription_providers();
    let transcription_providers: Vec<&str> =
        transcription_providers.iter().map(String::as_str).collect();
    let llm_providers = options.llm_providers();
    let llm_providers: Vec<&str> = llm_providers.iter().map(String::as_str).collect();
    let entity_types = options.entity_types();

    let mut builder = PipelineBuilder::new("call_analysis")
        .version("1.0.0")
        .description(
            "Complete call analysis: transcription, PII redaction, summarization, \
             sentiment analysis, and coaching insights",
        )
        .tags(&["call-center", "analysis", "transcription", "insights"])
        .timeout(900)
        .estimated_duration(300)
        .estimated_cost(Decimal::new(15, 2))
        .with_compensation(120)
        .step("transcribe")
            .description("Transcribe audio with speaker diarization")
            .capability(Capability::TranscriptionDiarization)
            .prefer_providers(&transcription_providers)
            .output_as("transcript")
            .with_fallback(2)
            .with_retry(3, 1000, true)
            .timeout(300)
            .progress_weight(3.0)
            .done()
        .step("redact_pii")
            .description("Redact personally identifiable information")
            .capability(Capability::PiiRedaction)
            .prefer_providers(&["redaction"])
            .input_transform(move |ctx| {
                serde_json::json!({
                    "segments": ctx
                        .get("transcript")
                        .and_then(|t| t.get("segments"))
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!([])),
                    "entity_types": entity_types,
                })
            })
            .output_as("redacted_transcript")
            .no_fallback()
            .with_retry(2, 1000, true)
            .timeout(60)
            .done()
        .checkpoint("transcribe")
        .checkpoint("redact_pii");

    if options.include_summary {
        builder = builder
            .step("summarize")
                .description("Summarize the call")
                .capability(Capability::Summarization)
                .prefer_providers(&llm_providers)
                .input_from("redacted_transcript")
                .output_as("summary")
                .with_option("max_length", options.summary_max_length)
                .with_retry(2, 1000, true)
                .timeout(120)
                .done();
    }
    if options.include_sentiment {
        builder = builder
            .step("analyze_sentiment")
                .description("Per-speaker sentiment analysis")
                .capability(Capability::SentimentAnalysis)
                .prefer_providers(&llm_providers)
                .input_from("redacted_transcript")
                .output_as("sentiment")
                .with_retry(2, 1000, true)
                .timeout(120)
                .done();
    }
    if options.include_coaching {
        builder = builder
            .step("coaching_insights")
                .description("Coaching feedback for the agent")
                .capability(Capability::CoachingAnalysis)
                .prefer_providers(&["anthropic"])
                .input_from("redacted_transcript")
                .output_as("coaching")
                .optional()
                .with_retry(2, 1000, true)
                .timeout(120)
                .done();
    }

    builder.build()
}

/// Dual-channel (agent/customer) call analysis.
pub fn dual_channel_analysis_pipeline(
    options: &PipelineOptions,
) -> Result<PipelineDefinition, PipelineBuildError> {
    let llm_providers = options.llm_providers();
    let llm_providers: Vec<&str> = llm_providers.iter().map(String::as_str).collect();
    let entity_types = options.entity_types();

    let mut builder = PipelineBuilder::new("dual_channel_analysis")
        .version("1.0.0")
        .description("Analyze dual-channel call audio with per-channel transcripts")
        .tags(&["call-center", "analysis", "dual-channel"])
        .timeout(900)
        .estimated_duration(300)
        .with_compensation(120)
        .step("transcribe")
            .description("Transcribe each audio channel separately")
            .capability(Capability::TranscriptionDualChannel)
            .prefer_providers(&["deepgram"])
            .output_as("transcript")
            .with_fallback(1)
            .with_retry(3, 1000, true)
            .timeout(300)
            .progress_weight(3.0)
            .done()
        .step("redact_pii")
            .description("Redact PII across all channels")
            .capability(Capability::PiiRedaction)
            .prefer_providers(&["redaction"])
            .input_transform(move |ctx| {
                let text = ctx
                    .get("transcript")
                    .and_then(|t| t.get("channels"))
                    .and_then(|c| c.as_array())
                    .map(|channels| {
                        channels
                            .iter()
                            .filter_map(|ch| ch.get("text").and_then(|t| t.as_str()))
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .unwrap_or_default();
                serde_json::json!({
                    "text": text,
                    "entity_types": entity_types,
                })
            })
            .output_as("redacted_transcript")
            .no_fallback()
            .with_retry(2, 1000, true)
            .timeout(60)
            .done()
        .checkpoint("transcribe");

    if options.include_summary {
        builder = builder
            .step("summarize")
                .capability(Capability::Summarization)
                .prefer_providers(&llm_providers)
                .input_from("redacted_transcript")
                .output_as("summary")
                .with_option("max_length", options.summary_max_length)
                .done();
    }
    if options.include_sentiment {
        builder = builder
            .step("analyze_sentiment")
                .capability(Capability::SentimentAnalysis)
                .prefer_providers(&llm_providers)
                .input_from("redacted_transcript")
                .output_as("sentiment")
                .done();
    }

    builder.build()
}

/// Standalone PII detection over text input.
pub fn pii_detection_pipeline(
    options: &PipelineOptions,
) -> Result<PipelineDefinition, PipelineBuildError> {
    let entity_types = options.entity_types();

    PipelineBuilder::new("pii_detection")
        .version("1.0.0")
        .description("Detect personally identifiable information in text")
        .tags(&["pii", "compliance"])
        .timeout(120)
        .estimated_duration(10)
        .step("detect_pii")
            .capability(Capability::PiiDetection)
            .prefer_providers(&["redaction"])
            .input_transform(move |ctx| {
                serde_json::json!({
                    "text": ctx.get("text").cloned().unwrap_or_default(),
                    "entity_types": entity_types,
                })
            })
            .output_as("entities")
            .no_fallback()
            .with_retry(2, 500, true)
            .timeout(60)
            .done()
        .build()
}

/// Standalone text summarization.
pub fn text_summarization_pipeline(
    options: &PipelineOptions,
) -> Result<PipelineDefinition, PipelineBuildError> {
    let llm_providers = options.llm_providers();
    let llm_providers: Vec<&str> = llm_providers.iter().map(String::as_str).collect();

    PipelineBuilder::new("text_summarization")
        .version("1.0.0")
        .description("Summarize text with an LLM")
        .tags(&["summarization", "text"])
        .timeout(300)
        .estimated_duration(30)
        .step("summarize")
            .capability(Capability::Summarization)
            .prefer_providers(&llm_providers)
            .input_from("text")
            .output_as("summary")
            .with_option("max_length", options.summary_max_length)
            .with_fallback(1)
            .with_retry(2, 1000, true)
            .timeout(120)
            .done()
        .build()
}
