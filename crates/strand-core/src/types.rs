// crates/strand-core/src/types.rs

//! Capability, cost, and provider value types
//!
//! Providers register which capabilities they support together with cost
//! and quality metadata, enabling dynamic discovery, cost-aware routing,
//! and fallback chain construction. All adapters return the same
//! `OperationResult` envelope so the pipeline layer can treat every
//! provider uniformly.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An AI function a provider may offer.
///
/// Identity is the string tag; dispatch is by enum value, never by type.
/// Specialized variants (e.g. `TranscriptionDiarization`) are distinct
/// capabilities so that providers can be ranked differently for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Transcription,
    TranscriptionDiarization,
    TranscriptionDualChannel,
    TranscriptionRealtime,
    LlmGeneration,
    LlmStructured,
    LlmStreaming,
    LlmVision,
    LlmFunctionCalling,
    Summarization,
    SentimentAnalysis,
    CoachingAnalysis,
    PiiDetection,
    PiiRedaction,
    Embedding,
    EmbeddingMultimodal,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Transcription => "transcription",
            Capability::TranscriptionDiarization => "transcription_diarization",
            Capability::TranscriptionDualChannel => "transcription_dual_channel",
            Capability::TranscriptionRealtime => "transcription_realtime",
            Capability::LlmGeneration => "llm_generation",
            Capability::LlmStructured => "llm_structured",
            Capability::LlmStreaming => "llm_streaming",
            Capability::LlmVision => "llm_vision",
            Capability::LlmFunctionCalling => "llm_function_calling",
            Capability::Summarization => "summarization",
            Capability::SentimentAnalysis => "sentiment_analysis",
            Capability::CoachingAnalysis => "coaching_analysis",
            Capability::PiiDetection => "pii_detection",
            Capability::PiiRedaction => "pii_redaction",
            Capability::Embedding => "embedding",
            Capability::EmbeddingMultimodal => "embedding_multimodal",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a provider's costs are measured.
///
/// LLMs price per token (input and output may differ), transcription per
/// minute or second of audio, PII services per request or per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostUnit {
    Per1kTokens,
    Per1mTokens,
    PerMinute,
    PerSecond,
    PerCharacter,
    PerRequest,
    Free,
}

/// Quality classification used for cost/quality routing tradeoffs.
///
/// Variant order matters: `Economy < Standard < Premium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Economy,
    Standard,
    Premium,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Economy => "economy",
            QualityTier::Standard => "standard",
            QualityTier::Premium => "premium",
        }
    }
}

/// Where a provider runs, for routing and billing purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Third-party API (OpenAI, Anthropic, Deepgram).
    External,
    /// Self-hosted or internal service.
    Internal,
    /// Can switch between internal and external.
    Hybrid,
}

/// Usage figures fed into cost estimation.
///
/// Only the fields relevant to the capability's `CostUnit` are consulted.
#[derive(Debug, Clone, Copy)]
pub struct CostInputs {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_seconds: f64,
    pub character_count: u64,
    pub request_count: u64,
}

impl Default for CostInputs {
    fn default() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            duration_seconds: 0.0,
            character_count: 0,
            request_count: 1,
        }
    }
}

impl CostInputs {
    /// Build cost inputs from a raw usage map as returned by an adapter.
    ///
    /// Recognized keys: `input_tokens`, `output_tokens`, `duration_seconds`,
    /// `character_count`, `request_count`.
    pub fn from_usage(usage: &HashMap<String, f64>) -> Self {
        Self {
            input_tokens: usage.get("input_tokens").copied().unwrap_or(0.0) as u64,
            output_tokens: usage.get("output_tokens").copied().unwrap_or(0.0) as u64,
            duration_seconds: usage.get("duration_seconds").copied().unwrap_or(0.0),
            character_count: usage.get("character_count").copied().unwrap_or(0.0) as u64,
            request_count: usage.get("request_count").copied().unwrap_or(1.0) as u64,
        }
    }
}

/// One provider's offering of one capability.
///
/// Carries everything the registry needs for cost calculation, quality
/// routing, and fallback chain construction. Lower `priority` means the
/// provider is tried earlier.
///
/// # Examples
///
/// ```rust
/// use rust_decimal::Decimal;
/// use strand_core::types::{Capability, CapabilityMetadata, CostUnit, QualityTier};
///
/// let meta = CapabilityMetadata::new(Capability::TranscriptionDiarization, "deepgram")
///     .with_cost(Decimal::new(43, 4), CostUnit::PerMinute)
///     .with_quality(QualityTier::Premium)
///     .with_priority(5)
///     .with_model("nova-2");
/// assert_eq!(meta.provider_name, "deepgram");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityMetadata {
    pub capability: Capability,
    pub provider_name: String,

    // Cost information
    pub cost_per_unit: Decimal,
    pub cost_unit: CostUnit,
    /// Separate output pricing for LLMs with input/output rates.
    pub output_cost_per_unit: Option<Decimal>,

    // Quality and routing
    pub quality_tier: QualityTier,
    /// Lower = higher priority in fallback chains.
    pub priority: u32,

    // Feature support
    pub supported_languages: Vec<String>,
    pub max_input_size: Option<u64>,
    pub supports_streaming: bool,

    // Performance characteristics
    pub avg_latency_ms: Option<u64>,
    pub rate_limit_rpm: Option<u32>,

    pub model_name: Option<String>,
}

impl CapabilityMetadata {
    pub fn new(capability: Capability, provider_name: impl Into<String>) -> Self {
        Self {
            capability,
            provider_name: provider_name.into(),
            cost_per_unit: Decimal::ZERO,
            cost_unit: CostUnit::PerRequest,
            output_cost_per_unit: None,
            quality_tier: QualityTier::Standard,
            priority: 100,
            supported_languages: Vec::new(),
            max_input_size: None,
            supports_streaming: false,
            avg_latency_ms: None,
            rate_limit_rpm: None,
            model_name: None,
        }
    }

    pub fn with_cost(mut self, cost_per_unit: Decimal, cost_unit: CostUnit) -> Self {
        self.cost_per_unit = cost_per_unit;
        self.cost_unit = cost_unit;
        self
    }

    pub fn with_output_cost(mut self, output_cost_per_unit: Decimal) -> Self {
        self.output_cost_per_unit = Some(output_cost_per_unit);
        self
    }

    pub fn with_quality(mut self, tier: QualityTier) -> Self {
        self.quality_tier = tier;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.supported_languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_streaming(mut self) -> Self {
        self.supports_streaming = true;
        self
    }

    /// Estimate cost in USD for the given usage.
    ///
    /// The formula switches on `cost_unit`. Token-based units apply
    /// `output_cost_per_unit` to output tokens when present.
    pub fn estimate_cost(&self, inputs: CostInputs) -> Decimal {
        let duration = Decimal::from_f64(inputs.duration_seconds).unwrap_or_default();

        match self.cost_unit {
            CostUnit::Free => Decimal::ZERO,
            CostUnit::Per1kTokens => {
                self.token_cost(inputs.input_tokens, inputs.output_tokens, 1_000)
            }
            CostUnit::Per1mTokens => {
                self.token_cost(inputs.input_tokens, inputs.output_tokens, 1_000_000)
            }
            CostUnit::PerMinute => duration / Decimal::from(60) * self.cost_per_unit,
            CostUnit::PerSecond => duration * self.cost_per_unit,
            CostUnit::PerCharacter => Decimal::from(inputs.character_count) * self.cost_per_unit,
            CostUnit::PerRequest => Decimal::from(inputs.request_count) * self.cost_per_unit,
        }
    }

    fn token_cost(&self, input_tokens: u64, output_tokens: u64, per: u64) -> Decimal {
        let per = Decimal::from(per);
        let input_cost = Decimal::from(input_tokens) / per * self.cost_per_unit;
        let output_cost = match self.output_cost_per_unit {
            Some(rate) if output_tokens > 0 => Decimal::from(output_tokens) / per * rate,
            _ => Decimal::ZERO,
        };
        input_cost + output_cost
    }
}

/// Complete registration of a provider with all its capabilities.
///
/// `is_available` is the only field mutated after startup; the registry
/// flips it when a provider is marked unavailable and fallback chains skip
/// it from then on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRegistration {
    pub provider_name: String,
    pub provider_type: ProviderType,
    pub capabilities: Vec<CapabilityMetadata>,
    pub is_available: bool,
    pub requires_api_key: bool,
    pub health_check_url: Option<String>,
}

impl ProviderRegistration {
    pub fn new(
        provider_name: impl Into<String>,
        provider_type: ProviderType,
        capabilities: Vec<CapabilityMetadata>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            provider_type,
            capabilities,
            is_available: true,
            requires_api_key: true,
            health_check_url: None,
        }
    }

    /// Metadata for a specific capability, if offered.
    pub fn get_capability(&self, capability: Capability) -> Option<&CapabilityMetadata> {
        self.capabilities.iter().find(|c| c.capability == capability)
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.iter().any(|c| c.capability == capability)
    }

    pub fn capability_list(&self) -> Vec<Capability> {
        self.capabilities.iter().map(|c| c.capability).collect()
    }
}

/// Universal result envelope returned by every adapter operation.
///
/// Adapters never return `Err` for operation failures; failures become
/// `success == false` with `error`, `error_code`, and `retryable` set, so
/// that the executor's fallback logic can act on them.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub success: bool,
    /// Operation output; opaque to the core.
    pub data: Option<Value>,
    pub provider_name: String,
    pub capability: Capability,

    // Usage and cost
    /// Raw usage metrics from the provider (tokens, duration, ...).
    pub usage: HashMap<String, f64>,
    pub cost_usd: Decimal,
    pub latency_ms: f64,

    // Error handling
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub retryable: bool,

    // Tracing
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    pub fn success(
        provider_name: impl Into<String>,
        capability: Capability,
        data: Value,
        usage: HashMap<String, f64>,
        cost_usd: Decimal,
        latency_ms: f64,
    ) -> Self {
        Self {
            success: true,
            data: Some(data),
            provider_name: provider_name.into(),
            capability,
            usage,
            cost_usd,
            latency_ms,
            error: None,
            error_code: None,
            retryable: false,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        provider_name: impl Into<String>,
        capability: Capability,
        error: impl Into<String>,
        error_code: Option<&str>,
        retryable: bool,
    ) -> Self {
        Self {
            success: false,
            data: None,
            provider_name: provider_name.into(),
            capability,
            usage: HashMap::new(),
            cost_usd: Decimal::ZERO,
            latency_ms: 0.0,
            error: Some(error.into()),
            error_code: error_code.map(String::from),
            retryable,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn input_tokens(&self) -> u64 {
        self.usage.get("input_tokens").copied().unwrap_or(0.0) as u64
    }

    pub fn output_tokens(&self) -> u64 {
        self.usage.get("output_tokens").copied().unwrap_or(0.0) as u64
    }

    pub fn duration_seconds(&self) -> f64 {
        self.usage.get("duration_seconds").copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(cost: Decimal, unit: CostUnit) -> CapabilityMetadata {
        CapabilityMetadata::new(Capability::Transcription, "test").with_cost(cost, unit)
    }

    #[test]
    fn per_minute_cost() {
        let m = meta(Decimal::new(6, 3), CostUnit::PerMinute); // $0.006/min
        let cost = m.estimate_cost(CostInputs {
            duration_seconds: 60.0,
            ..Default::default()
        });
        assert_eq!(cost, Decimal::new(6, 3));
    }

    #[test]
    fn token_cost_splits_input_and_output() {
        let m = CapabilityMetadata::new(Capability::LlmGeneration, "test")
            .with_cost(Decimal::new(3, 0), CostUnit::Per1mTokens) // $3/M in
            .with_output_cost(Decimal::new(15, 0)); // $15/M out
        let cost = m.estimate_cost(CostInputs {
            input_tokens: 1_000_000,
            output_tokens: 100_000,
            ..Default::default()
        });
        // 3.0 + 1.5
        assert_eq!(cost, Decimal::new(45, 1));
    }

    #[test]
    fn zero_usage_costs_nothing_except_per_request() {
        let m = meta(Decimal::new(5, 1), CostUnit::PerMinute);
        assert_eq!(m.estimate_cost(CostInputs::default()), Decimal::ZERO);

        let m = meta(Decimal::new(2, 2), CostUnit::PerRequest); // $0.02/req
        assert_eq!(m.estimate_cost(CostInputs::default()), Decimal::new(2, 2));
    }

    #[test]
    fn free_unit_is_always_zero() {
        let m = meta(Decimal::new(100, 0), CostUnit::Free);
        let cost = m.estimate_cost(CostInputs {
            input_tokens: 5_000,
            duration_seconds: 600.0,
            ..Default::default()
        });
        assert_eq!(cost, Decimal::ZERO);
    }

    #[test]
    fn registration_lookups() {
        let reg = ProviderRegistration::new(
            "openai",
            ProviderType::External,
            vec![
                CapabilityMetadata::new(Capability::LlmGeneration, "openai"),
                CapabilityMetadata::new(Capability::Transcription, "openai"),
            ],
        );
        assert!(reg.supports(Capability::Transcription));
        assert!(!reg.supports(Capability::PiiRedaction));
        assert_eq!(reg.capability_list().len(), 2);
        assert!(reg.get_capability(Capability::LlmGeneration).is_some());
    }

    #[test]
    fn quality_tier_ordering() {
        assert!(QualityTier::Economy < QualityTier::Standard);
        assert!(QualityTier::Standard < QualityTier::Premium);
    }
}
