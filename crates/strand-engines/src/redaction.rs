// crates/strand-engines/src/redaction.rs

//! Internal PII detection/redaction service adapter.
//!
//! Wraps the in-cluster redaction microservice. Operations are free and the
//! adapter carries the highest priority for PII capabilities, so pipelines
//! route PII work here unless the service is marked unavailable.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};

use strand_core::error::{codes, ProviderCallError};
use strand_core::traits::ProviderAdapter;
use strand_core::types::{
    Capability, CapabilityMetadata, CostUnit, OperationResult, ProviderRegistration, ProviderType,
    QualityTier,
};

use crate::base::{elapsed_ms, f64_option, http_client, str_option, CallOutcome, CallResult};

const DEFAULT_SERVICE_URL: &str = "http://redaction:8502";

const DEFAULT_ENTITY_TYPES: [&str; 5] = [
    "PERSON",
    "EMAIL_ADDRESS",
    "PHONE_NUMBER",
    "CREDIT_CARD",
    "US_SSN",
];

#[derive(Debug)]
pub struct RedactionAdapter {
    service_url: String,
    entity_types: Vec<String>,
    confidence_threshold: f64,
    client: Client,
    registration: ProviderRegistration,
}

impl RedactionAdapter {
    pub fn new(
        service_url: Option<String>,
        entity_types: Option<Vec<String>>,
        confidence_threshold: Option<f64>,
        timeout_secs: Option<u64>,
    ) -> anyhow::Result<Self> {
        let service_url = service_url.unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string());
        let registration = Self::build_registration(&service_url);

        Ok(Self {
            service_url,
            entity_types: entity_types.unwrap_or_else(|| {
                DEFAULT_ENTITY_TYPES.iter().map(|s| s.to_string()).collect()
            }),
            confidence_threshold: confidence_threshold.unwrap_or(0.7),
            client: http_client(timeout_secs.unwrap_or(60))?,
            registration,
        })
    }

    fn build_registration(service_url: &str) -> ProviderRegistration {
        let pii = |capability: Capability| {
            CapabilityMetadata::new(capability, "redaction")
                .with_cost(rust_decimal::Decimal::ZERO, CostUnit::Free)
                .with_quality(QualityTier::Premium)
                .with_priority(1)
        };

        let mut registration = ProviderRegistration::new(
            "redaction",
            ProviderType::Internal,
            vec![pii(Capability::PiiDetection), pii(Capability::PiiRedaction)],
        );
        registration.requires_api_key = false;
        registration.health_check_url = Some(format!("{service_url}/health"));
        registration
    }

    async fn call_service(
        &self,
        capability: Capability,
        input: &Value,
        options: &HashMap<String, Value>,
    ) -> CallResult {
        let path = match capability {
            Capability::PiiDetection => "/v1/detect",
            _ => "/v1/redact",
        };

        // Accept either raw text or diarized segments.
        let (payload_key, payload_value, char_count) = if let Some(text) =
            input.as_str().or_else(|| input.get("text").and_then(Value::as_str))
        {
            ("text", json!(text), text.len())
        } else if let Some(segments) = input.get("segments").and_then(Value::as_array) {
            let chars: usize = segments
                .iter()
                .filter_map(|s| s["text"].as_str())
                .map(str::len)
                .sum();
            ("segments", json!(segments), chars)
        } else {
            return Err(ProviderCallError::invalid_input(
                "redaction input requires 'text' or 'segments'",
            ));
        };

        let entity_types = input
            .get("entity_types")
            .cloned()
            .unwrap_or_else(|| json!(self.entity_types));

        let mut payload = serde_json::Map::new();
        payload.insert(payload_key.to_string(), payload_value);
        payload.insert("entity_types".to_string(), entity_types);
        payload.insert(
            "confidence_threshold".to_string(),
            json!(f64_option(options, "confidence_threshold").unwrap_or(self.confidence_threshold)),
        );
        if capability == Capability::PiiRedaction {
            let method = input
                .get("redaction_method")
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| str_option(options, "redaction_method"))
                .unwrap_or_else(|| "mask".to_string());
            payload.insert("redaction_method".to_string(), json!(method));
        }
        let payload = Value::Object(payload);

        debug!("redaction service request: {path}");

        let response = self
            .client
            .post(format!("{}{path}", self.service_url))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body: Value = if status.is_success() {
            response.json().await?
        } else {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderCallError::from_status(status.as_u16(), &text));
        };

        let mut usage = HashMap::new();
        usage.insert("request_count".to_string(), 1.0);
        usage.insert("character_count".to_string(), char_count as f64);

        Ok(CallOutcome {
            data: body,
            usage,
            request_id: None,
        })
    }
}

#[async_trait]
impl ProviderAdapter for RedactionAdapter {
    fn registration(&self) -> ProviderRegistration {
        self.registration.clone()
    }

    async fn execute(
        &self,
        capability: Capability,
        input: Value,
        options: &HashMap<String, Value>,
    ) -> OperationResult {
        let started = Instant::now();
        let outcome = match capability {
            Capability::PiiDetection | Capability::PiiRedaction => {
                self.call_service(capability, &input, options).await
            }
            other => {
                return self.error_result(
                    other,
                    format!("redaction service does not serve capability '{other}'"),
                    Some(codes::UNSUPPORTED_CAPABILITY),
                    false,
                    0.0,
                );
            }
        };

        let latency_ms = elapsed_ms(started);
        match outcome {
            Ok(call) => {
                self.success_result(capability, call.data, call.usage, latency_ms, call.request_id)
            }
            Err(err) => {
                debug!("redaction call failed: {err}");
                self.error_result(
                    capability,
                    err.message.clone(),
                    err.code.as_deref(),
                    err.retryable,
                    latency_ms,
                )
            }
        }
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.service_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::types::CostInputs;

    #[test]
    fn pii_operations_are_free_and_preferred() {
        let adapter = RedactionAdapter::new(None, None, None, None).unwrap();
        let registration = adapter.registration();
        assert!(!registration.requires_api_key);

        let redact = registration.get_capability(Capability::PiiRedaction).unwrap();
        assert_eq!(redact.priority, 1);
        assert_eq!(
            redact.estimate_cost(CostInputs {
                character_count: 100_000,
                ..Default::default()
            }),
            rust_decimal::Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn rejects_inputs_without_text_or_segments() {
        let adapter = RedactionAdapter::new(None, None, None, None).unwrap();
        let result = adapter
            .execute(Capability::PiiRedaction, json!({"audio": "x"}), &HashMap::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(codes::INVALID_INPUT));
    }

    #[tokio::test]
    async fn llm_capability_is_unsupported() {
        let adapter = RedactionAdapter::new(None, None, None, None).unwrap();
        let result = adapter
            .execute(Capability::LlmGeneration, json!("hi"), &HashMap::new())
            .await;
        assert_eq!(
            result.error_code.as_deref(),
            Some(codes::UNSUPPORTED_CAPABILITY)
        );
    }
}
