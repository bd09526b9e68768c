// crates/strand-engines/src/anthropic.rs

//! Anthropic adapter: Claude messages API with tool-based structured output.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use strand_core::error::{codes, ProviderCallError};
use strand_core::traits::ProviderAdapter;
use strand_core::types::{
    Capability, CapabilityMetadata, CostUnit, OperationResult, ProviderRegistration, ProviderType,
    QualityTier,
};

use crate::base::{
    elapsed_ms, f64_option, http_client, str_option, text_input, u64_option, CallOutcome,
    CallResult,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;

#[derive(Debug)]
pub struct AnthropicAdapter {
    api_key: String,
    model_name: String,
    base_url: String,
    client: Client,
    registration: ProviderRegistration,
}

impl AnthropicAdapter {
    pub fn new(
        api_key: impl Into<String>,
        model_name: Option<String>,
        base_url: Option<String>,
        timeout_secs: Option<u64>,
    ) -> anyhow::Result<Self> {
        let model_name = model_name.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let registration = Self::build_registration(&model_name);

        Ok(Self {
            api_key: api_key.into(),
            model_name,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client: http_client(timeout_secs.unwrap_or(120))?,
            registration,
        })
    }

    /// Input/output prices in USD per 1M tokens.
    fn pricing(model: &str) -> (Decimal, Decimal) {
        if model.contains("haiku") {
            (Decimal::new(25, 2), Decimal::new(125, 2))
        } else if model.contains("sonnet") {
            (Decimal::new(3, 0), Decimal::new(15, 0))
        } else if model.contains("opus") {
            (Decimal::new(15, 0), Decimal::new(75, 0))
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        }
    }

    fn build_registration(model_name: &str) -> ProviderRegistration {
        let (input_rate, output_rate) = Self::pricing(model_name);
        let tier = if model_name.contains("haiku") {
            QualityTier::Economy
        } else {
            QualityTier::Premium
        };
        let llm = |capability: Capability, priority: u32| {
            CapabilityMetadata::new(capability, "anthropic")
                .with_cost(input_rate, CostUnit::Per1mTokens)
                .with_output_cost(output_rate)
                .with_quality(tier)
                .with_priority(priority)
                .with_model(model_name)
        };

        ProviderRegistration::new(
            "anthropic",
            ProviderType::External,
            vec![
                llm(Capability::LlmGeneration, 10).with_streaming(),
                llm(Capability::LlmStructured, 10),
                llm(Capability::Summarization, 10),
                llm(Capability::SentimentAnalysis, 15),
                // Coaching insights lean on long-context reasoning, where
                // Claude is the preferred engine.
                llm(Capability::CoachingAnalysis, 5),
            ],
        )
    }

    fn system_prompt(capability: Capability, options: &HashMap<String, Value>) -> Option<String> {
        match capability {
            Capability::Summarization => {
                let max_words = u64_option(options, "max_length").unwrap_or(500);
                Some(format!(
                    "Summarize the conversation below in at most {max_words} words. \
                     Keep speaker attributions, decisions, and follow-ups."
                ))
            }
            Capability::SentimentAnalysis => Some(
                "Assess the sentiment of each speaker in the conversation below."
                    .to_string(),
            ),
            Capability::CoachingAnalysis => Some(
                "You are a call-center coaching assistant. Review the conversation below \
                 and produce concrete coaching feedback for the agent: strengths, \
                 improvement areas, and suggested phrasing."
                    .to_string(),
            ),
            _ => str_option(options, "system_prompt"),
        }
    }

    /// Tool schema used to force structured output from the model.
    fn output_tool(options: &HashMap<String, Value>) -> Value {
        let schema = options.get("schema").cloned().unwrap_or_else(|| {
            json!({"type": "object", "additionalProperties": true})
        });
        json!({
            "name": "record_output",
            "description": "Record the structured result of the analysis.",
            "input_schema": schema,
        })
    }

    async fn messages(
        &self,
        capability: Capability,
        input: &Value,
        options: &HashMap<String, Value>,
    ) -> CallResult {
        let prompt = text_input(input)?;
        let model = str_option(options, "model").unwrap_or_else(|| self.model_name.clone());
        let structured = matches!(
            capability,
            Capability::LlmStructured | Capability::SentimentAnalysis
        );

        let mut payload = json!({
            "model": model,
            "max_tokens": u64_option(options, "max_tokens").unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(system) = Self::system_prompt(capability, options) {
            payload["system"] = json!(system);
        }
        if let Some(temperature) = f64_option(options, "temperature") {
            payload["temperature"] = json!(temperature);
        }
        if structured {
            payload["tools"] = json!([Self::output_tool(options)]);
            payload["tool_choice"] = json!({"type": "tool", "name": "record_output"});
        }

        debug!("anthropic messages request: model={model}");

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
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

        if let Some(error) = body.get("error") {
            return Err(ProviderCallError::response_parse(format!(
                "anthropic API error: {error}"
            )));
        }

        let mut usage = HashMap::new();
        usage.insert(
            "input_tokens".to_string(),
            body["usage"]["input_tokens"].as_f64().unwrap_or(0.0),
        );
        usage.insert(
            "output_tokens".to_string(),
            body["usage"]["output_tokens"].as_f64().unwrap_or(0.0),
        );

        let data = if structured {
            Self::tool_use_input(&body)?
        } else {
            let text = body["content"][0]["text"].as_str().ok_or_else(|| {
                ProviderCallError::response_parse("missing text content in Anthropic response")
            })?;
            json!({
                "text": text,
                "model": body["model"].as_str().unwrap_or(&model),
                "stop_reason": body["stop_reason"].as_str(),
            })
        };

        Ok(CallOutcome {
            data,
            usage,
            request_id: body["id"].as_str().map(String::from),
        })
    }

    fn tool_use_input(body: &Value) -> Result<Value, ProviderCallError> {
        body["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b["type"].as_str() == Some("tool_use"))
            })
            .map(|block| block["input"].clone())
            .ok_or_else(|| {
                ProviderCallError::response_parse("no tool_use block in Anthropic response")
            })
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
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
            Capability::LlmGeneration
            | Capability::LlmStructured
            | Capability::Summarization
            | Capability::SentimentAnalysis
            | Capability::CoachingAnalysis => self.messages(capability, &input, options).await,
            other => {
                return self.error_result(
                    other,
                    format!("anthropic does not serve capability '{other}'"),
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
                debug!("anthropic call failed: {err}");
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_by_model_family() {
        assert_eq!(
            AnthropicAdapter::pricing("claude-3-5-haiku"),
            (Decimal::new(25, 2), Decimal::new(125, 2))
        );
        assert_eq!(
            AnthropicAdapter::pricing("claude-sonnet-4-20250514"),
            (Decimal::new(3, 0), Decimal::new(15, 0))
        );
        assert_eq!(
            AnthropicAdapter::pricing("claude-opus-4"),
            (Decimal::new(15, 0), Decimal::new(75, 0))
        );
    }

    #[test]
    fn coaching_has_top_priority() {
        let adapter = AnthropicAdapter::new("sk-ant-test", None, None, None).unwrap();
        let registration = adapter.registration();
        let coaching = registration
            .get_capability(Capability::CoachingAnalysis)
            .unwrap();
        let generation = registration
            .get_capability(Capability::LlmGeneration)
            .unwrap();
        assert!(coaching.priority < generation.priority);
    }

    #[test]
    fn tool_use_extraction() {
        let body = json!({
            "content": [
                {"type": "text", "text": "thinking..."},
                {"type": "tool_use", "name": "record_output", "input": {"sentiment": "positive"}}
            ]
        });
        let data = AnthropicAdapter::tool_use_input(&body).unwrap();
        assert_eq!(data["sentiment"], "positive");

        let no_tool = json!({"content": [{"type": "text", "text": "hi"}]});
        assert!(AnthropicAdapter::tool_use_input(&no_tool).is_err());
    }

    #[tokio::test]
    async fn transcription_is_unsupported() {
        let adapter = AnthropicAdapter::new("sk-ant-test", None, None, None).unwrap();
        let result = adapter
            .execute(Capability::Transcription, json!("audio"), &HashMap::new())
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error_code.as_deref(),
            Some(codes::UNSUPPORTED_CAPABILITY)
        );
    }
}
