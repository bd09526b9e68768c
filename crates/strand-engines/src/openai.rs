// crates/strand-engines/src/openai.rs

//! OpenAI adapter: chat completions and Whisper transcription.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine as Base64Engine;
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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

#[derive(Debug)]
pub struct OpenAiAdapter {
    api_key: String,
    model_name: String,
    transcription_model: String,
    base_url: String,
    client: Client,
    registration: ProviderRegistration,
}

impl OpenAiAdapter {
    pub fn new(
        api_key: impl Into<String>,
        model_name: Option<String>,
        transcription_model: Option<String>,
        base_url: Option<String>,
        timeout_secs: Option<u64>,
    ) -> anyhow::Result<Self> {
        let model_name = model_name.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let transcription_model =
            transcription_model.unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string());
        let registration = Self::build_registration(&model_name, &transcription_model);

        Ok(Self {
            api_key: api_key.into(),
            model_name,
            transcription_model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client: http_client(timeout_secs.unwrap_or(120))?,
            registration,
        })
    }

    /// Input/output prices in USD per 1M tokens.
    fn pricing(model: &str) -> (Decimal, Decimal) {
        if model.contains("4o-mini") {
            (Decimal::new(15, 2), Decimal::new(60, 2))
        } else if model.contains("4o") {
            (Decimal::new(250, 2), Decimal::new(1000, 2))
        } else if model.contains("3.5") {
            (Decimal::new(50, 2), Decimal::new(150, 2))
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        }
    }

    fn build_registration(model_name: &str, transcription_model: &str) -> ProviderRegistration {
        let (input_rate, output_rate) = Self::pricing(model_name);
        let llm = |capability: Capability| {
            CapabilityMetadata::new(capability, "openai")
                .with_cost(input_rate, CostUnit::Per1mTokens)
                .with_output_cost(output_rate)
                .with_quality(QualityTier::Standard)
                .with_priority(20)
                .with_model(model_name)
        };

        ProviderRegistration::new(
            "openai",
            ProviderType::External,
            vec![
                llm(Capability::LlmGeneration).with_streaming(),
                llm(Capability::LlmStructured),
                llm(Capability::Summarization),
                llm(Capability::SentimentAnalysis),
                // Whisper is priced per minute of audio.
                CapabilityMetadata::new(Capability::Transcription, "openai")
                    .with_cost(Decimal::new(6, 3), CostUnit::PerMinute)
                    .with_quality(QualityTier::Standard)
                    .with_priority(10)
                    .with_model(transcription_model)
                    .with_languages(&["en", "es", "fr", "de", "pt", "ja"]),
            ],
        )
    }

    fn system_prompt(capability: Capability, options: &HashMap<String, Value>) -> Option<String> {
        match capability {
            Capability::Summarization => {
                let max_words = u64_option(options, "max_length").unwrap_or(500);
                Some(format!(
                    "Summarize the following text in at most {max_words} words. \
                     Preserve key facts, decisions, and action items."
                ))
            }
            Capability::SentimentAnalysis => Some(
                "Analyze the sentiment of the following text. Respond with a JSON object \
                 containing 'sentiment' (positive, negative, or neutral), 'confidence' \
                 (0.0-1.0), and 'notes'."
                    .to_string(),
            ),
            _ => str_option(options, "system_prompt"),
        }
    }

    async fn chat(
        &self,
        capability: Capability,
        input: &Value,
        options: &HashMap<String, Value>,
    ) -> CallResult {
        let prompt = text_input(input)?;
        let model = str_option(options, "model").unwrap_or_else(|| self.model_name.clone());

        let mut messages = Vec::new();
        if let Some(system) = Self::system_prompt(capability, options) {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let mut payload = json!({
            "model": model,
            "messages": messages,
        });
        if let Some(temperature) = f64_option(options, "temperature") {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = u64_option(options, "max_tokens") {
            payload["max_tokens"] = json!(max_tokens);
        }
        let structured = capability == Capability::LlmStructured
            || capability == Capability::SentimentAnalysis;
        if structured {
            payload["response_format"] = json!({"type": "json_object"});
        }

        debug!("openai chat request: model={model}");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ProviderCallError::response_parse("missing message content in OpenAI response")
            })?
            .to_string();

        let mut usage = HashMap::new();
        usage.insert(
            "input_tokens".to_string(),
            body["usage"]["prompt_tokens"].as_f64().unwrap_or(0.0),
        );
        usage.insert(
            "output_tokens".to_string(),
            body["usage"]["completion_tokens"].as_f64().unwrap_or(0.0),
        );

        let data = if structured {
            serde_json::from_str::<Value>(&content).map_err(|e| {
                ProviderCallError::response_parse(format!("invalid JSON from model: {e}"))
            })?
        } else {
            json!({
                "text": content,
                "model": body["model"].as_str().unwrap_or(&model),
                "finish_reason": body["choices"][0]["finish_reason"].as_str(),
            })
        };

        Ok(CallOutcome {
            data,
            usage,
            request_id: body["id"].as_str().map(String::from),
        })
    }

    async fn transcribe(&self, input: &Value, options: &HashMap<String, Value>) -> CallResult {
        let audio = input
            .get("audio_base64")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderCallError::invalid_input("transcription input requires 'audio_base64'")
            })?;
        let bytes = Base64
            .decode(audio)
            .map_err(|e| ProviderCallError::invalid_input(format!("invalid base64 audio: {e}")))?;

        let file_name = input
            .get("file_name")
            .and_then(Value::as_str)
            .unwrap_or("audio.wav")
            .to_string();

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.transcription_model.clone())
            .text("response_format", "verbose_json")
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        if let Some(language) = str_option(options, "language") {
            form = form.text("language", language);
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body: Value = if status.is_success() {
            response.json().await?
        } else {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderCallError::from_status(status.as_u16(), &text));
        };

        let text = body["text"].as_str().ok_or_else(|| {
            ProviderCallError::response_parse("missing text in transcription response")
        })?;
        let duration = body["duration"].as_f64().unwrap_or(0.0);

        let mut usage = HashMap::new();
        usage.insert("duration_seconds".to_string(), duration);

        Ok(CallOutcome {
            data: json!({
                "text": text,
                "language": body["language"].as_str(),
                "duration_seconds": duration,
            }),
            usage,
            request_id: None,
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
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
            | Capability::SentimentAnalysis => self.chat(capability, &input, options).await,
            Capability::Transcription => self.transcribe(&input, options).await,
            other => {
                return self.error_result(
                    other,
                    format!("openai does not serve capability '{other}'"),
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
                debug!("openai call failed: {err}");
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
