// crates/strand-engines/src/deepgram.rs

//! Deepgram adapter: transcription with diarization and dual-channel support.

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

use crate::base::{elapsed_ms, http_client, str_option, CallOutcome, CallResult};

const DEFAULT_BASE_URL: &str = "https://api.deepgram.com/v1";
const DEFAULT_MODEL: &str = "nova-2";

#[derive(Debug)]
pub struct DeepgramAdapter {
    api_key: String,
    model_name: String,
    base_url: String,
    client: Client,
    registration: ProviderRegistration,
}

impl DeepgramAdapter {
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

    /// Price in USD per minute of audio.
    fn pricing(model: &str) -> Decimal {
        if model.contains("nova") {
            Decimal::new(43, 4) // $0.0043/min
        } else if model.contains("enhanced") {
            Decimal::new(145, 4)
        } else {
            Decimal::new(125, 4)
        }
    }

    fn build_registration(model_name: &str) -> ProviderRegistration {
        let rate = Self::pricing(model_name);
        let transcription = |capability: Capability, priority: u32| {
            CapabilityMetadata::new(capability, "deepgram")
                .with_cost(rate, CostUnit::PerMinute)
                .with_quality(QualityTier::Premium)
                .with_priority(priority)
                .with_model(model_name)
                .with_languages(&["en", "es", "fr", "de", "pt", "nl", "hi", "ja"])
        };

        ProviderRegistration::new(
            "deepgram",
            ProviderType::External,
            vec![
                transcription(Capability::Transcription, 5),
                // Deepgram is the preferred engine for speaker diarization.
                transcription(Capability::TranscriptionDiarization, 1),
                transcription(Capability::TranscriptionDualChannel, 1),
            ],
        )
    }

    async fn transcribe(
        &self,
        capability: Capability,
        input: &Value,
        options: &HashMap<String, Value>,
    ) -> CallResult {
        let mut query: Vec<(String, String)> = vec![
            ("model".into(), self.model_name.clone()),
            ("punctuate".into(), "true".into()),
            ("smart_format".into(), "true".into()),
        ];
        if capability == Capability::TranscriptionDiarization {
            query.push(("diarize".into(), "true".into()));
        }
        if capability == Capability::TranscriptionDualChannel {
            query.push(("multichannel".into(), "true".into()));
        }
        if let Some(language) = str_option(options, "language") {
            query.push(("language".into(), language));
        }

        let request = self
            .client
            .post(format!("{}/listen", self.base_url))
            .query(&query)
            .header("Authorization", format!("Token {}", self.api_key));

        debug!("deepgram listen request: model={}", self.model_name);

        let response = if let Some(url) = input.get("audio_url").and_then(Value::as_str) {
            request.json(&json!({"url": url})).send().await?
        } else if let Some(audio) = input.get("audio_base64").and_then(Value::as_str) {
            let bytes = Base64.decode(audio).map_err(|e| {
                ProviderCallError::invalid_input(format!("invalid base64 audio: {e}"))
            })?;
            let mime = str_option(options, "mime_type").unwrap_or_else(|| "audio/wav".to_string());
            request
                .header("Content-Type", mime)
                .body(bytes)
                .send()
                .await?
        } else {
            return Err(ProviderCallError::invalid_input(
                "transcription input requires 'audio_url' or 'audio_base64'",
            ));
        };

        let status = response.status();
        let body: Value = if status.is_success() {
            response.json().await?
        } else {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderCallError::from_status(status.as_u16(), &text));
        };

        Self::parse_response(capability, &body)
    }

    fn parse_response(capability: Capability, body: &Value) -> CallResult {
        let duration = body["metadata"]["duration"].as_f64().unwrap_or(0.0);
        let channels = body["results"]["channels"].as_array().ok_or_else(|| {
            ProviderCallError::response_parse("missing channels in Deepgram response")
        })?;

        let alternative = |channel: &Value| channel["alternatives"][0].clone();

        let data = if capability == Capability::TranscriptionDualChannel {
            let per_channel: Vec<Value> = channels
                .iter()
                .enumerate()
                .map(|(i, ch)| {
                    let alt = alternative(ch);
                    json!({
                        "channel": i,
                        "text": alt["transcript"].as_str().unwrap_or(""),
                        "confidence": alt["confidence"].as_f64(),
                    })
                })
                .collect();
            json!({
                "channels": per_channel,
                "duration_seconds": duration,
            })
        } else {
            let alt = channels
                .first()
                .map(alternative)
                .ok_or_else(|| ProviderCallError::response_parse("empty channel list"))?;
            let mut segments = Vec::new();
            if let Some(words) = alt["words"].as_array() {
                segments = Self::segments_from_words(words);
            }
            json!({
                "text": alt["transcript"].as_str().unwrap_or(""),
                "confidence": alt["confidence"].as_f64(),
                "segments": segments,
                "duration_seconds": duration,
            })
        };

        let mut usage = HashMap::new();
        usage.insert("duration_seconds".to_string(), duration);

        Ok(CallOutcome {
            data,
            usage,
            request_id: body["metadata"]["request_id"].as_str().map(String::from),
        })
    }

    /// Group word-level output into per-speaker segments.
    fn segments_from_words(words: &[Value]) -> Vec<Value> {
        let mut segments: Vec<Value> = Vec::new();
        for word in words {
            let speaker = word["speaker"].as_u64().unwrap_or(0);
            let text = word["punctuated_word"]
                .as_str()
                .or_else(|| word["word"].as_str())
                .unwrap_or("");
            let start = word["start"].as_f64().unwrap_or(0.0);
            let end = word["end"].as_f64().unwrap_or(start);

            match segments.last_mut() {
                Some(last) if last["speaker"].as_u64() == Some(speaker) => {
                    let joined = format!("{} {}", last["text"].as_str().unwrap_or(""), text);
                    last["text"] = json!(joined.trim());
                    last["end"] = json!(end);
                }
                _ => segments.push(json!({
                    "speaker": speaker,
                    "text": text,
                    "start": start,
                    "end": end,
                })),
            }
        }
        segments
    }
}

#[async_trait]
impl ProviderAdapter for DeepgramAdapter {
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
            Capability::Transcription
            | Capability::TranscriptionDiarization
            | Capability::TranscriptionDualChannel => {
                self.transcribe(capability, &input, options).await
            }
            other => {
                return self.error_result(
                    other,
                    format!("deepgram does not serve capability '{other}'"),
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
                debug!("deepgram call failed: {err}");
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
    fn diarization_outranks_plain_transcription() {
        let adapter = DeepgramAdapter::new("dg-test", None, None, None).unwrap();
        let registration = adapter.registration();
        let diarization = registration
            .get_capability(Capability::TranscriptionDiarization)
            .unwrap();
        let plain = registration.get_capability(Capability::Transcription).unwrap();
        assert!(diarization.priority < plain.priority);
        assert_eq!(diarization.cost_per_unit, Decimal::new(43, 4));
    }

    #[test]
    fn parse_merges_words_into_speaker_segments() {
        let body = json!({
            "metadata": {"duration": 12.5, "request_id": "req-1"},
            "results": {"channels": [{
                "alternatives": [{
                    "transcript": "hello there agent speaking",
                    "confidence": 0.98,
                    "words": [
                        {"word": "hello", "speaker": 0, "start": 0.0, "end": 0.4},
                        {"word": "there", "speaker": 0, "start": 0.4, "end": 0.8},
                        {"word": "agent", "speaker": 1, "start": 1.0, "end": 1.4},
                        {"word": "speaking", "speaker": 1, "start": 1.4, "end": 1.9}
                    ]
                }]
            }]}
        });

        let outcome =
            DeepgramAdapter::parse_response(Capability::TranscriptionDiarization, &body).unwrap();
        let segments = outcome.data["segments"].as_array().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0]["text"], "hello there");
        assert_eq!(segments[1]["speaker"], 1);
        assert_eq!(outcome.usage["duration_seconds"], 12.5);
        assert_eq!(outcome.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn parse_dual_channel_reports_each_channel() {
        let body = json!({
            "metadata": {"duration": 30.0},
            "results": {"channels": [
                {"alternatives": [{"transcript": "agent side", "confidence": 0.9}]},
                {"alternatives": [{"transcript": "customer side", "confidence": 0.92}]}
            ]}
        });

        let outcome =
            DeepgramAdapter::parse_response(Capability::TranscriptionDualChannel, &body).unwrap();
        let channels = outcome.data["channels"].as_array().unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[1]["text"], "customer side");
    }

    #[tokio::test]
    async fn llm_capability_is_unsupported() {
        let adapter = DeepgramAdapter::new("dg-test", None, None, None).unwrap();
        let result = adapter
            .execute(Capability::LlmGeneration, json!("hi"), &HashMap::new())
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error_code.as_deref(),
            Some(codes::UNSUPPORTED_CAPABILITY)
        );
    }
}
