// crates/strand-engines/src/base.rs

//! Shared plumbing for provider adapters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;

use strand_core::error::ProviderCallError;

/// Successful provider call, before it is wrapped into an OperationResult.
pub(crate) struct CallOutcome {
    pub data: Value,
    pub usage: HashMap<String, f64>,
    pub request_id: Option<String>,
}

pub(crate) type CallResult = Result<CallOutcome, ProviderCallError>;

pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Reusable HTTP client with connection pooling, shared by all adapters.
pub(crate) fn http_client(timeout_secs: u64) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to create HTTP client: {e}"))
}

/// String option lookup, accepting only string-valued entries.
pub(crate) fn str_option(options: &HashMap<String, Value>, key: &str) -> Option<String> {
    options.get(key).and_then(|v| v.as_str()).map(String::from)
}

pub(crate) fn u64_option(options: &HashMap<String, Value>, key: &str) -> Option<u64> {
    options.get(key).and_then(Value::as_u64)
}

pub(crate) fn f64_option(options: &HashMap<String, Value>, key: &str) -> Option<f64> {
    options.get(key).and_then(Value::as_f64)
}

/// Extract the text payload for an LLM-style capability.
///
/// Accepts a bare string, `{"prompt": ...}`, or `{"text": ...}`.
pub(crate) fn text_input(input: &Value) -> Result<String, ProviderCallError> {
    if let Some(s) = input.as_str() {
        return Ok(s.to_string());
    }
    if let Some(obj) = input.as_object() {
        for key in ["prompt", "text"] {
            if let Some(s) = obj.get(key).and_then(Value::as_str) {
                return Ok(s.to_string());
            }
        }
        // A transcript-shaped object is flattened into its text.
        if let Some(s) = obj
            .get("transcript")
            .and_then(|t| t.get("text"))
            .and_then(Value::as_str)
        {
            return Ok(s.to_string());
        }
    }
    Err(ProviderCallError::invalid_input(
        "input must be a string or an object with a 'prompt' or 'text' field",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_input_accepts_string_and_object_shapes() {
        assert_eq!(text_input(&json!("hi")).unwrap(), "hi");
        assert_eq!(text_input(&json!({"prompt": "p"})).unwrap(), "p");
        assert_eq!(text_input(&json!({"text": "t"})).unwrap(), "t");
        assert_eq!(
            text_input(&json!({"transcript": {"text": "deep"}})).unwrap(),
            "deep"
        );
        assert!(text_input(&json!({"audio": []})).is_err());
    }
}
