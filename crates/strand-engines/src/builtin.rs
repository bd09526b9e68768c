// crates/strand-engines/src/builtin.rs

//! Built-in provider registration.
//!
//! Registers the bundled adapters (OpenAI, Anthropic, Deepgram, internal
//! redaction service) with a capability registry at startup. Each provider
//! stores a factory so the executor can create adapters lazily with
//! per-call api keys and model overrides; the defaults captured here come
//! from `ProviderSettings`.

use std::sync::Arc;

use anyhow::anyhow;
use log::info;
use serde::{Deserialize, Serialize};

use strand_core::ProviderAdapter;

use crate::anthropic::AnthropicAdapter;
use crate::deepgram::DeepgramAdapter;
use crate::openai::OpenAiAdapter;
use crate::redaction::RedactionAdapter;
use crate::registry::{AdapterConfig, AdapterFactory, CapabilityRegistry};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub model_name: Option<String>,
    pub transcription_model: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicSettings {
    pub api_key: String,
    pub model_name: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepgramSettings {
    pub api_key: String,
    pub model_name: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedactionSettings {
    pub service_url: Option<String>,
    pub entity_types: Option<Vec<String>>,
    pub confidence_threshold: Option<f64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Configuration for the built-in provider set.
///
/// External providers register only when configured with an api key; the
/// internal redaction service registers unconditionally unless disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub openai: Option<OpenAiSettings>,
    pub anthropic: Option<AnthropicSettings>,
    pub deepgram: Option<DeepgramSettings>,
    pub redaction: Option<RedactionSettings>,
}

/// Register all configured built-in providers with the registry.
pub fn register_builtin_providers(
    registry: &CapabilityRegistry,
    settings: &ProviderSettings,
) -> anyhow::Result<()> {
    let mut registered = 0usize;

    if let Some(openai) = settings.openai.as_ref().filter(|s| s.enabled) {
        register_openai(registry, openai)?;
        registered += 1;
    }
    if let Some(anthropic) = settings.anthropic.as_ref().filter(|s| s.enabled) {
        register_anthropic(registry, anthropic)?;
        registered += 1;
    }
    if let Some(deepgram) = settings.deepgram.as_ref().filter(|s| s.enabled) {
        register_deepgram(registry, deepgram)?;
        registered += 1;
    }

    let redaction = settings.redaction.clone().unwrap_or_default();
    if redaction.enabled {
        register_redaction(registry, &redaction)?;
        registered += 1;
    }

    info!("registered {registered} built-in providers");
    Ok(())
}

fn register_openai(registry: &CapabilityRegistry, settings: &OpenAiSettings) -> anyhow::Result<()> {
    let registration = OpenAiAdapter::new(
        settings.api_key.clone(),
        settings.model_name.clone(),
        settings.transcription_model.clone(),
        settings.base_url.clone(),
        None,
    )?
    .registration();

    let defaults = settings.clone();
    let factory: AdapterFactory = Arc::new(move |config: &AdapterConfig| {
        let api_key = config
            .api_key
            .clone()
            .unwrap_or_else(|| defaults.api_key.clone());
        if api_key.is_empty() {
            return Err(anyhow!("OpenAI API key is required"));
        }
        let adapter = OpenAiAdapter::new(
            api_key,
            config.model_name.clone().or_else(|| defaults.model_name.clone()),
            defaults.transcription_model.clone(),
            config.base_url.clone().or_else(|| defaults.base_url.clone()),
            config.timeout_secs,
        )?;
        Ok(Arc::new(adapter) as Arc<dyn ProviderAdapter>)
    });

    registry.register_provider(registration, Some(factory));
    Ok(())
}

fn register_anthropic(
    registry: &CapabilityRegistry,
    settings: &AnthropicSettings,
) -> anyhow::Result<()> {
    let registration = AnthropicAdapter::new(
        settings.api_key.clone(),
        settings.model_name.clone(),
        settings.base_url.clone(),
        None,
    )?
    .registration();

    let defaults = settings.clone();
    let factory: AdapterFactory = Arc::new(move |config: &AdapterConfig| {
        let api_key = config
            .api_key
            .clone()
            .unwrap_or_else(|| defaults.api_key.clone());
        if api_key.is_empty() {
            return Err(anyhow!("Anthropic API key is required"));
        }
        let adapter = AnthropicAdapter::new(
            api_key,
            config.model_name.clone().or_else(|| defaults.model_name.clone()),
            config.base_url.clone().or_else(|| defaults.base_url.clone()),
            config.timeout_secs,
        )?;
        Ok(Arc::new(adapter) as Arc<dyn ProviderAdapter>)
    });

    registry.register_provider(registration, Some(factory));
    Ok(())
}

fn register_deepgram(
    registry: &CapabilityRegistry,
    settings: &DeepgramSettings,
) -> anyhow::Result<()> {
    let registration = DeepgramAdapter::new(
        settings.api_key.clone(),
        settings.model_name.clone(),
        settings.base_url.clone(),
        None,
    )?
    .registration();

    let defaults = settings.clone();
    let factory: AdapterFactory = Arc::new(move |config: &AdapterConfig| {
        let api_key = config
            .api_key
            .clone()
            .unwrap_or_else(|| defaults.api_key.clone());
        if api_key.is_empty() {
            return Err(anyhow!("Deepgram API key is required"));
        }
        let adapter = DeepgramAdapter::new(
            api_key,
            config.model_name.clone().or_else(|| defaults.model_name.clone()),
            config.base_url.clone().or_else(|| defaults.base_url.clone()),
            config.timeout_secs,
        )?;
        Ok(Arc::new(adapter) as Arc<dyn ProviderAdapter>)
    });

    registry.register_provider(registration, Some(factory));
    Ok(())
}

fn register_redaction(
    registry: &CapabilityRegistry,
    settings: &RedactionSettings,
) -> anyhow::Result<()> {
    let registration = RedactionAdapter::new(
        settings.service_url.clone(),
        settings.entity_types.clone(),
        settings.confidence_threshold,
        None,
    )?
    .registration();

    let defaults = settings.clone();
    let factory: AdapterFactory = Arc::new(move |config: &AdapterConfig| {
        let adapter = RedactionAdapter::new(
            config.base_url.clone().or_else(|| defaults.service_url.clone()),
            defaults.entity_types.clone(),
            defaults.confidence_threshold,
            config.timeout_secs,
        )?;
        Ok(Arc::new(adapter) as Arc<dyn ProviderAdapter>)
    });

    registry.register_provider(registration, Some(factory));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::Capability;

    #[test]
    fn redaction_registers_without_configuration() {
        let registry = CapabilityRegistry::new();
        register_builtin_providers(&registry, &ProviderSettings::default()).unwrap();

        assert!(registry.get_provider("redaction").is_some());
        assert!(registry.is_capability_available(Capability::PiiRedaction));
        assert!(registry.get_provider("openai").is_none());
    }

    #[test]
    fn configured_providers_register_with_factories() {
        let registry = CapabilityRegistry::new();
        let settings = ProviderSettings {
            openai: Some(OpenAiSettings {
                api_key: "sk-test".into(),
                model_name: None,
                transcription_model: None,
                base_url: None,
                enabled: true,
            }),
            deepgram: Some(DeepgramSettings {
                api_key: "dg-test".into(),
                model_name: None,
                base_url: None,
                enabled: true,
            }),
            ..Default::default()
        };
        register_builtin_providers(&registry, &settings).unwrap();

        let adapter = registry
            .create_adapter("openai", &AdapterConfig::default())
            .unwrap();
        assert_eq!(adapter.provider_name(), "openai");

        let chain =
            registry.build_fallback_chain(Capability::Transcription, Some("deepgram"), 2, &[], true);
        assert_eq!(chain, vec!["deepgram", "openai"]);
    }

    #[test]
    fn disabled_provider_is_skipped() {
        let registry = CapabilityRegistry::new();
        let settings = ProviderSettings {
            anthropic: Some(AnthropicSettings {
                api_key: "sk-ant".into(),
                model_name: None,
                base_url: None,
                enabled: false,
            }),
            ..Default::default()
        };
        register_builtin_providers(&registry, &settings).unwrap();
        assert!(registry.get_provider("anthropic").is_none());
    }
}
