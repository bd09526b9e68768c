// crates/strand-engines/src/registry.rs

//! Capability Registry for provider discovery and routing
//!
//! The registry is the central index of provider registrations:
//!
//! - provider name -> registration (capabilities, availability)
//! - capability -> provider names (inverted index)
//! - provider name -> adapter factory (lazy instantiation)
//!
//! Registration happens at startup; runtime operations are read-mostly.
//! The only runtime mutation is the availability flag, which fallback
//! chains consult on every build.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use log::{info, warn};
use rust_decimal::Decimal;
use thiserror::Error;

use strand_core::types::{
    Capability, CapabilityMetadata, CostInputs, ProviderRegistration, QualityTier,
};
use strand_core::ProviderAdapter;

/// Per-call configuration handed to an adapter factory.
#[derive(Debug, Clone, Default)]
pub struct AdapterConfig {
    pub api_key: Option<String>,
    pub model_name: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Factory creating adapter instances on demand.
///
/// Factories are stored instead of instances so adapters can be created
/// lazily with per-call api keys and model overrides.
pub type AdapterFactory =
    Arc<dyn Fn(&AdapterConfig) -> anyhow::Result<Arc<dyn ProviderAdapter>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("provider '{0}' is not registered")]
    UnknownProvider(String),
    #[error("no adapter factory registered for provider '{0}'")]
    NoFactory(String),
    #[error("failed to create adapter for provider '{provider}': {source}")]
    AdapterInit {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Default)]
struct RegistryInner {
    providers: HashMap<String, ProviderRegistration>,
    capability_index: HashMap<Capability, Vec<String>>,
    factories: HashMap<String, AdapterFactory>,
}

/// Central registry for AI provider capabilities.
///
/// Safe for concurrent reads; registration is expected at startup only.
/// Availability flips at runtime are atomic with respect to readers.
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<RegistryInner>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider with its capabilities.
    ///
    /// Idempotent by provider name: re-registration replaces the previous
    /// registration and rebuilds the affected index entries.
    pub fn register_provider(
        &self,
        registration: ProviderRegistration,
        adapter_factory: Option<AdapterFactory>,
    ) {
        let name = registration.provider_name.clone();
        let mut inner = self.write_lock();

        if inner.providers.contains_key(&name) {
            warn!("provider '{name}' already registered, replacing registration");
            Self::remove_from_index(&mut inner, &name);
        }

        for cap_meta in &registration.capabilities {
            let entry = inner.capability_index.entry(cap_meta.capability).or_default();
            if !entry.contains(&name) {
                entry.push(name.clone());
            }
        }

        info!(
            "registered provider '{}' with {} capabilities",
            name,
            registration.capabilities.len()
        );

        inner.providers.insert(name.clone(), registration);
        if let Some(factory) = adapter_factory {
            inner.factories.insert(name, factory);
        }
    }

    /// Remove a provider. Returns false if it was not registered.
    pub fn unregister_provider(&self, provider_name: &str) -> bool {
        let mut inner = self.write_lock();
        if inner.providers.remove(provider_name).is_none() {
            return false;
        }
        Self::remove_from_index(&mut inner, provider_name);
        inner.factories.remove(provider_name);
        info!("unregistered provider '{provider_name}'");
        true
    }

    pub fn get_provider(&self, provider_name: &str) -> Option<ProviderRegistration> {
        self.read_lock().providers.get(provider_name).cloned()
    }

    pub fn get_all_providers(&self) -> Vec<ProviderRegistration> {
        let inner = self.read_lock();
        let mut providers: Vec<_> = inner.providers.values().cloned().collect();
        providers.sort_by(|a, b| a.provider_name.cmp(&b.provider_name));
        providers
    }

    /// All capabilities with at least one registered provider.
    pub fn get_all_capabilities(&self) -> Vec<Capability> {
        let inner = self.read_lock();
        inner
            .capability_index
            .iter()
            .filter(|(_, names)| !names.is_empty())
            .map(|(cap, _)| *cap)
            .collect()
    }

    pub fn get_capability_metadata(
        &self,
        capability: Capability,
        provider_name: &str,
    ) -> Option<CapabilityMetadata> {
        self.read_lock()
            .providers
            .get(provider_name)
            .and_then(|reg| reg.get_capability(capability).cloned())
    }

    /// All providers offering a capability, sorted ascending by priority.
    ///
    /// Ties break on provider name so chains are reproducible across runs.
    pub fn get_providers_for_capability(
        &self,
        capability: Capability,
        quality_tier: Option<QualityTier>,
        exclude_providers: &[String],
        only_available: bool,
    ) -> Vec<ProviderRegistration> {
        let exclude: HashSet<&str> = exclude_providers.iter().map(String::as_str).collect();
        let inner = self.read_lock();

        let names = match inner.capability_index.get(&capability) {
            Some(names) => names,
            None => return Vec::new(),
        };

        let mut results: Vec<(u32, ProviderRegistration)> = Vec::new();
        for name in names {
            if exclude.contains(name.as_str()) {
                continue;
            }
            let Some(registration) = inner.providers.get(name) else {
                continue;
            };
            if only_available && !registration.is_available {
                continue;
            }
            let Some(cap_meta) = registration.get_capability(capability) else {
                continue;
            };
            if let Some(tier) = quality_tier {
                if cap_meta.quality_tier != tier {
                    continue;
                }
            }
            results.push((cap_meta.priority, registration.clone()));
        }

        results.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.provider_name.cmp(&b.1.provider_name))
        });
        results.into_iter().map(|(_, reg)| reg).collect()
    }

    /// Cheapest available provider for a capability at or above a tier.
    ///
    /// Ranks by input cost per unit only; output pricing is not weighed in,
    /// so token-heavy LLM workloads should compare via `estimate_cost`
    /// with a representative usage mix instead.
    pub fn get_cheapest_provider(
        &self,
        capability: Capability,
        min_quality_tier: QualityTier,
        exclude_providers: &[String],
    ) -> Option<String> {
        let providers =
            self.get_providers_for_capability(capability, None, exclude_providers, true);

        let mut cheapest: Option<(Decimal, String)> = None;
        for registration in providers {
            let Some(cap_meta) = registration.get_capability(capability) else {
                continue;
            };
            if cap_meta.quality_tier < min_quality_tier {
                continue;
            }
            let cost = cap_meta.cost_per_unit;
            match &cheapest {
                Some((best, _)) if cost >= *best => {}
                _ => cheapest = Some((cost, registration.provider_name.clone())),
            }
        }
        cheapest.map(|(_, name)| name)
    }

    /// Build an ordered fallback chain for a capability.
    ///
    /// The primary provider leads the chain when it is registered,
    /// available, and supports the capability. Remaining providers follow
    /// in priority order; with `prefer_same_quality` they are re-sorted so
    /// providers sharing the primary's quality tier come first. The chain
    /// is capped at `max_fallbacks` entries plus the primary.
    pub fn build_fallback_chain(
        &self,
        capability: Capability,
        primary_provider: Option<&str>,
        max_fallbacks: usize,
        exclude_providers: &[String],
        prefer_same_quality: bool,
    ) -> Vec<String> {
        let mut exclude: Vec<String> = exclude_providers.to_vec();
        let mut chain: Vec<String> = Vec::new();
        let mut primary_tier: Option<QualityTier> = None;

        if let Some(primary) = primary_provider {
            if !exclude.iter().any(|e| e == primary) {
                if let Some(registration) = self.get_provider(primary) {
                    if registration.is_available && registration.supports(capability) {
                        primary_tier = registration
                            .get_capability(capability)
                            .map(|m| m.quality_tier);
                        chain.push(primary.to_string());
                        exclude.push(primary.to_string());
                    }
                }
            }
        }

        let mut providers =
            self.get_providers_for_capability(capability, None, &exclude, true);

        if prefer_same_quality {
            if let Some(tier) = primary_tier {
                // Stable sort keeps the priority ordering within each group.
                providers.sort_by_key(|reg| {
                    reg.get_capability(capability)
                        .map(|m| m.quality_tier != tier)
                        .unwrap_or(true)
                });
            }
        }

        let limit = max_fallbacks + usize::from(!chain.is_empty());
        for registration in providers {
            if chain.len() >= limit {
                break;
            }
            chain.push(registration.provider_name);
        }

        chain
    }

    /// Create an adapter instance through the stored factory.
    pub fn create_adapter(
        &self,
        provider_name: &str,
        config: &AdapterConfig,
    ) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        let factory = {
            let inner = self.read_lock();
            if !inner.providers.contains_key(provider_name) {
                return Err(RegistryError::UnknownProvider(provider_name.to_string()));
            }
            inner
                .factories
                .get(provider_name)
                .cloned()
                .ok_or_else(|| RegistryError::NoFactory(provider_name.to_string()))?
        };

        factory(config).map_err(|source| RegistryError::AdapterInit {
            provider: provider_name.to_string(),
            source,
        })
    }

    /// Whether at least one available provider offers a capability.
    pub fn is_capability_available(&self, capability: Capability) -> bool {
        !self
            .get_providers_for_capability(capability, None, &[], true)
            .is_empty()
    }

    /// Estimate cost for an operation; `None` if the provider does not
    /// offer the capability.
    pub fn estimate_cost(
        &self,
        capability: Capability,
        provider_name: &str,
        inputs: CostInputs,
    ) -> Option<Decimal> {
        self.get_capability_metadata(capability, provider_name)
            .map(|meta| meta.estimate_cost(inputs))
    }

    /// Exclude a provider from future fallback chains.
    pub fn mark_provider_unavailable(&self, provider_name: &str) {
        let mut inner = self.write_lock();
        if let Some(registration) = inner.providers.get_mut(provider_name) {
            registration.is_available = false;
            warn!("provider marked unavailable: {provider_name}");
        }
    }

    pub fn mark_provider_available(&self, provider_name: &str) {
        let mut inner = self.write_lock();
        if let Some(registration) = inner.providers.get_mut(provider_name) {
            registration.is_available = true;
            info!("provider marked available: {provider_name}");
        }
    }

    fn remove_from_index(inner: &mut RegistryInner, provider_name: &str) {
        for names in inner.capability_index.values_mut() {
            names.retain(|n| n != provider_name);
        }
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::types::{CostUnit, ProviderType};

    fn registration(name: &str, capability: Capability, priority: u32, tier: QualityTier) -> ProviderRegistration {
        ProviderRegistration::new(
            name,
            ProviderType::External,
            vec![CapabilityMetadata::new(capability, name)
                .with_cost(Decimal::new(priority as i64, 3), CostUnit::PerMinute)
                .with_quality(tier)
                .with_priority(priority)],
        )
    }

    #[test]
    fn register_and_lookup() {
        let registry = CapabilityRegistry::new();
        let reg = registration("deepgram", Capability::Transcription, 5, QualityTier::Premium);
        registry.register_provider(reg.clone(), None);

        let fetched = registry.get_provider("deepgram").expect("provider registered");
        assert_eq!(fetched.provider_name, "deepgram");
        let providers =
            registry.get_providers_for_capability(Capability::Transcription, None, &[], true);
        assert_eq!(providers.len(), 1);
    }

    #[test]
    fn reregistering_the_same_provider_is_a_no_op() {
        let registry = CapabilityRegistry::new();
        let reg = registration("openai", Capability::Transcription, 10, QualityTier::Standard);
        registry.register_provider(reg.clone(), None);
        registry.register_provider(reg, None);

        assert_eq!(registry.get_all_providers().len(), 1);
        assert_eq!(
            registry
                .get_providers_for_capability(Capability::Transcription, None, &[], true)
                .len(),
            1
        );
    }

    #[test]
    fn reregistration_replaces() {
        let registry = CapabilityRegistry::new();
        registry.register_provider(
            registration("openai", Capability::Transcription, 10, QualityTier::Standard),
            None,
        );
        registry.register_provider(
            registration("openai", Capability::LlmGeneration, 20, QualityTier::Standard),
            None,
        );

        // The old capability entry must be gone after replacement.
        assert!(registry
            .get_providers_for_capability(Capability::Transcription, None, &[], true)
            .is_empty());
        assert_eq!(
            registry
                .get_providers_for_capability(Capability::LlmGeneration, None, &[], true)
                .len(),
            1
        );
    }

    #[test]
    fn providers_sorted_by_priority_then_name() {
        let registry = CapabilityRegistry::new();
        registry.register_provider(
            registration("whisper", Capability::Transcription, 10, QualityTier::Standard),
            None,
        );
        registry.register_provider(
            registration("assembly", Capability::Transcription, 10, QualityTier::Standard),
            None,
        );
        registry.register_provider(
            registration("deepgram", Capability::Transcription, 5, QualityTier::Premium),
            None,
        );

        let names: Vec<String> = registry
            .get_providers_for_capability(Capability::Transcription, None, &[], true)
            .into_iter()
            .map(|r| r.provider_name)
            .collect();
        assert_eq!(names, vec!["deepgram", "assembly", "whisper"]);
    }

    #[test]
    fn fallback_chain_starts_with_primary_and_respects_limit() {
        let registry = CapabilityRegistry::new();
        registry.register_provider(
            registration("a", Capability::Transcription, 1, QualityTier::Standard),
            None,
        );
        registry.register_provider(
            registration("b", Capability::Transcription, 2, QualityTier::Standard),
            None,
        );
        registry.register_provider(
            registration("c", Capability::Transcription, 3, QualityTier::Standard),
            None,
        );

        let chain =
            registry.build_fallback_chain(Capability::Transcription, Some("b"), 1, &[], true);
        assert_eq!(chain, vec!["b", "a"]);

        // No duplicates, respects exclusions.
        let chain = registry.build_fallback_chain(
            Capability::Transcription,
            Some("b"),
            3,
            &["a".to_string()],
            true,
        );
        assert_eq!(chain, vec!["b", "c"]);
    }

    #[test]
    fn fallback_chain_empty_with_no_primary_and_zero_fallbacks() {
        let registry = CapabilityRegistry::new();
        registry.register_provider(
            registration("a", Capability::Transcription, 1, QualityTier::Standard),
            None,
        );
        let chain = registry.build_fallback_chain(Capability::Transcription, None, 0, &[], true);
        assert!(chain.is_empty());
    }

    #[test]
    fn fallback_chain_prefers_primary_quality_tier() {
        let registry = CapabilityRegistry::new();
        registry.register_provider(
            registration("premium_b", Capability::Transcription, 8, QualityTier::Premium),
            None,
        );
        registry.register_provider(
            registration("econ_a", Capability::Transcription, 2, QualityTier::Economy),
            None,
        );
        registry.register_provider(
            registration("premium_a", Capability::Transcription, 4, QualityTier::Premium),
            None,
        );

        let chain = registry.build_fallback_chain(
            Capability::Transcription,
            Some("premium_b"),
            3,
            &[],
            true,
        );
        // Same-tier fallback first even though the economy option has a
        // better priority.
        assert_eq!(chain, vec!["premium_b", "premium_a", "econ_a"]);
    }

    #[test]
    fn unavailable_providers_are_skipped() {
        let registry = CapabilityRegistry::new();
        registry.register_provider(
            registration("a", Capability::Transcription, 1, QualityTier::Standard),
            None,
        );
        registry.register_provider(
            registration("b", Capability::Transcription, 2, QualityTier::Standard),
            None,
        );

        registry.mark_provider_unavailable("a");
        let chain =
            registry.build_fallback_chain(Capability::Transcription, Some("a"), 2, &[], true);
        assert_eq!(chain, vec!["b"]);

        registry.mark_provider_available("a");
        let chain =
            registry.build_fallback_chain(Capability::Transcription, Some("a"), 2, &[], true);
        assert_eq!(chain, vec!["a", "b"]);
    }

    #[test]
    fn cheapest_provider_respects_min_tier() {
        let registry = CapabilityRegistry::new();
        registry.register_provider(
            ProviderRegistration::new(
                "cheap",
                ProviderType::External,
                vec![CapabilityMetadata::new(Capability::LlmGeneration, "cheap")
                    .with_cost(Decimal::new(1, 2), CostUnit::Per1mTokens)
                    .with_quality(QualityTier::Economy)],
            ),
            None,
        );
        registry.register_provider(
            ProviderRegistration::new(
                "solid",
                ProviderType::External,
                vec![CapabilityMetadata::new(Capability::LlmGeneration, "solid")
                    .with_cost(Decimal::new(3, 0), CostUnit::Per1mTokens)
                    .with_quality(QualityTier::Standard)],
            ),
            None,
        );

        assert_eq!(
            registry.get_cheapest_provider(Capability::LlmGeneration, QualityTier::Economy, &[]),
            Some("cheap".to_string())
        );
        assert_eq!(
            registry.get_cheapest_provider(Capability::LlmGeneration, QualityTier::Standard, &[]),
            Some("solid".to_string())
        );
    }

    #[test]
    fn create_adapter_requires_registration_and_factory() {
        let registry = CapabilityRegistry::new();
        let err = registry
            .create_adapter("ghost", &AdapterConfig::default())
            .expect_err("unknown provider");
        assert!(matches!(err, RegistryError::UnknownProvider(_)));

        registry.register_provider(
            registration("a", Capability::Transcription, 1, QualityTier::Standard),
            None,
        );
        let err = registry
            .create_adapter("a", &AdapterConfig::default())
            .expect_err("no factory");
        assert!(matches!(err, RegistryError::NoFactory(_)));
    }
}
