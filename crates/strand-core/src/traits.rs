// crates/strand-core/src/traits.rs

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::types::{
    Capability, CapabilityMetadata, CostInputs, OperationResult, ProviderRegistration,
};

/// Uniform interface over a concrete AI provider.
///
/// An adapter declares its registration (capabilities plus cost and quality
/// metadata) and exposes a single async `execute` dispatch method.
///
/// Behavioral contract:
/// - `execute` never fails with an `Err` for operation failures. All
///   provider errors are captured into `OperationResult { success: false }`
///   with an error code and retryability flag, so the executor's fallback
///   and retry logic can act on them.
/// - `latency_ms` reflects measured wall time of the call.
/// - `cost_usd` is derived from provider-reported usage through the
///   capability's metadata; when usage is missing the cost is zero.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    /// The provider's registration with all supported capabilities.
    fn registration(&self) -> ProviderRegistration;

    /// Execute an AI operation, routing internally on `capability`.
    async fn execute(
        &self,
        capability: Capability,
        input: Value,
        options: &HashMap<String, Value>,
    ) -> OperationResult;

    /// Whether the provider is healthy and reachable.
    ///
    /// Default implementation reports healthy; adapters for internal
    /// services override this to ping their health endpoint.
    async fn health_check(&self) -> bool {
        true
    }

    fn provider_name(&self) -> String {
        self.registration().provider_name
    }

    fn supports(&self, capability: Capability) -> bool {
        self.registration().supports(capability)
    }

    fn capability_metadata(&self, capability: Capability) -> Option<CapabilityMetadata> {
        self.registration().get_capability(capability).cloned()
    }

    /// Cost of an operation given raw usage, via the capability's metadata.
    fn cost_for(&self, capability: Capability, usage: &HashMap<String, f64>) -> Decimal {
        match self.capability_metadata(capability) {
            Some(meta) => meta.estimate_cost(CostInputs::from_usage(usage)),
            None => Decimal::ZERO,
        }
    }

    /// Build a successful result with cost derived from usage.
    fn success_result(
        &self,
        capability: Capability,
        data: Value,
        usage: HashMap<String, f64>,
        latency_ms: f64,
        request_id: Option<String>,
    ) -> OperationResult {
        let cost = self.cost_for(capability, &usage);
        let mut result = OperationResult::success(
            self.provider_name(),
            capability,
            data,
            usage,
            cost,
            latency_ms,
        );
        result.request_id = request_id;
        result
    }

    /// Build a failed result without losing latency already spent.
    fn error_result(
        &self,
        capability: Capability,
        error: String,
        error_code: Option<&str>,
        retryable: bool,
        latency_ms: f64,
    ) -> OperationResult {
        OperationResult::failure(self.provider_name(), capability, error, error_code, retryable)
            .with_latency(latency_ms)
    }
}
