// crates/strand-orchestrator/tests/common/mod.rs

//! Scripted provider adapters for driving the executor in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use strand_core::types::{
    Capability, CapabilityMetadata, CostUnit, OperationResult, ProviderRegistration, ProviderType,
    QualityTier,
};
use strand_core::ProviderAdapter;
use strand_engines::registry::{AdapterFactory, CapabilityRegistry};
use strand_orchestrator::pipeline::types::ContextData;

#[allow(dead_code)]
#[derive(Debug)]
pub enum Scripted {
    Success {
        data: Value,
        usage: HashMap<String, f64>,
    },
    Failure {
        error: String,
        code: Option<String>,
        retryable: bool,
    },
}

#[allow(dead_code)]
impl Scripted {
    pub fn ok(data: Value) -> Self {
        Scripted::Success {
            data,
            usage: HashMap::new(),
        }
    }

    pub fn ok_with_usage(data: Value, usage: HashMap<String, f64>) -> Self {
        Scripted::Success { data, usage }
    }

    pub fn fail(error: &str, code: &str, retryable: bool) -> Self {
        Scripted::Failure {
            error: error.to_string(),
            code: Some(code.to_string()),
            retryable,
        }
    }
}

/// Adapter that replays a queued script of responses. An exhausted script
/// keeps answering with a plain success.
#[derive(Debug)]
pub struct ScriptedAdapter {
    registration: ProviderRegistration,
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicU32,
    delay: Option<Duration>,
}

#[allow(dead_code)]
impl ScriptedAdapter {
    pub fn new(registration: ProviderRegistration) -> Arc<Self> {
        Arc::new(Self {
            registration,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            delay: None,
        })
    }

    pub fn slow(registration: ProviderRegistration, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            registration,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            delay: Some(delay),
        })
    }

    pub fn queue(self: &Arc<Self>, response: Scripted) -> Arc<Self> {
        self.script.lock().unwrap().push_back(response);
        self.clone()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn registration(&self) -> ProviderRegistration {
        self.registration.clone()
    }

    async fn execute(
        &self,
        capability: Capability,
        _input: Value,
        _options: &HashMap<String, Value>,
    ) -> OperationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Success { data, usage }) => {
                self.success_result(capability, data, usage, 5.0, None)
            }
            Some(Scripted::Failure {
                error,
                code,
                retryable,
            }) => self.error_result(capability, error, code.as_deref(), retryable, 5.0),
            None => self.success_result(
                capability,
                serde_json::json!({"ok": true}),
                HashMap::new(),
                5.0,
                None,
            ),
        }
    }
}

/// Registration with a single capability at the given priority and price.
#[allow(dead_code)]
pub fn registration(
    name: &str,
    capability: Capability,
    priority: u32,
    cost_per_unit: Decimal,
    cost_unit: CostUnit,
) -> ProviderRegistration {
    ProviderRegistration::new(
        name,
        ProviderType::External,
        vec![CapabilityMetadata::new(capability, name)
            .with_cost(cost_per_unit, cost_unit)
            .with_quality(QualityTier::Standard)
            .with_priority(priority)],
    )
}

/// Register a scripted adapter; the stored factory hands back the shared
/// instance so tests can inspect call counts afterwards.
#[allow(dead_code)]
pub fn register(registry: &CapabilityRegistry, adapter: Arc<ScriptedAdapter>) {
    let shared = adapter.clone();
    let factory: AdapterFactory =
        Arc::new(move |_config| Ok(shared.clone() as Arc<dyn ProviderAdapter>));
    registry.register_provider(adapter.registration(), Some(factory));
}

#[allow(dead_code)]
pub fn duration_usage(seconds: f64) -> HashMap<String, f64> {
    let mut usage = HashMap::new();
    usage.insert("duration_seconds".to_string(), seconds);
    usage
}

#[allow(dead_code)]
pub fn input(pairs: &[(&str, Value)]) -> ContextData {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
