// crates/strand-orchestrator/tests/pipeline_scenarios.rs

//! End-to-end execution scenarios driven through the saga coordinator and
//! the instrumented orchestrator with scripted provider adapters.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use rust_decimal::Decimal;
use serde_json::json;

use strand_core::types::{Capability, CostUnit};
use strand_engines::registry::CapabilityRegistry;
use strand_orchestrator::budget::{BudgetAction, BudgetConfig, BudgetPeriod, BudgetPolicy, BudgetService, SpendRecord};
use strand_orchestrator::events::store::{EventFilter, EventStore, InMemoryEventStore};
use strand_orchestrator::events::types::{EventPayload, EventType};
use strand_orchestrator::events::SagaCoordinator;
use strand_orchestrator::orchestrator::{ExecuteOptions, OrchestratorBuilder};
use strand_orchestrator::pipeline::builder::PipelineBuilder;
use strand_orchestrator::pipeline::executor::ExecutionOptions;
use strand_orchestrator::pipeline::types::StepStatus;
use strand_orchestrator::OrchestratorError;

use common::{duration_usage, input, register, registration, Scripted, ScriptedAdapter};

fn saga(registry: Arc<CapabilityRegistry>) -> (SagaCoordinator, Arc<InMemoryEventStore>) {
    let store = Arc::new(InMemoryEventStore::default());
    let saga = SagaCoordinator::new(registry, store.clone());
    (saga, store)
}

async fn event_types_for(store: &InMemoryEventStore, execution_id: &str) -> Vec<EventType> {
    store
        .get_events(&EventFilter::for_execution(execution_id))
        .await
        .iter()
        .map(|e| e.event_type)
        .collect()
}

#[tokio::test]
async fn happy_transcription_records_cost_and_event_order() {
    let registry = Arc::new(CapabilityRegistry::new());
    let adapter = ScriptedAdapter::new(registration(
        "scribe",
        Capability::Transcription,
        1,
        Decimal::new(6, 3), // $0.006 per minute
        CostUnit::PerMinute,
    ))
    .queue(Scripted::ok_with_usage(
        json!({"text": "hello"}),
        duration_usage(60.0),
    ));
    register(&registry, adapter);

    let pipeline = PipelineBuilder::new("t")
        .step("transcribe")
            .capability(Capability::Transcription)
            .output_as("transcript")
            .done()
        .build()
        .unwrap();

    let (saga, store) = saga(registry);
    let result = saga
        .execute(
            &pipeline,
            input(&[("audio", json!("<opaque>"))]),
            &ExecutionOptions::default(),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.completed_steps, vec!["transcribe"]);
    assert_eq!(result.output["transcript"], json!({"text": "hello"}));
    assert_eq!(result.total_cost_usd, Decimal::new(6, 3));

    let types = event_types_for(&store, &result.execution_id).await;
    assert_eq!(
        types,
        vec![
            EventType::WorkflowStarted,
            EventType::ProgressUpdate,
            EventType::StepStarted,
            EventType::CostIncurred,
            EventType::StepCompleted,
            EventType::ProgressUpdate,
            EventType::WorkflowCompleted,
        ]
    );

    // The trailing progress update reports completion.
    let events = store
        .get_events(&EventFilter::for_execution(&result.execution_id))
        .await;
    let last_progress = events
        .iter()
        .rev()
        .find_map(|e| match &e.payload {
            EventPayload::ProgressUpdate { percent, .. } => Some(*percent),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_progress, 100.0);
}

#[tokio::test]
async fn primary_failure_falls_back_to_secondary_provider() {
    let registry = Arc::new(CapabilityRegistry::new());
    let primary = ScriptedAdapter::new(registration(
        "a",
        Capability::Transcription,
        1,
        Decimal::ZERO,
        CostUnit::PerRequest,
    ))
    .queue(Scripted::fail("bad", "INVALID_INPUT", false));
    let secondary = ScriptedAdapter::new(registration(
        "b",
        Capability::Transcription,
        2,
        Decimal::ZERO,
        CostUnit::PerRequest,
    ))
    .queue(Scripted::ok(json!({"text": "rescued"})));
    register(&registry, primary.clone());
    register(&registry, secondary.clone());

    let pipeline = PipelineBuilder::new("fallback")
        .step("transcribe")
            .capability(Capability::Transcription)
            .prefer_providers(&["a", "b"])
            .with_fallback(1)
            .done()
        .build()
        .unwrap();

    let (saga, store) = saga(registry);
    let result = saga
        .execute(&pipeline, input(&[]), &ExecutionOptions::default())
        .await;

    assert!(result.success);
    let step = result.get_step_result("transcribe").unwrap();
    assert_eq!(step.provider_used.as_deref(), Some("b"));
    assert_eq!(step.fallbacks_attempted, vec!["a"]);
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);

    let types = event_types_for(&store, &result.execution_id).await;
    let fallbacks: Vec<_> = types
        .iter()
        .filter(|t| **t == EventType::ProviderFallback)
        .collect();
    assert_eq!(fallbacks.len(), 1);

    // The fallback sits between step start and completion.
    let start = types.iter().position(|t| *t == EventType::StepStarted).unwrap();
    let fallback = types.iter().position(|t| *t == EventType::ProviderFallback).unwrap();
    let completed = types.iter().position(|t| *t == EventType::StepCompleted).unwrap();
    assert!(start < fallback && fallback < completed);
}

#[tokio::test]
async fn retryable_failures_are_retried_with_backoff() {
    let registry = Arc::new(CapabilityRegistry::new());
    let adapter = ScriptedAdapter::new(registration(
        "flaky",
        Capability::LlmGeneration,
        1,
        Decimal::ZERO,
        CostUnit::PerRequest,
    ))
    .queue(Scripted::fail("overloaded", "SERVICE_UNAVAILABLE", true))
    .queue(Scripted::fail("overloaded", "SERVICE_UNAVAILABLE", true))
    .queue(Scripted::ok(json!({"text": "third time lucky"})));
    register(&registry, adapter.clone());

    let pipeline = PipelineBuilder::new("retry")
        .step("generate")
            .capability(Capability::LlmGeneration)
            .with_retry(3, 10, true)
            .done()
        .build()
        .unwrap();

    let (saga, _store) = saga(registry);
    let started = Instant::now();
    let result = saga
        .execute(&pipeline, input(&[]), &ExecutionOptions::default())
        .await;
    let elapsed = started.elapsed();

    assert!(result.success);
    assert_eq!(adapter.calls(), 3);
    let step = result.get_step_result("generate").unwrap();
    assert_eq!(step.retries, 2);
    // Backoff sleeps: ~10ms then ~20ms.
    assert!(elapsed.as_millis() >= 30, "elapsed {elapsed:?}");
    assert!(elapsed.as_millis() < 1000, "elapsed {elapsed:?}");
}

#[tokio::test]
async fn required_step_failure_compensates_completed_steps_in_reverse() {
    let registry = Arc::new(CapabilityRegistry::new());
    let first = ScriptedAdapter::new(registration(
        "alpha",
        Capability::Transcription,
        1,
        Decimal::ZERO,
        CostUnit::PerRequest,
    ));
    let second = ScriptedAdapter::new(registration(
        "beta",
        Capability::Summarization,
        1,
        Decimal::ZERO,
        CostUnit::PerRequest,
    ))
    .queue(Scripted::fail("model rejected input", "INVALID_INPUT", false));
    register(&registry, first);
    register(&registry, second);

    let compensations: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let s1_log = compensations.clone();
    let s2_log = compensations.clone();

    let pipeline = PipelineBuilder::new("rollback")
        .step("s1")
            .capability(Capability::Transcription)
            .compensate_with(
                move |_ctx| {
                    let log = s1_log.clone();
                    async move {
                        log.lock().unwrap().push("s1");
                        true
                    }
                },
                "undo s1",
            )
            .done()
        .step("s2")
            .capability(Capability::Summarization)
            .no_retry()
            .no_fallback()
            .prefer_providers(&["beta"])
            .compensate_with(
                move |_ctx| {
                    let log = s2_log.clone();
                    async move {
                        log.lock().unwrap().push("s2");
                        true
                    }
                },
                "undo s2",
            )
            .done()
        .build()
        .unwrap();

    let (saga, store) = saga(registry);
    let result = saga
        .execute(&pipeline, input(&[]), &ExecutionOptions::default())
        .await;

    assert!(!result.success);
    assert_eq!(result.failed_step.as_deref(), Some("s2"));
    assert!(result.compensation_performed);
    assert_eq!(result.compensated_steps, vec!["s1"]);
    // The failed step's own compensation never runs.
    assert_eq!(*compensations.lock().unwrap(), vec!["s1"]);

    let events = store
        .get_events(&EventFilter::for_execution(&result.execution_id))
        .await;
    let started = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::CompensationStarted {
                steps_to_compensate,
                ..
            } => Some(steps_to_compensate.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(started, vec!["s1"]);

    let step_events: Vec<(String, bool)> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::CompensationStep {
                step_name, success, ..
            } => Some((step_name.clone(), *success)),
            _ => None,
        })
        .collect();
    assert_eq!(step_events, vec![("s1".to_string(), true)]);

    let full_rollback = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::CompensationCompleted { full_rollback, .. } => Some(*full_rollback),
            _ => None,
        })
        .unwrap();
    assert!(full_rollback);

    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(*types.last().unwrap(), EventType::WorkflowFailed);
}

#[tokio::test]
async fn hard_block_budget_rejects_before_any_work() {
    let registry = Arc::new(CapabilityRegistry::new());
    let adapter = ScriptedAdapter::new(registration(
        "scribe",
        Capability::Transcription,
        1,
        Decimal::new(6, 3),
        CostUnit::PerMinute,
    ));
    register(&registry, adapter.clone());

    let budget = Arc::new(BudgetService::default());
    let mut config = BudgetConfig::new("T");
    config.daily_limit_usd = Some(Decimal::new(100, 2)); // $1.00
    config.policy = BudgetPolicy::HardBlock;
    budget.set_budget(config).await;
    budget
        .track_spend(SpendRecord {
            tenant_id: "T".to_string(),
            cost_usd: Decimal::new(95, 2),
            pipeline_name: None,
            execution_id: None,
            provider: None,
            capability: None,
            timestamp: chrono::Utc::now(),
            metadata: Default::default(),
        })
        .await;

    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::default());
    let orchestrator = OrchestratorBuilder::new(registry)
        .event_store(store.clone())
        .budget_service(budget)
        .build();

    let pipeline = PipelineBuilder::new("t")
        .estimated_cost(Decimal::new(10, 2)) // $0.10
        .step("transcribe")
            .capability(Capability::Transcription)
            .done()
        .build()
        .unwrap();

    let err = orchestrator
        .execute(&pipeline, input(&[]), ExecuteOptions::for_tenant("T"))
        .await
        .unwrap_err();

    match err {
        OrchestratorError::BudgetExceeded { tenant_id, check } => {
            assert_eq!(tenant_id, "T");
            assert_eq!(check.action, BudgetAction::Blocked);
            assert_eq!(check.period, BudgetPeriod::Daily);
            assert!(!check.allowed);
        }
        other => panic!("expected BudgetExceeded, got {other:?}"),
    }

    // No adapter call, no events of any kind.
    assert_eq!(adapter.calls(), 0);
    let all_events = store.get_events(&EventFilter::default()).await;
    assert!(all_events.is_empty());
}

#[tokio::test]
async fn unmet_condition_skips_step_and_preserves_success() {
    let registry = Arc::new(CapabilityRegistry::new());
    let adapter = ScriptedAdapter::new(registration(
        "svc",
        Capability::LlmGeneration,
        1,
        Decimal::ZERO,
        CostUnit::PerRequest,
    ));
    register(&registry, adapter.clone());

    let pipeline = PipelineBuilder::new("conditional")
        .step("always")
            .capability(Capability::LlmGeneration)
            .done()
        .step("conditional")
            .capability(Capability::LlmGeneration)
            .when(|ctx| ctx.get("flag") == Some(&json!(true)))
            .done()
        .build()
        .unwrap();

    let (saga, store) = saga(registry);
    let result = saga
        .execute(
            &pipeline,
            input(&[("flag", json!(false))]),
            &ExecutionOptions::default(),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.completed_steps, vec!["always"]);

    let skipped = result.get_step_result("conditional").unwrap();
    assert_eq!(skipped.status, StepStatus::Skipped);
    assert_eq!(skipped.skipped_reason.as_deref(), Some("Condition not met"));

    // Only the unconditional step reached the provider.
    assert_eq!(adapter.calls(), 1);

    let types = event_types_for(&store, &result.execution_id).await;
    assert!(types.contains(&EventType::StepSkipped));
    assert_eq!(*types.last().unwrap(), EventType::WorkflowCompleted);
}
