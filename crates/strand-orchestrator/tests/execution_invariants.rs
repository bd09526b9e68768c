// crates/strand-orchestrator/tests/execution_invariants.rs

//! Cross-cutting execution invariants: cost accounting, event stream
//! shape, state folding, timeouts, and cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use strand_core::error::codes;
use strand_core::types::{Capability, CostUnit};
use strand_engines::registry::CapabilityRegistry;
use strand_orchestrator::events::store::{EventFilter, EventStore, InMemoryEventStore};
use strand_orchestrator::events::types::EventType;
use strand_orchestrator::events::SagaCoordinator;
use strand_orchestrator::orchestrator::{ExecuteOptions, OrchestratorBuilder};
use strand_orchestrator::pipeline::builder::PipelineBuilder;
use strand_orchestrator::pipeline::executor::ExecutionOptions;
use strand_orchestrator::pipeline::types::StepStatus;

use common::{duration_usage, input, register, registration, Scripted, ScriptedAdapter};

fn saga(registry: Arc<CapabilityRegistry>) -> (SagaCoordinator, Arc<InMemoryEventStore>) {
    let store = Arc::new(InMemoryEventStore::default());
    let saga = SagaCoordinator::new(registry, store.clone());
    (saga, store)
}

#[tokio::test]
async fn total_cost_is_the_sum_of_step_costs() {
    let registry = Arc::new(CapabilityRegistry::new());
    let transcriber = ScriptedAdapter::new(registration(
        "scribe",
        Capability::Transcription,
        1,
        Decimal::new(6, 3),
        CostUnit::PerMinute,
    ))
    .queue(Scripted::ok_with_usage(
        json!({"text": "hi"}),
        duration_usage(120.0),
    ));
    let summarizer = ScriptedAdapter::new(registration(
        "summer",
        Capability::Summarization,
        1,
        Decimal::new(2, 2),
        CostUnit::PerRequest,
    ))
    .queue(Scripted::ok_with_usage(json!({"text": "short"}), {
        let mut usage = std::collections::HashMap::new();
        usage.insert("request_count".to_string(), 1.0);
        usage
    }));
    register(&registry, transcriber);
    register(&registry, summarizer);

    let pipeline = PipelineBuilder::new("two_costs")
        .step("transcribe")
            .capability(Capability::Transcription)
            .output_as("transcript")
            .done()
        .step("summarize")
            .capability(Capability::Summarization)
            .input_from("transcript")
            .done()
        .build()
        .unwrap();

    let (saga, _store) = saga(registry);
    let result = saga
        .execute(&pipeline, input(&[]), &ExecutionOptions::default())
        .await;

    assert!(result.success);
    let step_sum: Decimal = result
        .step_results
        .values()
        .map(|sr| sr.cost_usd())
        .sum();
    assert_eq!(result.total_cost_usd, step_sum);
    // 120s at $0.006/min + one $0.02 request
    assert_eq!(result.total_cost_usd, Decimal::new(32, 3));
}

#[tokio::test]
async fn event_stream_starts_and_ends_with_workflow_lifecycle() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(
        &registry,
        ScriptedAdapter::new(registration(
            "svc",
            Capability::LlmGeneration,
            1,
            Decimal::ZERO,
            CostUnit::PerRequest,
        )),
    );

    let pipeline = PipelineBuilder::new("lifecycle")
        .step("generate")
            .capability(Capability::LlmGeneration)
            .done()
        .build()
        .unwrap();

    let (saga, store) = saga(registry);
    let result = saga
        .execute(&pipeline, input(&[]), &ExecutionOptions::default())
        .await;

    let events = store
        .get_events(&EventFilter::for_execution(&result.execution_id))
        .await;
    assert_eq!(events.first().unwrap().event_type, EventType::WorkflowStarted);
    assert_eq!(
        events.last().unwrap().event_type,
        EventType::WorkflowCompleted
    );

    // STEP_STARTED precedes the step's terminal event.
    let started = events
        .iter()
        .position(|e| e.event_type == EventType::StepStarted)
        .unwrap();
    let completed = events
        .iter()
        .position(|e| e.event_type == EventType::StepCompleted)
        .unwrap();
    assert!(started < completed);
}

#[tokio::test]
async fn folded_state_matches_result_projection() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(
        &registry,
        ScriptedAdapter::new(registration(
            "scribe",
            Capability::Transcription,
            1,
            Decimal::new(6, 3),
            CostUnit::PerMinute,
        ))
        .queue(Scripted::ok_with_usage(json!({"text": "hi"}), duration_usage(60.0))),
    );

    let pipeline = PipelineBuilder::new("folded")
        .step("transcribe")
            .capability(Capability::Transcription)
            .done()
        .build()
        .unwrap();

    let (saga, _store) = saga(registry);
    let result = saga
        .execute(&pipeline, input(&[]), &ExecutionOptions::default())
        .await;

    let state = saga.workflow_state(&result.execution_id).await.unwrap();
    assert_eq!(state.status, "completed");
    assert_eq!(state.completed_steps, result.completed_steps);
    assert_eq!(state.failed_step, result.failed_step);
    assert_eq!(state.total_cost_usd, result.total_cost_usd);
}

#[tokio::test]
async fn missing_providers_fail_with_no_providers_code() {
    let registry = Arc::new(CapabilityRegistry::new());
    // Nothing registered for embeddings.
    let pipeline = PipelineBuilder::new("orphan")
        .step("embed")
            .capability(Capability::Embedding)
            .done()
        .build()
        .unwrap();

    let (saga, _store) = saga(registry);
    let result = saga
        .execute(&pipeline, input(&[]), &ExecutionOptions::default())
        .await;

    assert!(!result.success);
    let step = result.get_step_result("embed").unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.error_code.as_deref(), Some(codes::NO_PROVIDERS));
}

#[tokio::test]
async fn zero_step_timeout_fails_with_timeout_code() {
    let registry = Arc::new(CapabilityRegistry::new());
    let adapter = ScriptedAdapter::slow(
        registration(
            "sluggish",
            Capability::LlmGeneration,
            1,
            Decimal::ZERO,
            CostUnit::PerRequest,
        ),
        Duration::from_millis(50),
    );
    register(&registry, adapter);

    let pipeline = PipelineBuilder::new("deadline")
        .step("generate")
            .capability(Capability::LlmGeneration)
            .timeout(0)
            .no_retry()
            .done()
        .build()
        .unwrap();

    let (saga, _store) = saga(registry);
    let result = saga
        .execute(&pipeline, input(&[]), &ExecutionOptions::default())
        .await;

    assert!(!result.success);
    let step = result.get_step_result("generate").unwrap();
    assert_eq!(step.error_code.as_deref(), Some(codes::TIMEOUT));
}

#[tokio::test]
async fn single_attempt_policy_never_sleeps() {
    let registry = Arc::new(CapabilityRegistry::new());
    let adapter = ScriptedAdapter::new(registration(
        "once",
        Capability::LlmGeneration,
        1,
        Decimal::ZERO,
        CostUnit::PerRequest,
    ))
    .queue(Scripted::fail("overloaded", "SERVICE_UNAVAILABLE", true));
    register(&registry, adapter.clone());

    let pipeline = PipelineBuilder::new("one_shot")
        .step("generate")
            .capability(Capability::LlmGeneration)
            .no_retry()
            .no_fallback()
            .prefer_providers(&["once"])
            .done()
        .build()
        .unwrap();

    let (saga, _store) = saga(registry);
    let started = std::time::Instant::now();
    let result = saga
        .execute(&pipeline, input(&[]), &ExecutionOptions::default())
        .await;

    assert!(!result.success);
    assert_eq!(adapter.calls(), 1);
    // No retry sleep: a 1s initial delay would show up here.
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn retry_allow_list_stops_unlisted_codes() {
    let registry = Arc::new(CapabilityRegistry::new());
    let adapter = ScriptedAdapter::new(registration(
        "picky",
        Capability::LlmGeneration,
        1,
        Decimal::ZERO,
        CostUnit::PerRequest,
    ))
    .queue(Scripted::fail("overloaded", "SERVICE_UNAVAILABLE", true));
    register(&registry, adapter.clone());

    let mut policy = strand_orchestrator::pipeline::types::RetryPolicy::default();
    policy.max_attempts = 3;
    policy.initial_delay_ms = 10;
    policy.retryable_errors = Some(vec!["TIMEOUT".to_string()]);

    let pipeline = PipelineBuilder::new("allow_list")
        .step("generate")
            .capability(Capability::LlmGeneration)
            .retry_policy(policy)
            .no_fallback()
            .prefer_providers(&["picky"])
            .done()
        .build()
        .unwrap();

    let (saga, _store) = saga(registry);
    let result = saga
        .execute(&pipeline, input(&[]), &ExecutionOptions::default())
        .await;

    assert!(!result.success);
    // SERVICE_UNAVAILABLE is retryable but not on the allow-list.
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn cancelled_execution_compensates_and_emits_cancelled() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(
        &registry,
        ScriptedAdapter::new(registration(
            "svc",
            Capability::LlmGeneration,
            1,
            Decimal::ZERO,
            CostUnit::PerRequest,
        )),
    );

    let pipeline = PipelineBuilder::new("cancelled")
        .step("generate")
            .capability(Capability::LlmGeneration)
            .done()
        .build()
        .unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let options = ExecutionOptions {
        cancellation: Some(token),
        ..Default::default()
    };

    let (saga, store) = saga(registry);
    let result = saga.execute(&pipeline, input(&[]), &options).await;

    assert!(!result.success);
    assert_eq!(result.failed_step.as_deref(), Some("generate"));
    let step = result.get_step_result("generate").unwrap();
    assert_eq!(step.error_code.as_deref(), Some(codes::CANCELLED));
    // Nothing completed, so the rollback is trivially full.
    assert!(result.compensation_performed);
    assert!(result.compensated_steps.is_empty());

    let events = store
        .get_events(&EventFilter::for_execution(&result.execution_id))
        .await;
    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert!(types.contains(&EventType::CompensationStarted));
    assert!(types.contains(&EventType::CompensationCompleted));
    assert_eq!(*types.last().unwrap(), EventType::WorkflowCancelled);
}

#[tokio::test]
async fn optional_step_failure_does_not_fail_the_pipeline() {
    let registry = Arc::new(CapabilityRegistry::new());
    let flaky = ScriptedAdapter::new(registration(
        "flaky",
        Capability::CoachingAnalysis,
        1,
        Decimal::ZERO,
        CostUnit::PerRequest,
    ))
    .queue(Scripted::fail("nope", "INVALID_INPUT", false));
    let steady = ScriptedAdapter::new(registration(
        "steady",
        Capability::LlmGeneration,
        1,
        Decimal::ZERO,
        CostUnit::PerRequest,
    ));
    register(&registry, flaky);
    register(&registry, steady);

    let pipeline = PipelineBuilder::new("lenient")
        .step("coach")
            .capability(Capability::CoachingAnalysis)
            .optional()
            .no_retry()
            .done()
        .step("generate")
            .capability(Capability::LlmGeneration)
            .done()
        .build()
        .unwrap();

    let (saga, _store) = saga(registry);
    let result = saga
        .execute(&pipeline, input(&[]), &ExecutionOptions::default())
        .await;

    assert!(result.success);
    assert_eq!(result.completed_steps, vec!["generate"]);
    assert_eq!(
        result.get_step_result("coach").unwrap().status,
        StepStatus::Failed
    );
    assert!(!result.compensation_performed);
}

#[tokio::test]
async fn orchestrator_tracks_spend_and_reports_progress() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(
        &registry,
        ScriptedAdapter::new(registration(
            "scribe",
            Capability::Transcription,
            1,
            Decimal::new(6, 3),
            CostUnit::PerMinute,
        ))
        .queue(Scripted::ok_with_usage(json!({"text": "hi"}), duration_usage(60.0))),
    );

    let orchestrator = OrchestratorBuilder::new(registry).build();
    let pipeline = PipelineBuilder::new("tracked")
        .step("transcribe")
            .capability(Capability::Transcription)
            .done()
        .build()
        .unwrap();

    let result = orchestrator
        .execute(&pipeline, input(&[]), ExecuteOptions::for_tenant("acme"))
        .await
        .unwrap();
    assert!(result.success);

    // Spend landed in the budget service.
    let summary = orchestrator
        .get_spend_summary("acme", strand_orchestrator::budget::BudgetPeriod::Daily)
        .await
        .unwrap();
    assert_eq!(summary.total_spend_usd, Decimal::new(6, 3));
    assert_eq!(summary.by_pipeline["tracked"], Decimal::new(6, 3));

    // Read surfaces reflect the completed run.
    let progress = orchestrator
        .get_progress(&result.execution_id)
        .await
        .unwrap();
    assert_eq!(progress.status, "completed");
    assert_eq!(progress.progress_percent, 100.0);
    assert_eq!(progress.completed_steps, vec!["transcribe"]);

    let execution = orchestrator
        .get_execution(&result.execution_id)
        .await
        .unwrap();
    assert!(execution.success);
    assert_eq!(execution.total_cost_usd, result.total_cost_usd);
}
