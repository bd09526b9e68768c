// crates/strand-orchestrator/src/events/store.rs

//! Append-only event store with pub/sub
//!
//! The in-memory store indexes events by execution and tenant, folds
//! workflow state from the event history, and streams live events to
//! subscribers. Each subscriber gets a bounded queue; when a slow
//! consumer's queue fills, new events for it are dropped with a warning
//! and the producer is never blocked.
//!
//! Events for the same execution are observed by every subscriber in
//! append order. Across executions no ordering is guaranteed.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::Stream;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use super::types::{EventPayload, EventType, WorkflowEvent};

pub type EventStream = Pin<Box<dyn Stream<Item = WorkflowEvent> + Send>>;

/// Query/subscription filter over the event stream.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub execution_id: Option<String>,
    pub tenant_id: Option<String>,
    pub event_types: Option<Vec<EventType>>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            execution_id: None,
            tenant_id: None,
            event_types: None,
            since: None,
            until: None,
            limit: 1000,
        }
    }
}

impl EventFilter {
    pub fn for_execution(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: Some(execution_id.into()),
            ..Default::default()
        }
    }

    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Default::default()
        }
    }

    pub fn with_event_types(mut self, event_types: Vec<EventType>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    fn matches(&self, event: &WorkflowEvent) -> bool {
        if let Some(execution_id) = &self.execution_id {
            if &event.execution_id != execution_id {
                return false;
            }
        }
        if let Some(tenant_id) = &self.tenant_id {
            if event.tenant_id.as_ref() != Some(tenant_id) {
                return false;
            }
        }
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// Workflow state folded from the event history.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub execution_id: String,
    pub status: String,
    pub pipeline_name: Option<String>,
    pub pipeline_version: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub failed_step: Option<String>,
    pub error: Option<String>,
    pub progress_percent: f64,
    pub total_cost_usd: Decimal,
    pub total_duration_ms: f64,
    pub total_steps: Option<usize>,
    pub compensation_performed: bool,
    pub compensated_steps: Vec<String>,
    pub events_count: usize,
}

/// Append-only store with filtered queries and live subscriptions.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: WorkflowEvent);

    async fn get_events(&self, filter: &EventFilter) -> Vec<WorkflowEvent>;

    /// Subscribe to future events matching the filter. The subscription is
    /// removed when the returned stream is dropped.
    async fn subscribe(&self, filter: EventFilter) -> EventStream;

    /// Fold the event history of one execution into a state summary.
    async fn workflow_state(&self, execution_id: &str) -> Option<WorkflowState>;
}

struct Subscription {
    sender: mpsc::Sender<WorkflowEvent>,
    filter: EventFilter,
}

struct StoreInner {
    events: Vec<WorkflowEvent>,
    by_execution: HashMap<String, Vec<WorkflowEvent>>,
    by_tenant: HashMap<String, Vec<WorkflowEvent>>,
    subscriptions: Vec<Subscription>,
}

/// In-memory event store for development, testing, and single-node
/// deployments. Events are lost on restart; production deployments
/// substitute a durable implementation behind the same trait.
pub struct InMemoryEventStore {
    inner: Mutex<StoreInner>,
    max_events: usize,
    ttl: ChronoDuration,
    queue_capacity: usize,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(100_000, 24)
    }
}

impl InMemoryEventStore {
    pub fn new(max_events: usize, ttl_hours: i64) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                events: Vec::new(),
                by_execution: HashMap::new(),
                by_tenant: HashMap::new(),
                subscriptions: Vec::new(),
            }),
            max_events,
            ttl: ChronoDuration::hours(ttl_hours),
            queue_capacity: 100,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Purge events older than the TTL and rebuild the indexes.
    fn cleanup(inner: &mut StoreInner, ttl: ChronoDuration) {
        let cutoff = Utc::now() - ttl;
        let before = inner.events.len();
        inner.events.retain(|e| e.timestamp > cutoff);

        inner.by_execution.clear();
        inner.by_tenant.clear();
        let events = inner.events.clone();
        for event in events {
            inner
                .by_execution
                .entry(event.execution_id.clone())
                .or_default()
                .push(event.clone());
            if let Some(tenant_id) = &event.tenant_id {
                inner
                    .by_tenant
                    .entry(tenant_id.clone())
                    .or_default()
                    .push(event);
            }
        }

        let removed = before - inner.events.len();
        if removed > 0 {
            info!("purged {removed} expired events");
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: WorkflowEvent) {
        let recipients: Vec<mpsc::Sender<WorkflowEvent>> = {
            let mut inner = self.inner.lock().await;
            inner.events.push(event.clone());
            inner
                .by_execution
                .entry(event.execution_id.clone())
                .or_default()
                .push(event.clone());
            if let Some(tenant_id) = &event.tenant_id {
                inner
                    .by_tenant
                    .entry(tenant_id.clone())
                    .or_default()
                    .push(event.clone());
            }

            if inner.events.len() > self.max_events {
                Self::cleanup(&mut inner, self.ttl);
            }

            // Drop subscriptions whose stream side is gone.
            inner.subscriptions.retain(|s| !s.sender.is_closed());
            inner
                .subscriptions
                .iter()
                .filter(|s| s.filter.matches(&event))
                .map(|s| s.sender.clone())
                .collect()
        };

        // Notify outside the lock; a full queue drops the event for that
        // subscriber rather than blocking the producer.
        for sender in recipients {
            if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(event.clone()) {
                warn!(
                    "subscriber queue full, dropping event for execution {}",
                    event.execution_id
                );
            }
        }

        debug!(
            "event stored: {:?} execution={}",
            event.event_type, event.execution_id
        );
    }

    async fn get_events(&self, filter: &EventFilter) -> Vec<WorkflowEvent> {
        let inner = self.inner.lock().await;
        let source: &[WorkflowEvent] = if let Some(execution_id) = &filter.execution_id {
            inner
                .by_execution
                .get(execution_id)
                .map(Vec::as_slice)
                .unwrap_or(&[])
        } else if let Some(tenant_id) = &filter.tenant_id {
            inner
                .by_tenant
                .get(tenant_id)
                .map(Vec::as_slice)
                .unwrap_or(&[])
        } else {
            &inner.events
        };

        source
            .iter()
            .filter(|e| filter.matches(e))
            .take(filter.limit)
            .cloned()
            .collect()
    }

    async fn subscribe(&self, filter: EventFilter) -> EventStream {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        {
            let mut inner = self.inner.lock().await;
            inner.subscriptions.push(Subscription { sender, filter });
        }
        Box::pin(ReceiverStream::new(receiver))
    }

    async fn workflow_state(&self, execution_id: &str) -> Option<WorkflowState> {
        let events = self
            .get_events(&EventFilter {
                execution_id: Some(execution_id.to_string()),
                limit: usize::MAX,
                ..Default::default()
            })
            .await;

        if events.is_empty() {
            return None;
        }

        let mut state = WorkflowState {
            execution_id: execution_id.to_string(),
            status: "unknown".to_string(),
            pipeline_name: None,
            pipeline_version: None,
            started_at: None,
            completed_at: None,
            current_step: None,
            completed_steps: Vec::new(),
            failed_step: None,
            error: None,
            progress_percent: 0.0,
            total_cost_usd: Decimal::ZERO,
            total_duration_ms: 0.0,
            total_steps: None,
            compensation_performed: false,
            compensated_steps: Vec::new(),
            events_count: events.len(),
        };

        for event in &events {
            match &event.payload {
                EventPayload::WorkflowStarted {
                    pipeline_name,
                    pipeline_version,
                    ..
                } => {
                    state.status = "running".to_string();
                    state.pipeline_name = Some(pipeline_name.clone());
                    state.pipeline_version = Some(pipeline_version.clone());
                    state.started_at = Some(event.timestamp);
                }
                EventPayload::WorkflowCompleted {
                    completed_steps,
                    total_duration_ms,
                    total_cost_usd,
                    ..
                } => {
                    state.status = "completed".to_string();
                    state.completed_at = Some(event.timestamp);
                    state.completed_steps = completed_steps.clone();
                    state.total_cost_usd = *total_cost_usd;
                    state.total_duration_ms = *total_duration_ms;
                }
                EventPayload::WorkflowFailed {
                    failed_step,
                    error,
                    completed_steps,
                    total_duration_ms,
                    total_cost_usd,
                    ..
                } => {
                    state.status = "failed".to_string();
                    state.completed_at = Some(event.timestamp);
                    state.failed_step = failed_step.clone();
                    state.error = Some(error.clone());
                    state.completed_steps = completed_steps.clone();
                    state.total_cost_usd = *total_cost_usd;
                    state.total_duration_ms = *total_duration_ms;
                }
                EventPayload::WorkflowCancelled { .. } => {
                    state.status = "cancelled".to_string();
                    state.completed_at = Some(event.timestamp);
                }
                EventPayload::StepStarted {
                    step_name,
                    total_steps,
                    ..
                } => {
                    state.current_step = Some(step_name.clone());
                    state.total_steps = Some(*total_steps);
                }
                EventPayload::StepCompleted { step_name, .. } => {
                    if !state.completed_steps.contains(step_name) {
                        state.completed_steps.push(step_name.clone());
                    }
                }
                EventPayload::ProgressUpdate { percent, .. } => {
                    state.progress_percent = *percent;
                }
                EventPayload::CostIncurred { cost_usd, .. } => {
                    state.total_cost_usd += *cost_usd;
                }
                EventPayload::CompensationCompleted {
                    compensated_steps, ..
                } => {
                    state.compensation_performed = true;
                    state.compensated_steps = compensated_steps.clone();
                }
                _ => {}
            }
        }

        Some(state)
    }
}

/// Convenience layer for publishing events to a store.
#[derive(Clone)]
pub struct EventPublisher {
    store: Arc<dyn EventStore>,
}

impl EventPublisher {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub async fn publish(&self, event: WorkflowEvent) {
        self.store.append(event).await;
    }

    pub async fn emit(
        &self,
        execution_id: &str,
        tenant_id: &Option<String>,
        payload: EventPayload,
    ) {
        self.publish(WorkflowEvent::new(execution_id, tenant_id.clone(), payload))
            .await;
    }
}
