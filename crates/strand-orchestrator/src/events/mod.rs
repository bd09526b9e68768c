// crates/strand-orchestrator/src/events/mod.rs

//! Workflow event stream: taxonomy, store, and saga coordination.

pub mod saga;
pub mod store;
pub mod types;

pub use saga::SagaCoordinator;
pub use store::{EventFilter, EventPublisher, EventStore, EventStream, InMemoryEventStore, WorkflowState};
pub use types::{EventPayload, EventType, WorkflowEvent};
