//! Strand Orchestrator Library
//!
//! Pipeline execution for AI workflows: a fluent builder DSL for declaring
//! pipelines, an executor with provider fallback chains and retry logic, a
//! saga coordinator that emits a durable event stream and runs
//! compensating rollbacks, a per-tenant budget service, and the
//! instrumented orchestrator facade that ties them together with metrics
//! and tracing.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use strand_core::Capability;
//! use strand_engines::registry::CapabilityRegistry;
//! use strand_orchestrator::orchestrator::{ExecuteOptions, OrchestratorBuilder};
//! use strand_orchestrator::pipeline::builder::PipelineBuilder;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = Arc::new(CapabilityRegistry::new());
//! // ... register providers ...
//!
//! let pipeline = PipelineBuilder::new("transcription")
//!     .step("transcribe")
//!         .capability(Capability::Transcription)
//!         .output_as("transcript")
//!         .done()
//!     .build()?;
//!
//! let orchestrator = OrchestratorBuilder::new(registry).build();
//! let mut input = HashMap::new();
//! input.insert("audio_url".to_string(), serde_json::json!("https://..."));
//!
//! let result = orchestrator
//!     .execute(&pipeline, input, ExecuteOptions::for_tenant("tenant-123"))
//!     .await?;
//! println!("cost: ${}", result.total_cost_usd);
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod error;
pub mod events;
pub mod observability;
pub mod orchestrator;
pub mod pipeline;

pub use error::OrchestratorError;
pub use orchestrator::{ExecuteOptions, InstrumentedOrchestrator, OrchestratorBuilder};
pub use pipeline::builder::PipelineBuilder;
pub use pipeline::types::{ContextData, PipelineDefinition, PipelineResult, StepStatus};
