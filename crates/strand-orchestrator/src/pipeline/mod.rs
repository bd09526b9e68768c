// crates/strand-orchestrator/src/pipeline/mod.rs

//! Pipeline definitions and execution.

pub mod builder;
pub mod executor;
pub mod predefined;
pub mod types;

pub use builder::PipelineBuilder;
pub use executor::{ExecutionOptions, PipelineExecutor};
pub use types::{
    ContextData, PipelineContext, PipelineDefinition, PipelineResult, PipelineStep, StepResult,
    StepStatus,
};
