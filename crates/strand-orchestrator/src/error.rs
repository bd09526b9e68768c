// crates/strand-orchestrator/src/error.rs

use thiserror::Error;

use crate::budget::BudgetCheckResult;

/// Errors surfaced at the orchestrator boundary.
///
/// The budget gate is the only pre-flight rejection; everything after it
/// reports failure through `PipelineResult { success: false }`. The
/// `PipelineFailed` envelope exists for callers that prefer an error over
/// inspecting the result.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("budget exceeded for tenant '{tenant_id}': {}", check.message)]
    BudgetExceeded {
        tenant_id: String,
        check: BudgetCheckResult,
    },

    #[error("pipeline '{pipeline}' failed at step '{}': {message}", step_name.as_deref().unwrap_or("<none>"))]
    PipelineFailed {
        pipeline: String,
        step_name: Option<String>,
        error_code: Option<String>,
        message: String,
    },
}

impl OrchestratorError {
    /// Wrap a failed `PipelineResult` into the error envelope; `None` for
    /// successful results.
    pub fn from_result(result: &crate::pipeline::types::PipelineResult) -> Option<Self> {
        if result.success {
            return None;
        }
        let step_result = result
            .failed_step
            .as_ref()
            .and_then(|step| result.step_results.get(step));
        Some(OrchestratorError::PipelineFailed {
            pipeline: result.pipeline_name.clone(),
            step_name: result.failed_step.clone(),
            error_code: step_result.and_then(|sr| sr.error_code.clone()),
            message: result
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}
