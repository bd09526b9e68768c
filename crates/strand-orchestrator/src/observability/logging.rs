// crates/strand-orchestrator/src/observability/logging.rs

//! Structured lifecycle logging over the `log` facade.
//!
//! Messages carry key=value fields so any subscriber the host installs
//! (env_logger, a JSON formatter) yields greppable workflow logs.

use log::{info, warn};
use rust_decimal::Decimal;

/// Workflow lifecycle logger; a no-op shell when disabled.
#[derive(Debug, Clone)]
pub struct AiLogger {
    enabled: bool,
}

impl Default for AiLogger {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AiLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn pipeline_started(
        &self,
        pipeline: &str,
        execution_id: &str,
        tenant_id: Option<&str>,
        step_count: usize,
        estimated_cost_usd: Option<Decimal>,
    ) {
        if !self.enabled {
            return;
        }
        info!(
            "event=pipeline_started pipeline={pipeline} execution_id={execution_id} \
             tenant={} steps={step_count} estimated_cost_usd={}",
            tenant_id.unwrap_or("-"),
            estimated_cost_usd
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    pub fn pipeline_completed(
        &self,
        pipeline: &str,
        execution_id: &str,
        duration_ms: f64,
        total_cost_usd: Decimal,
        completed_steps: usize,
    ) {
        if !self.enabled {
            return;
        }
        info!(
            "event=pipeline_completed pipeline={pipeline} execution_id={execution_id} \
             duration_ms={duration_ms:.0} cost_usd={total_cost_usd} steps={completed_steps}"
        );
    }

    pub fn pipeline_failed(
        &self,
        pipeline: &str,
        execution_id: &str,
        failed_step: Option<&str>,
        error: &str,
        compensation_performed: bool,
    ) {
        if !self.enabled {
            return;
        }
        warn!(
            "event=pipeline_failed pipeline={pipeline} execution_id={execution_id} \
             failed_step={} compensated={compensation_performed} error={error}",
            failed_step.unwrap_or("-"),
        );
    }

    pub fn budget_check(
        &self,
        tenant_id: &str,
        action: &str,
        current_spend_usd: Decimal,
        limit_usd: Option<Decimal>,
        percent_used: f64,
    ) {
        if !self.enabled {
            return;
        }
        info!(
            "event=budget_check tenant={tenant_id} action={action} spend_usd={current_spend_usd} \
             limit_usd={} percent_used={percent_used:.1}",
            limit_usd
                .map(|l| l.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    pub fn budget_exceeded(&self, tenant_id: &str, period: &str, message: &str) {
        if !self.enabled {
            return;
        }
        warn!("event=budget_exceeded tenant={tenant_id} period={period} detail={message}");
    }

    pub fn spend_tracked(
        &self,
        tenant_id: &str,
        cost_usd: Decimal,
        pipeline: &str,
        execution_id: &str,
    ) {
        if !self.enabled {
            return;
        }
        info!(
            "event=spend_tracked tenant={tenant_id} cost_usd={cost_usd} pipeline={pipeline} \
             execution_id={execution_id}"
        );
    }
}
