// crates/strand-orchestrator/src/budget.rs

//! Budget tracking and enforcement
//!
//! Per-tenant spending limits over daily/weekly/monthly windows with a
//! pre-execution check and post-execution spend tracking. Policies:
//! WARN logs and allows, SOFT_BLOCK and HARD_BLOCK refuse new work.
//! Budget state lives behind the `BudgetStore` trait; the bundled
//! in-memory store serves development and tests, production substitutes
//! a durable backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, Timelike, Utc};
use log::{debug, info, warn};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::observability::metrics::AiMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl BudgetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetPeriod::Hourly => "hourly",
            BudgetPeriod::Daily => "daily",
            BudgetPeriod::Weekly => "weekly",
            BudgetPeriod::Monthly => "monthly",
        }
    }

    /// Start of the period containing `now`, in UTC.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = now.date_naive().and_hms_opt(0, 0, 0).map(|d| d.and_utc());
        match self {
            BudgetPeriod::Hourly => now
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(now),
            BudgetPeriod::Daily => midnight.unwrap_or(now),
            BudgetPeriod::Weekly => {
                let days_since_monday = now.weekday().num_days_from_monday() as u64;
                now.date_naive()
                    .checked_sub_days(Days::new(days_since_monday))
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|d| d.and_utc())
                    .unwrap_or(now)
            }
            BudgetPeriod::Monthly => now
                .date_naive()
                .with_day(1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
                .unwrap_or(now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPolicy {
    /// Log a warning but allow.
    Warn,
    /// Block new requests, allow in-progress work to finish.
    SoftBlock,
    /// Block everything.
    HardBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAction {
    Allowed,
    Warned,
    Blocked,
}

/// Budget configuration for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub tenant_id: String,
    pub daily_limit_usd: Option<Decimal>,
    pub weekly_limit_usd: Option<Decimal>,
    pub monthly_limit_usd: Option<Decimal>,
    pub warn_threshold_percent: f64,
    pub policy: BudgetPolicy,
    pub enabled: bool,
}

impl BudgetConfig {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            daily_limit_usd: None,
            weekly_limit_usd: None,
            monthly_limit_usd: None,
            warn_threshold_percent: 80.0,
            policy: BudgetPolicy::Warn,
            enabled: true,
        }
    }

    pub fn limit_for(&self, period: BudgetPeriod) -> Option<Decimal> {
        match period {
            BudgetPeriod::Daily => self.daily_limit_usd,
            BudgetPeriod::Weekly => self.weekly_limit_usd,
            BudgetPeriod::Monthly => self.monthly_limit_usd,
            BudgetPeriod::Hourly => None,
        }
    }
}

/// Outcome of a budget check.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetCheckResult {
    pub allowed: bool,
    pub action: BudgetAction,
    pub current_spend_usd: Decimal,
    pub limit_usd: Option<Decimal>,
    pub percent_used: f64,
    pub period: BudgetPeriod,
    pub message: String,
    pub exceeded_periods: Vec<BudgetPeriod>,
}

impl BudgetCheckResult {
    pub fn remaining_usd(&self) -> Option<Decimal> {
        self.limit_usd
            .map(|limit| (limit - self.current_spend_usd).max(Decimal::ZERO))
    }
}

/// One recorded unit of spend, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendRecord {
    pub tenant_id: String,
    pub cost_usd: Decimal,
    pub pipeline_name: Option<String>,
    pub execution_id: Option<String>,
    pub provider: Option<String>,
    pub capability: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, Value>,
}

/// Aggregated spend for one tenant and period.
#[derive(Debug, Clone, Serialize)]
pub struct SpendSummary {
    pub tenant_id: String,
    pub period: BudgetPeriod,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub total_spend_usd: Decimal,
    pub limit_usd: Option<Decimal>,
    pub remaining_usd: Option<Decimal>,
    pub percent_used: Option<f64>,
    pub record_count: usize,
    pub by_pipeline: HashMap<String, Decimal>,
    pub by_provider: HashMap<String, Decimal>,
    pub by_capability: HashMap<String, Decimal>,
}

/// Persistence backend for budget configs and spend records.
#[async_trait]
pub trait BudgetStore: Send + Sync {
    async fn set_config(&self, config: BudgetConfig);
    async fn get_config(&self, tenant_id: &str) -> Option<BudgetConfig>;
    async fn add_spend(&self, record: SpendRecord);
    async fn spend_since(&self, tenant_id: &str, since: DateTime<Utc>) -> Decimal;
    async fn spend_records(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Vec<SpendRecord>;
    /// Remove records older than the cutoff, returning how many.
    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> usize;
}

#[derive(Default)]
struct BudgetState {
    configs: HashMap<String, BudgetConfig>,
    records: Vec<SpendRecord>,
}

/// In-memory budget store for development and testing.
#[derive(Default)]
pub struct InMemoryBudgetStore {
    state: Mutex<BudgetState>,
}

impl InMemoryBudgetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BudgetStore for InMemoryBudgetStore {
    async fn set_config(&self, config: BudgetConfig) {
        let mut state = self.state.lock().await;
        state.configs.insert(config.tenant_id.clone(), config);
    }

    async fn get_config(&self, tenant_id: &str) -> Option<BudgetConfig> {
        self.state.lock().await.configs.get(tenant_id).cloned()
    }

    async fn add_spend(&self, record: SpendRecord) {
        self.state.lock().await.records.push(record);
    }

    async fn spend_since(&self, tenant_id: &str, since: DateTime<Utc>) -> Decimal {
        self.state
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.timestamp >= since)
            .map(|r| r.cost_usd)
            .sum()
    }

    async fn spend_records(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Vec<SpendRecord> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.timestamp >= since)
            .take(limit)
            .cloned()
            .collect()
    }

    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state.records.retain(|r| r.timestamp >= cutoff);
        before - state.records.len()
    }
}

/// Budget service: configure limits, gate executions, track spend.
pub struct BudgetService {
    store: Arc<dyn BudgetStore>,
    default_daily_limit: Option<Decimal>,
    default_monthly_limit: Option<Decimal>,
    metrics: Option<Arc<AiMetrics>>,
}

impl Default for BudgetService {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryBudgetStore::new()))
    }
}

impl BudgetService {
    pub fn new(store: Arc<dyn BudgetStore>) -> Self {
        Self {
            store,
            default_daily_limit: None,
            default_monthly_limit: None,
            metrics: None,
        }
    }

    /// Fallback limits applied to tenants without an explicit config.
    pub fn with_default_limits(
        mut self,
        daily: Option<Decimal>,
        monthly: Option<Decimal>,
    ) -> Self {
        self.default_daily_limit = daily;
        self.default_monthly_limit = monthly;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AiMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Upsert a tenant's budget configuration.
    pub async fn set_budget(&self, config: BudgetConfig) -> BudgetConfig {
        info!(
            "budget configured for tenant '{}' policy={:?} daily={:?} monthly={:?}",
            config.tenant_id, config.policy, config.daily_limit_usd, config.monthly_limit_usd
        );
        self.store.set_config(config.clone()).await;
        config
    }

    /// Pre-execution check across every configured period.
    ///
    /// Returns the worst result: any blocked period wins; among
    /// non-blocked, a warn beats a plain allow. A period counts as
    /// exceeded when the projected spend passes its limit or the current
    /// spend has already reached it.
    pub async fn check_budget(
        &self,
        tenant_id: &str,
        estimated_cost_usd: Option<Decimal>,
    ) -> BudgetCheckResult {
        let config = match self.store.get_config(tenant_id).await {
            Some(config) => config,
            None => {
                let mut config = BudgetConfig::new(tenant_id);
                config.daily_limit_usd = self.default_daily_limit;
                config.monthly_limit_usd = self.default_monthly_limit;
                config
            }
        };

        if !config.enabled {
            return BudgetCheckResult {
                allowed: true,
                action: BudgetAction::Allowed,
                current_spend_usd: Decimal::ZERO,
                limit_usd: None,
                percent_used: 0.0,
                period: BudgetPeriod::Daily,
                message: "budget enforcement disabled".to_string(),
                exceeded_periods: Vec::new(),
            };
        }

        let now = Utc::now();
        let estimated = estimated_cost_usd.unwrap_or(Decimal::ZERO);
        let mut exceeded_periods: Vec<BudgetPeriod> = Vec::new();
        let mut worst: Option<BudgetCheckResult> = None;

        for period in [
            BudgetPeriod::Daily,
            BudgetPeriod::Weekly,
            BudgetPeriod::Monthly,
        ] {
            let Some(limit) = config.limit_for(period) else {
                continue;
            };

            let current_spend = self.store.spend_since(tenant_id, period.start(now)).await;
            let projected = current_spend + estimated;
            let percent_used = percent_of(projected, limit);

            if projected > limit || current_spend >= limit {
                exceeded_periods.push(period);
                let blocked = config.policy != BudgetPolicy::Warn;
                let result = BudgetCheckResult {
                    allowed: !blocked,
                    action: if blocked {
                        BudgetAction::Blocked
                    } else {
                        BudgetAction::Warned
                    },
                    current_spend_usd: current_spend,
                    limit_usd: Some(limit),
                    percent_used,
                    period,
                    message: format!(
                        "{} budget exceeded: ${projected:.4} / ${limit:.2}",
                        period.as_str()
                    ),
                    exceeded_periods: exceeded_periods.clone(),
                };

                if worst.as_ref().map(|w| w.allowed).unwrap_or(true) {
                    worst = Some(result);
                }
            } else if percent_used >= config.warn_threshold_percent {
                if worst.is_none() {
                    worst = Some(BudgetCheckResult {
                        allowed: true,
                        action: BudgetAction::Warned,
                        current_spend_usd: current_spend,
                        limit_usd: Some(limit),
                        percent_used,
                        period,
                        message: format!(
                            "{} budget at {percent_used:.1}%",
                            period.as_str()
                        ),
                        exceeded_periods: Vec::new(),
                    });
                }
            }
        }

        if let Some(mut worst) = worst {
            worst.exceeded_periods = exceeded_periods;
            if !worst.allowed {
                warn!(
                    "budget blocked for tenant '{tenant_id}': {}",
                    worst.message
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_budget_exceeded(tenant_id, "blocked");
                }
            }
            return worst;
        }

        let daily_spend = self
            .store
            .spend_since(tenant_id, BudgetPeriod::Daily.start(now))
            .await;
        let daily_limit = config.daily_limit_usd.or(self.default_daily_limit);
        BudgetCheckResult {
            allowed: true,
            action: BudgetAction::Allowed,
            current_spend_usd: daily_spend,
            limit_usd: daily_limit,
            percent_used: daily_limit
                .map(|limit| percent_of(daily_spend, limit))
                .unwrap_or(0.0),
            period: BudgetPeriod::Daily,
            message: "within budget".to_string(),
            exceeded_periods: Vec::new(),
        }
    }

    /// Record spend and refresh the exported budget gauges.
    pub async fn track_spend(&self, record: SpendRecord) -> SpendRecord {
        debug!(
            "spend tracked: ${} tenant={} pipeline={:?}",
            record.cost_usd, record.tenant_id, record.pipeline_name
        );
        self.store.add_spend(record.clone()).await;

        if let Some(metrics) = &self.metrics {
            if let Some(config) = self.store.get_config(&record.tenant_id).await {
                let now = Utc::now();
                for period in [BudgetPeriod::Daily, BudgetPeriod::Monthly] {
                    if let Some(limit) = config.limit_for(period) {
                        let spend = self
                            .store
                            .spend_since(&record.tenant_id, period.start(now))
                            .await;
                        metrics.record_budget_status(
                            &record.tenant_id,
                            period.as_str(),
                            spend,
                            limit,
                        );
                    }
                }
            }
        }

        record
    }

    /// Totals and breakdowns for records since the period start.
    pub async fn get_spend_summary(&self, tenant_id: &str, period: BudgetPeriod) -> SpendSummary {
        let now = Utc::now();
        let since = period.start(now);
        let config = self.store.get_config(tenant_id).await;
        let records = self.store.spend_records(tenant_id, since, 10_000).await;

        let mut by_pipeline: HashMap<String, Decimal> = HashMap::new();
        let mut by_provider: HashMap<String, Decimal> = HashMap::new();
        let mut by_capability: HashMap<String, Decimal> = HashMap::new();
        let mut total = Decimal::ZERO;

        for record in &records {
            total += record.cost_usd;
            if let Some(pipeline) = &record.pipeline_name {
                *by_pipeline.entry(pipeline.clone()).or_default() += record.cost_usd;
            }
            if let Some(provider) = &record.provider {
                *by_provider.entry(provider.clone()).or_default() += record.cost_usd;
            }
            if let Some(capability) = &record.capability {
                *by_capability.entry(capability.clone()).or_default() += record.cost_usd;
            }
        }

        let limit = config.as_ref().and_then(|c| c.limit_for(period));
        SpendSummary {
            tenant_id: tenant_id.to_string(),
            period,
            since,
            until: now,
            total_spend_usd: total,
            limit_usd: limit,
            remaining_usd: limit.map(|l| (l - total).max(Decimal::ZERO)),
            percent_used: limit.map(|l| percent_of(total, l)),
            record_count: records.len(),
            by_pipeline,
            by_provider,
            by_capability,
        }
    }

    pub async fn cleanup_old_records(&self, cutoff: DateTime<Utc>) -> usize {
        self.store.cleanup_older_than(cutoff).await
    }
}

fn percent_of(spend: Decimal, limit: Decimal) -> f64 {
    if limit <= Decimal::ZERO {
        return 0.0;
    }
    (spend / limit * Decimal::from(100)).to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(tenant: &str, cost: Decimal) -> SpendRecord {
        SpendRecord {
            tenant_id: tenant.to_string(),
            cost_usd: cost,
            pipeline_name: Some("call_analysis".to_string()),
            execution_id: None,
            provider: Some("deepgram".to_string()),
            capability: Some("transcription".to_string()),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn period_starts_truncate_in_utc() {
        let now = Utc.with_ymd_and_hms(2025, 3, 19, 14, 45, 30).unwrap(); // a Wednesday

        assert_eq!(
            BudgetPeriod::Hourly.start(now),
            Utc.with_ymd_and_hms(2025, 3, 19, 14, 0, 0).unwrap()
        );
        assert_eq!(
            BudgetPeriod::Daily.start(now),
            Utc.with_ymd_and_hms(2025, 3, 19, 0, 0, 0).unwrap()
        );
        assert_eq!(
            BudgetPeriod::Weekly.start(now),
            Utc.with_ymd_and_hms(2025, 3, 17, 0, 0, 0).unwrap() // Monday
        );
        assert_eq!(
            BudgetPeriod::Monthly.start(now),
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn hard_block_refuses_when_over_limit() {
        let service = BudgetService::default();
        let mut config = BudgetConfig::new("tenant-1");
        config.daily_limit_usd = Some(Decimal::new(100, 2)); // $1.00
        config.policy = BudgetPolicy::HardBlock;
        service.set_budget(config).await;

        service
            .track_spend(record("tenant-1", Decimal::new(95, 2)))
            .await;

        let check = service
            .check_budget("tenant-1", Some(Decimal::new(10, 2)))
            .await;
        assert!(!check.allowed);
        assert_eq!(check.action, BudgetAction::Blocked);
        assert_eq!(check.period, BudgetPeriod::Daily);

        // Once at the limit, any estimate (including zero) is blocked.
        service
            .track_spend(record("tenant-1", Decimal::new(5, 2)))
            .await;
        let check = service.check_budget("tenant-1", Some(Decimal::ZERO)).await;
        assert!(!check.allowed);
    }

    #[tokio::test]
    async fn warn_policy_allows_with_warning() {
        let service = BudgetService::default();
        let mut config = BudgetConfig::new("tenant-2");
        config.daily_limit_usd = Some(Decimal::new(100, 2));
        config.policy = BudgetPolicy::Warn;
        service.set_budget(config).await;

        service
            .track_spend(record("tenant-2", Decimal::new(150, 2)))
            .await;

        let check = service.check_budget("tenant-2", None).await;
        assert!(check.allowed);
        assert_eq!(check.action, BudgetAction::Warned);
        assert_eq!(check.exceeded_periods, vec![BudgetPeriod::Daily]);
    }

    #[tokio::test]
    async fn warn_threshold_triggers_before_limit() {
        let service = BudgetService::default();
        let mut config = BudgetConfig::new("tenant-3");
        config.daily_limit_usd = Some(Decimal::new(100, 2));
        service.set_budget(config).await;

        service
            .track_spend(record("tenant-3", Decimal::new(85, 2)))
            .await;

        let check = service.check_budget("tenant-3", None).await;
        assert!(check.allowed);
        assert_eq!(check.action, BudgetAction::Warned);
        assert!(check.percent_used >= 80.0);
    }

    #[tokio::test]
    async fn disabled_budget_always_allows() {
        let service = BudgetService::default();
        let mut config = BudgetConfig::new("tenant-4");
        config.daily_limit_usd = Some(Decimal::ONE);
        config.policy = BudgetPolicy::HardBlock;
        config.enabled = false;
        service.set_budget(config).await;

        service
            .track_spend(record("tenant-4", Decimal::new(500, 2)))
            .await;
        let check = service.check_budget("tenant-4", None).await;
        assert!(check.allowed);
        assert_eq!(check.action, BudgetAction::Allowed);
    }

    #[tokio::test]
    async fn unconfigured_tenant_uses_default_limits() {
        let service = BudgetService::default()
            .with_default_limits(Some(Decimal::new(50, 2)), None);

        service
            .track_spend(record("tenant-5", Decimal::new(60, 2)))
            .await;
        let check = service.check_budget("tenant-5", None).await;
        // Default policy is WARN.
        assert!(check.allowed);
        assert_eq!(check.action, BudgetAction::Warned);
    }

    #[tokio::test]
    async fn spend_summary_breaks_down_by_dimension() {
        let service = BudgetService::default();
        let mut first = record("tenant-6", Decimal::new(10, 2));
        first.provider = Some("deepgram".to_string());
        let mut second = record("tenant-6", Decimal::new(20, 2));
        second.provider = Some("openai".to_string());
        second.pipeline_name = Some("transcription".to_string());
        service.track_spend(first).await;
        service.track_spend(second).await;

        let summary = service
            .get_spend_summary("tenant-6", BudgetPeriod::Daily)
            .await;
        assert_eq!(summary.total_spend_usd, Decimal::new(30, 2));
        assert_eq!(summary.record_count, 2);
        assert_eq!(summary.by_provider["deepgram"], Decimal::new(10, 2));
        assert_eq!(summary.by_provider["openai"], Decimal::new(20, 2));
        assert_eq!(summary.by_pipeline["transcription"], Decimal::new(20, 2));
        assert_eq!(
            summary.by_capability["transcription"],
            Decimal::new(30, 2)
        );
    }

    #[tokio::test]
    async fn tracked_spend_raises_summary_total() {
        let service = BudgetService::default();
        let before = service
            .get_spend_summary("tenant-7", BudgetPeriod::Daily)
            .await
            .total_spend_usd;
        service
            .track_spend(record("tenant-7", Decimal::new(42, 2)))
            .await;
        let after = service
            .get_spend_summary("tenant-7", BudgetPeriod::Daily)
            .await
            .total_spend_usd;
        assert_eq!(after - before, Decimal::new(42, 2));
    }
}
