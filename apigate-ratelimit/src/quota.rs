use apigate_core::clock::Clock;
use apigate_core::model::Plan;
use apigate_store::UsageStore;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::sync::Arc;

/// Result of a monthly quota check (§4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaResult {
    pub admitted: bool,
    pub used: u64,
    pub limit: u64,
}

/// Checks usage against `plan.requests_per_month`, independent of the
/// token-bucket rate limiter. Denial is skipped entirely when overage is
/// enabled (§4.3).
pub struct QuotaChecker {
    clock: Arc<dyn Clock>,
    overage_enabled: bool,
}

impl QuotaChecker {
    pub fn new(clock: Arc<dyn Clock>, overage_enabled: bool) -> Self {
        Self {
            clock,
            overage_enabled,
        }
    }

    pub async fn check(
        &self,
        usage_store: &dyn UsageStore,
        principal_id: &str,
        plan: &Plan,
    ) -> anyhow::Result<QuotaResult> {
        let now = self.clock.now();
        let (month_start, month_end) = current_month_bounds(now);
        let summary = usage_store
            .get_summary(principal_id, month_start, month_end)
            .await?;

        let admitted = self.overage_enabled || summary.count < plan.requests_per_month;
        Ok(QuotaResult {
            admitted,
            used: summary.count,
            limit: plan.requests_per_month,
        })
    }
}

fn current_month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .expect("valid month start");
    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .expect("valid month end");
    (start, end)
}
