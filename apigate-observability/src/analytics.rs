//! High-cardinality analytics rollups, distinct from the billing-grade usage
//! ledger `apigate-proxy::recorder` writes (§3 Open Question c: analytics and
//! billing are separate paths with separate consistency requirements).
//!
//! Subscribes to the hook bus's `"analytics"` topic, which the orchestrator
//! publishes one event to per completed exchange
//! (`{"units": f64, "duration_ms": u128}`, `source_action` = route id).

use apigate_hooks::{Event, EventSubscriber};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

#[derive(Debug, Default)]
struct RouteCounters {
    count: AtomicU64,
    /// Units and duration accumulated as fixed-point (×1000) so the rollup
    /// can use plain atomics instead of a mutex around an f64.
    units_milli: AtomicU64,
    duration_ms_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsRollup {
    pub route_id: String,
    pub count: u64,
    pub total_units: f64,
    pub total_duration_ms: u64,
}

/// In-memory per-route rollup, refreshed continuously as analytics events
/// arrive. Read by the admin plane's `/api/admin/analytics` surface.
pub struct AnalyticsSubscriber {
    routes: DashMap<String, RouteCounters>,
}

impl AnalyticsSubscriber {
    pub fn new() -> Self {
        Self { routes: DashMap::new() }
    }

    pub fn snapshot(&self) -> Vec<AnalyticsRollup> {
        self.routes
            .iter()
            .map(|entry| {
                let counters = entry.value();
                AnalyticsRollup {
                    route_id: entry.key().clone(),
                    count: counters.count.load(Ordering::Relaxed),
                    total_units: counters.units_milli.load(Ordering::Relaxed) as f64 / 1000.0,
                    total_duration_ms: counters.duration_ms_total.load(Ordering::Relaxed),
                }
            })
            .collect()
    }
}

impl Default for AnalyticsSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSubscriber for AnalyticsSubscriber {
    fn name(&self) -> &str {
        "analytics-rollup"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let units = event.data.get("units").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let duration_ms = event.data.get("duration_ms").and_then(|v| v.as_u64()).unwrap_or(0);

        if units.is_nan() || units.is_infinite() {
            warn!(route_id = %event.source_action, "dropping non-finite units in analytics event");
            return Ok(());
        }

        let counters = self.routes.entry(event.source_action.clone()).or_default();
        counters.count.fetch_add(1, Ordering::Relaxed);
        counters.units_milli.fetch_add((units * 1000.0) as u64, Ordering::Relaxed);
        counters.duration_ms_total.fetch_add(duration_ms, Ordering::Relaxed);
        Ok(())
    }
}
