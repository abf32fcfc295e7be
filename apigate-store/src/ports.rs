use apigate_core::model::{ApiKey, Plan, Setting, UsageEvent, User};
use apigate_core::route::Route;
use apigate_core::upstream::Upstream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Typed persistence ports over the relational store (§2). Implemented by
/// `SqliteStore`; kept as traits so the proxy/admin planes never depend on
/// SQL directly.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn candidates_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<ApiKey>>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<ApiKey>>;
    async fn create(&self, key: &ApiKey) -> anyhow::Result<()>;
    async fn touch_last_used(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<()>;
    async fn revoke(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, id: &str) -> anyhow::Result<Option<User>>;
    async fn get_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<User>>;
    async fn create(&self, user: &User) -> anyhow::Result<()>;
    async fn update(&self, user: &User) -> anyhow::Result<()>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn get(&self, id: &str) -> anyhow::Result<Option<Plan>>;
    async fn get_by_name(&self, name: &str) -> anyhow::Result<Option<Plan>>;
    async fn list(&self) -> anyhow::Result<Vec<Plan>>;
    async fn default_plan(&self) -> anyhow::Result<Option<Plan>>;
    /// Create/update a plan; when `is_default` is set, clears it on every
    /// other plan atomically within the same transaction (§3 invariant).
    async fn upsert(&self, plan: &Plan) -> anyhow::Result<()>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
}

/// Monthly usage rollup for quota checks (§4.3).
#[derive(Debug, Clone)]
pub struct UsageSummary {
    pub count: u64,
    pub units: f64,
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn record_batch(&self, events: &[UsageEvent]) -> anyhow::Result<()>;
    async fn get_summary(
        &self,
        principal_id: &str,
        month_start: DateTime<Utc>,
        month_end: DateTime<Utc>,
    ) -> anyhow::Result<UsageSummary>;
}

#[async_trait]
pub trait RouteStore: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<Route>>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<Route>>;
    async fn upsert(&self, route: &Route) -> anyhow::Result<()>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait UpstreamStore: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<Upstream>>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<Upstream>>;
    async fn upsert(&self, upstream: &Upstream) -> anyhow::Result<()>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait SettingStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Setting>>;
    async fn list_prefixed(&self, prefix: &str) -> anyhow::Result<Vec<Setting>>;
    async fn set(&self, setting: &Setting) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}
