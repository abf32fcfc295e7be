use crate::cache::ConfigCache;
use crate::ports::{PlanStore, RouteStore, UpstreamStore};
use apigate_core::router::Router;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Single funnel for every reload trigger: the periodic mtime-poll task, the
/// `SIGHUP` handler, and the admin `POST /api/admin/reload` endpoint all call
/// `reload()` rather than touching the cache or router directly (§4.1,
/// §4.12).
pub struct ConfigHolder {
    router: Arc<Router>,
    cache: ConfigCache,
    route_store: Arc<dyn RouteStore>,
    upstream_store: Arc<dyn UpstreamStore>,
    plan_store: Arc<dyn PlanStore>,
    config_changed: Arc<Notify>,
}

impl ConfigHolder {
    pub fn new(
        router: Arc<Router>,
        cache: ConfigCache,
        route_store: Arc<dyn RouteStore>,
        upstream_store: Arc<dyn UpstreamStore>,
        plan_store: Arc<dyn PlanStore>,
    ) -> Self {
        Self {
            router,
            cache,
            route_store,
            upstream_store,
            plan_store,
            config_changed: Arc::new(Notify::new()),
        }
    }

    pub fn config_changed(&self) -> Arc<Notify> {
        self.config_changed.clone()
    }

    pub fn cache(&self) -> &ConfigCache {
        &self.cache
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Read the full route/upstream/plan set from the store and swap it into
    /// the cache and router atomically from readers' perspective (existing
    /// in-flight requests finish against the snapshot they already took,
    /// §4.1).
    pub async fn reload(&self) -> anyhow::Result<()> {
        let routes = self.route_store.list().await?;
        let upstreams = self.upstream_store.list().await?;
        let plans = self.plan_store.list().await?;

        let next_version = self.router.version() + 1;
        self.router.replace_all(routes.clone())?;
        self.cache.replace_routes(routes);
        self.cache.replace_upstreams(upstreams);
        self.cache.replace_plans(plans);

        info!(version = next_version, stats = ?self.cache.stats(), "config reloaded");
        self.config_changed.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_core::model::Plan;
    use apigate_core::route::{MatchType, MeteringMode, Protocol, Route};
    use apigate_core::upstream::{AuthType, Upstream};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeRoutes(Mutex<Vec<Route>>);
    #[async_trait]
    impl RouteStore for FakeRoutes {
        async fn list(&self) -> anyhow::Result<Vec<Route>> {
            Ok(self.0.lock().unwrap().clone())
        }
        async fn get(&self, _id: &str) -> anyhow::Result<Option<Route>> {
            Ok(None)
        }
        async fn upsert(&self, _route: &Route) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete(&self, _id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FakeUpstreams;
    #[async_trait]
    impl UpstreamStore for FakeUpstreams {
        async fn list(&self) -> anyhow::Result<Vec<Upstream>> {
            Ok(vec![Upstream {
                id: "u1".into(),
                name: "u1".into(),
                base_url: "http://localhost".into(),
                timeout_secs: 30.0,
                max_idle_conns: 32,
                idle_conn_timeout_secs: 90.0,
                auth_type: AuthType::None,
                auth_header: None,
                auth_value: None,
                enabled: true,
            }])
        }
        async fn get(&self, _id: &str) -> anyhow::Result<Option<Upstream>> {
            Ok(None)
        }
        async fn upsert(&self, _upstream: &Upstream) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete(&self, _id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FakePlans;
    #[async_trait]
    impl PlanStore for FakePlans {
        async fn get(&self, _id: &str) -> anyhow::Result<Option<Plan>> {
            Ok(None)
        }
        async fn get_by_name(&self, _name: &str) -> anyhow::Result<Option<Plan>> {
            Ok(None)
        }
        async fn list(&self) -> anyhow::Result<Vec<Plan>> {
            Ok(vec![])
        }
        async fn default_plan(&self) -> anyhow::Result<Option<Plan>> {
            Ok(None)
        }
        async fn upsert(&self, _plan: &Plan) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete(&self, _id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn route(id: &str) -> Route {
        Route {
            id: id.to_string(),
            name: id.to_string(),
            path_pattern: "/x".to_string(),
            match_type: MatchType::Exact,
            methods: vec![],
            headers: vec![],
            upstream_id: "u1".to_string(),
            path_rewrite: None,
            method_override: None,
            request_transform: None,
            response_transform: None,
            metering_expr: "1".to_string(),
            metering_mode: MeteringMode::Request,
            protocol: Protocol::Http,
            priority: 0,
            enabled: true,
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn reload_populates_cache_and_router_from_store() {
        let holder = ConfigHolder::new(
            Arc::new(Router::new()),
            ConfigCache::new(),
            Arc::new(FakeRoutes(Mutex::new(vec![route("r1")]))),
            Arc::new(FakeUpstreams),
            Arc::new(FakePlans),
        );

        holder.reload().await.unwrap();

        assert_eq!(holder.cache().stats().routes, 1);
        assert_eq!(holder.cache().stats().upstreams, 1);
        assert_eq!(holder.router().route_count(), 1);
    }

    #[tokio::test]
    async fn reload_notifies_waiters() {
        let holder = ConfigHolder::new(
            Arc::new(Router::new()),
            ConfigCache::new(),
            Arc::new(FakeRoutes(Mutex::new(vec![]))),
            Arc::new(FakeUpstreams),
            Arc::new(FakePlans),
        );
        let notify = holder.config_changed();
        let waited = notify.notified();
        holder.reload().await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), waited)
            .await
            .expect("reload should notify waiters");
    }
}
