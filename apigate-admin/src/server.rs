use crate::middleware::api_key_auth;
use apigate_core::config::EndpointsConfig;
use apigate_hooks::EventBus;
use apigate_modules::{channel_http, ModuleRuntime};
use apigate_observability::{AnalyticsRollup, AnalyticsSubscriber, MetricsCollector};
use apigate_store::ConfigHolder;
use axum::extract::State;
use axum::middleware;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router as AxumRouter;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Shared state across every admin-plane handler (§4.11, §5.10).
#[derive(Clone)]
pub struct AppState {
    pub config_holder: Arc<ConfigHolder>,
    pub module_runtime: Arc<ModuleRuntime>,
    pub metrics: Arc<MetricsCollector>,
    pub analytics: Arc<AnalyticsSubscriber>,
    pub events: Arc<EventBus>,
    /// Bearer token admin endpoints require; `None` allows all requests,
    /// matching the teacher's "no key configured → allow" fallback.
    pub admin_token: Option<String>,
}

/// Admin plane: mounts the generic module CRUD router (`apigate_modules`)
/// plus `/healthz`, `/metrics`, and the `/reload`/`/analytics` operational
/// surface onto one axum `Router`, per spec.md §6's reserved-prefix list.
pub struct AdminServer {
    endpoints: EndpointsConfig,
    state: AppState,
}

impl AdminServer {
    pub fn new(endpoints: EndpointsConfig, state: AppState) -> Self {
        Self { endpoints, state }
    }

    pub fn router(&self) -> AxumRouter {
        let module_api = channel_http::router(self.state.module_runtime.clone())
            .route("/reload", post(reload_handler))
            .route("/analytics", get(analytics_handler))
            .route_layer(middleware::from_fn_with_state(self.state.clone(), api_key_auth))
            .with_state(self.state.clone());

        AxumRouter::new()
            .route("/healthz", get(health_check))
            .route("/metrics", get(metrics_handler))
            .nest(&self.endpoints.admin_prefix, module_api)
            .with_state(self.state.clone())
    }

    pub async fn start(self) -> anyhow::Result<()> {
        let addr = self.endpoints.admin_addr;
        let app = self.router();

        info!(%addr, prefix = %self.endpoints.admin_prefix, "starting admin API server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.gather_text()
}

/// `POST /api/admin/reload` — re-reads routes/upstreams/plans from the store
/// and swaps them into the cache and router (§4.1, §4.12).
async fn reload_handler(State(state): State<AppState>) -> (axum::http::StatusCode, Json<Value>) {
    match state.config_holder.reload().await {
        Ok(()) => (
            axum::http::StatusCode::OK,
            Json(json!({"reloaded": true, "stats": format!("{:?}", state.config_holder.cache().stats())})),
        ),
        Err(e) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        ),
    }
}

/// `GET /api/admin/analytics` — per-route operational rollups, distinct from
/// the billing-grade `usage_events` ledger (§9 Open Question c).
async fn analytics_handler(State(state): State<AppState>) -> Json<Value> {
    let rollups: Vec<AnalyticsRollup> = state.analytics.snapshot();
    Json(json!({"routes": rollups}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_hooks::{FunctionRegistry, HookDispatcher};
    use apigate_store::cache::ConfigCache;
    use apigate_store::{PlanStore, RouteStore, UpstreamStore};
    use apigate_core::model::Plan;
    use apigate_core::route::Route;
    use apigate_core::upstream::Upstream;
    use async_trait::async_trait;

    struct EmptyRoutes;
    #[async_trait]
    impl RouteStore for EmptyRoutes {
        async fn list(&self) -> anyhow::Result<Vec<Route>> {
            Ok(vec![])
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

    struct EmptyUpstreams;
    #[async_trait]
    impl UpstreamStore for EmptyUpstreams {
        async fn list(&self) -> anyhow::Result<Vec<Upstream>> {
            Ok(vec![])
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

    struct EmptyPlans;
    #[async_trait]
    impl PlanStore for EmptyPlans {
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

    async fn test_state() -> AppState {
        let holder = Arc::new(ConfigHolder::new(
            Arc::new(apigate_core::router::Router::new()),
            ConfigCache::new(),
            Arc::new(EmptyRoutes),
            Arc::new(EmptyUpstreams),
            Arc::new(EmptyPlans),
        ));
        let events = Arc::new(EventBus::new(tokio::runtime::Handle::current(), Default::default()));
        let runtime = Arc::new(
            ModuleRuntime::new(
                "sqlite::memory:",
                Arc::new(HookDispatcher::new()),
                Arc::new(FunctionRegistry::new()),
                events.clone(),
            )
            .await
            .unwrap(),
        );

        AppState {
            config_holder: holder,
            module_runtime: runtime,
            metrics: Arc::new(MetricsCollector::default()),
            analytics: Arc::new(AnalyticsSubscriber::new()),
            events,
            admin_token: None,
        }
    }

    #[tokio::test]
    async fn healthz_and_metrics_are_unauthenticated() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let state = test_state().await;
        let server = AdminServer::new(EndpointsConfig::default(), state);
        let app = server.router();

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);

        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn reload_endpoint_requires_token_when_configured() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let mut state = test_state().await;
        state.admin_token = Some("secret".to_string());
        let server = AdminServer::new(EndpointsConfig::default(), state);
        let app = server.router();

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/admin/reload")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
