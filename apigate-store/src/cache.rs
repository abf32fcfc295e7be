use apigate_core::model::Plan;
use apigate_core::route::Route;
use apigate_core::upstream::Upstream;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// In-memory snapshot read by the hot path instead of hitting SQLite per
/// request. Populated at startup and refreshed by the config holder on
/// every reload cycle (§4.1, §4.12).
#[derive(Clone)]
pub struct ConfigCache {
    pub routes: Arc<DashMap<String, Route>>,
    pub upstreams: Arc<DashMap<String, Upstream>>,
    pub plans: Arc<DashMap<String, Plan>>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(DashMap::new()),
            upstreams: Arc::new(DashMap::new()),
            plans: Arc::new(DashMap::new()),
        }
    }

    pub fn replace_routes(&self, routes: Vec<Route>) {
        self.routes.clear();
        for route in routes {
            self.routes.insert(route.id.clone(), route);
        }
        debug!(count = self.routes.len(), "route cache replaced");
    }

    pub fn replace_upstreams(&self, upstreams: Vec<Upstream>) {
        self.upstreams.clear();
        for upstream in upstreams {
            self.upstreams.insert(upstream.id.clone(), upstream);
        }
        debug!(count = self.upstreams.len(), "upstream cache replaced");
    }

    pub fn replace_plans(&self, plans: Vec<Plan>) {
        self.plans.clear();
        for plan in plans {
            self.plans.insert(plan.id.clone(), plan);
        }
        debug!(count = self.plans.len(), "plan cache replaced");
    }

    pub fn default_plan(&self) -> Option<Plan> {
        self.plans.iter().find(|p| p.is_default).map(|p| p.clone())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            routes: self.routes.len(),
            upstreams: self.upstreams.len(),
            plans: self.plans.len(),
        }
    }
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct CacheStats {
    pub routes: usize,
    pub upstreams: usize,
    pub plans: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_core::route::{MatchType, MeteringMode, Protocol};

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

    #[test]
    fn replace_routes_clears_previous_contents() {
        let cache = ConfigCache::new();
        cache.replace_routes(vec![route("r1")]);
        assert_eq!(cache.routes.len(), 1);
        cache.replace_routes(vec![route("r2")]);
        assert_eq!(cache.routes.len(), 1);
        assert!(cache.routes.contains_key("r2"));
        assert!(!cache.routes.contains_key("r1"));
    }

    #[test]
    fn default_plan_lookup() {
        let cache = ConfigCache::new();
        cache.replace_plans(vec![
            Plan {
                id: "free".into(),
                name: "free".into(),
                rate_limit_per_minute: 10,
                requests_per_month: 1000,
                price_monthly: 0.0,
                overage_price: 0.0,
                enabled: true,
                is_default: true,
            },
            Plan {
                id: "pro".into(),
                name: "pro".into(),
                rate_limit_per_minute: 100,
                requests_per_month: 100_000,
                price_monthly: 49.0,
                overage_price: 0.001,
                enabled: true,
                is_default: false,
            },
        ]);
        assert_eq!(cache.default_plan().unwrap().id, "free");
    }
}
