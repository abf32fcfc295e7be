use crate::route::{MatchType, Route};
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// A route plus its pre-compiled regex (when `match_type == Regex`) and the
/// monotonic sequence number it was registered under, so that routes of
/// equal priority keep declaration order (§3, §4.1, §8).
struct CompiledRoute {
    route: Route,
    regex: Option<Regex>,
    seq: u64,
}

struct CompiledRouter {
    /// Sorted descending by (priority, then ascending seq) — the first
    /// entry whose predicates accept wins.
    routes: Vec<Arc<CompiledRoute>>,
}

/// Lock-free, hot-reloadable route table.
///
/// Mirrors the teacher's ArcSwap-snapshot / DashMap-source-of-truth split:
/// readers take a snapshot at request start and finish against it even if a
/// reload swaps in a new one mid-request (§4.1).
pub struct Router {
    inner: arc_swap::ArcSwap<CompiledRouter>,
    routes: DashMap<String, Route>,
    seq_by_id: DashMap<String, u64>,
    next_seq: AtomicU64,
    version: AtomicU64,
}

/// Result of a route match.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Route,
}

impl Router {
    pub fn new() -> Self {
        Self {
            inner: arc_swap::ArcSwap::new(Arc::new(CompiledRouter { routes: Vec::new() })),
            routes: DashMap::new(),
            seq_by_id: DashMap::new(),
            next_seq: AtomicU64::new(0),
            version: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn add_route(&self, route: Route) -> anyhow::Result<()> {
        info!(route_id = %route.id, path = %route.path_pattern, "adding route");
        if !self.seq_by_id.contains_key(&route.id) {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            self.seq_by_id.insert(route.id.clone(), seq);
        }
        self.routes.insert(route.id.clone(), route);
        self.rebuild()
    }

    pub fn remove_route(&self, route_id: &str) -> anyhow::Result<()> {
        info!(route_id = %route_id, "removing route");
        self.routes.remove(route_id);
        self.seq_by_id.remove(route_id);
        self.rebuild()
    }

    pub fn get_route(&self, route_id: &str) -> Option<Route> {
        self.routes.get(route_id).map(|r| r.clone())
    }

    pub fn all_routes(&self) -> Vec<Route> {
        self.routes.iter().map(|r| r.value().clone()).collect()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Replace the entire route table atomically (used on config reload).
    pub fn replace_all(&self, routes: Vec<Route>) -> anyhow::Result<()> {
        self.routes.clear();
        self.seq_by_id.clear();
        for route in routes {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            self.seq_by_id.insert(route.id.clone(), seq);
            self.routes.insert(route.id.clone(), route);
        }
        self.rebuild()
    }

    /// Match an incoming request against the current snapshot. Readers never
    /// block a concurrent `rebuild` and never observe a torn table.
    pub fn match_route(
        &self,
        method: &str,
        path: &str,
        headers: &HashMap<String, String>,
    ) -> Option<RouteMatch> {
        let compiled = self.inner.load();
        for candidate in compiled.routes.iter() {
            let route = &candidate.route;
            if !route.enabled {
                continue;
            }
            if !route.method_allowed(method) {
                continue;
            }
            if !route.path_matches(path, candidate.regex.as_ref()) {
                continue;
            }
            if !route.headers_match(headers) {
                continue;
            }
            return Some(RouteMatch {
                route: route.clone(),
            });
        }
        None
    }

    /// Rebuild the compiled snapshot from the current route set and swap it
    /// in atomically. Does not block in-flight requests.
    pub fn rebuild(&self) -> anyhow::Result<()> {
        let mut compiled: Vec<Arc<CompiledRoute>> = Vec::with_capacity(self.routes.len());

        for entry in self.routes.iter() {
            let route = entry.value().clone();
            let seq = self
                .seq_by_id
                .get(&route.id)
                .map(|s| *s)
                .unwrap_or(u64::MAX);
            let regex = if route.match_type == MatchType::Regex {
                match Regex::new(&route.path_pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(route_id = %route.id, error = %e, "invalid regex pattern, route will never match");
                        None
                    }
                }
            } else {
                None
            };
            compiled.push(Arc::new(CompiledRoute { route, regex, seq }));
        }

        // Highest priority first; ties broken by declaration order (§4.1).
        compiled.sort_by(|a, b| b.route.priority.cmp(&a.route.priority).then(a.seq.cmp(&b.seq)));

        let count = compiled.len();
        self.inner.store(Arc::new(CompiledRouter { routes: compiled }));
        self.version.fetch_add(1, Ordering::Release);
        info!(count, "router rebuilt");
        Ok(())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{MeteringMode, Protocol};

    fn test_route(id: &str, path: &str, match_type: MatchType, methods: Vec<&str>, priority: i32) -> Route {
        Route {
            id: id.to_string(),
            name: id.to_string(),
            path_pattern: path.to_string(),
            match_type,
            methods: methods.into_iter().map(String::from).collect(),
            headers: vec![],
            upstream_id: "u1".to_string(),
            path_rewrite: None,
            method_override: None,
            request_transform: None,
            response_transform: None,
            metering_expr: "1".to_string(),
            metering_mode: MeteringMode::Request,
            protocol: Protocol::Http,
            priority,
            enabled: true,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn exact_match_by_method() {
        let router = Router::new();
        router.add_route(test_route("r1", "/api/users", MatchType::Exact, vec!["GET"], 0)).unwrap();
        router.add_route(test_route("r2", "/api/users", MatchType::Exact, vec!["POST"], 0)).unwrap();

        let empty = HashMap::new();
        assert_eq!(router.match_route("GET", "/api/users", &empty).unwrap().route.id, "r1");
        assert_eq!(router.match_route("POST", "/api/users", &empty).unwrap().route.id, "r2");
        assert!(router.match_route("DELETE", "/api/users", &empty).is_none());
    }

    #[test]
    fn priority_wins_over_declaration_order() {
        let router = Router::new();
        router.add_route(test_route("low", "/x", MatchType::Prefix, vec![], 1)).unwrap();
        router.add_route(test_route("high", "/x", MatchType::Prefix, vec![], 100)).unwrap();

        let empty = HashMap::new();
        assert_eq!(router.match_route("GET", "/x", &empty).unwrap().route.id, "high");
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let router = Router::new();
        router.add_route(test_route("first", "/x", MatchType::Prefix, vec![], 0)).unwrap();
        router.add_route(test_route("second", "/x", MatchType::Prefix, vec![], 0)).unwrap();

        let empty = HashMap::new();
        assert_eq!(router.match_route("GET", "/x", &empty).unwrap().route.id, "first");
    }

    #[test]
    fn reload_does_not_affect_existing_snapshot_semantics() {
        let router = Router::new();
        router.add_route(test_route("r1", "/a", MatchType::Exact, vec![], 1)).unwrap();
        let v1 = router.version();
        router.add_route(test_route("r2", "/b", MatchType::Exact, vec![], 1)).unwrap();
        assert!(router.version() > v1);
        let empty = HashMap::new();
        assert!(router.match_route("GET", "/a", &empty).is_some());
        assert!(router.match_route("GET", "/b", &empty).is_some());
    }
}
