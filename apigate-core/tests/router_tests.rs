use apigate_core::route::{HeaderPredicate, MatchType, MeteringMode, Protocol, Route};
use apigate_core::router::Router;
use std::collections::HashMap;

fn route(id: &str, path: &str, match_type: MatchType, priority: i32) -> Route {
    Route {
        id: id.to_string(),
        name: id.to_string(),
        path_pattern: path.to_string(),
        match_type,
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
        priority,
        enabled: true,
        created_at: None,
        updated_at: None,
    }
}

#[test]
fn matcher_is_deterministic_regardless_of_insertion_order() {
    let a = Router::new();
    a.add_route(route("low", "/x", MatchType::Prefix, 1)).unwrap();
    a.add_route(route("high", "/x", MatchType::Prefix, 100)).unwrap();

    let b = Router::new();
    b.add_route(route("high", "/x", MatchType::Prefix, 100)).unwrap();
    b.add_route(route("low", "/x", MatchType::Prefix, 1)).unwrap();

    let empty = HashMap::new();
    assert_eq!(
        a.match_route("GET", "/x", &empty).unwrap().route.id,
        b.match_route("GET", "/x", &empty).unwrap().route.id
    );
}

#[test]
fn regex_route_requires_full_anchored_match() {
    let router = Router::new();
    router
        .add_route(route("r1", r"^/v1/items/[a-z0-9]+$", MatchType::Regex, 0))
        .unwrap();
    let empty = HashMap::new();
    assert!(router.match_route("GET", "/v1/items/abc123", &empty).is_some());
    assert!(router.match_route("GET", "/v1/items/abc123/x", &empty).is_none());
}

#[test]
fn required_header_predicate_filters_but_optional_does_not() {
    let router = Router::new();
    let mut r = route("r1", "/v1/chat", MatchType::Exact, 0);
    r.headers = vec![HeaderPredicate {
        name: "X-Tenant".to_string(),
        value: Some("acme".to_string()),
        required: true,
    }];
    router.add_route(r).unwrap();

    let mut headers = HashMap::new();
    assert!(router.match_route("GET", "/v1/chat", &headers).is_none());
    headers.insert("x-tenant".to_string(), "acme".to_string());
    assert!(router.match_route("GET", "/v1/chat", &headers).is_some());
}

#[test]
fn disabled_route_never_matches() {
    let router = Router::new();
    let mut r = route("r1", "/v1/chat", MatchType::Exact, 0);
    r.enabled = false;
    router.add_route(r).unwrap();
    assert!(router.match_route("GET", "/v1/chat", &HashMap::new()).is_none());
}

#[test]
fn replace_all_swaps_the_whole_table_atomically() {
    let router = Router::new();
    router.add_route(route("r1", "/a", MatchType::Exact, 0)).unwrap();
    router
        .replace_all(vec![route("r2", "/b", MatchType::Exact, 0)])
        .unwrap();
    let empty = HashMap::new();
    assert!(router.match_route("GET", "/a", &empty).is_none());
    assert!(router.match_route("GET", "/b", &empty).is_some());
}
