use crate::orchestrator::{InboundRequest, Orchestrator, ProxyResponse, ProxyStream};
use crate::websocket;
use apigate_core::route::Protocol;
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router as AxumRouter;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Request body size accepted for buffering before forwarding. Only the
/// inbound request body is bounded this way — `http_stream`/`sse` routes
/// still stream their *response* body unbounded via
/// `Orchestrator::process_streaming`, and `websocket` routes never buffer
/// either direction.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Binds the data-plane listener and dispatches every request through the
/// orchestrator pipeline (§4.5). Distinct from the admin plane, which is
/// served by `apigate-admin`'s own listener.
pub async fn serve(addr: SocketAddr, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let app: AxumRouter = AxumRouter::new()
        .fallback(any(handle))
        .with_state(orchestrator);

    info!(%addr, "starting data plane server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn handle(
    State(orchestrator): State<Arc<Orchestrator>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    if websocket::is_upgrade_request(request.headers()) {
        return websocket::handle(orchestrator, peer, request).await;
    }

    let inbound = match to_inbound(request, peer).await {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    match orchestrator.route_protocol(&inbound) {
        Protocol::HttpStream | Protocol::Sse => match orchestrator.process_streaming(inbound).await {
            Ok(stream) => from_proxy_stream(stream),
            Err(err) => error_response(err),
        },
        Protocol::Http | Protocol::Websocket => match orchestrator.process(inbound).await {
            Ok(resp) => from_proxy_response(resp),
            Err(err) => error_response(err),
        },
    }
}

fn error_response(err: apigate_core::error::GatewayError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, axum::Json(err.to_json_body())).into_response()
}

pub(crate) async fn to_inbound(request: Request<Body>, peer: SocketAddr) -> Result<InboundRequest, Response> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request
        .uri()
        .query()
        .map(parse_query)
        .unwrap_or_default();
    let headers = flatten_headers(request.headers());
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| peer.ip().to_string());

    let body = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid request body: {e}")).into_response())?;

    Ok(InboundRequest {
        method,
        path,
        query,
        headers,
        body: if body.is_empty() { None } else { Some(body) },
        client_ip,
    })
}

pub(crate) fn parse_query(raw: &str) -> HashMap<String, String> {
    serde_urlencoded::from_str(raw).unwrap_or_default()
}

pub(crate) fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}

fn from_proxy_response(resp: ProxyResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    for (name, value) in &resp.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from(resp.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Adapts a [`ProxyStream`] into a streamed axum response body (§4.5): the
/// upstream body is relayed chunk-by-chunk, never collected into memory.
fn from_proxy_stream(resp: ProxyStream) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    for (name, value) in &resp.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from_stream(resp.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
