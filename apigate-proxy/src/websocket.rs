//! WebSocket upgrade and transparent bridge (§6). Auth, admission, and route
//! resolution happen exactly once, in [`handle`], before the hijack; once
//! the upgrade completes, [`bridge`] just relays frames between the two
//! TCP halves until either side closes, mirroring the proxy's "stay out of
//! the way once a connection is established" stance for streaming
//! protocols (§4.5).

use crate::orchestrator::{InboundRequest, Orchestrator};
use crate::serve::{flatten_headers, parse_query};
use apigate_core::error::GatewayError;
use apigate_core::upstream::{AuthType, Upstream};
use axum::body::Body;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::{info, warn};

/// Whether a request is asking for a websocket upgrade, per RFC 6455 (the
/// `Connection` header may list `upgrade` alongside other tokens).
pub fn is_upgrade_request(headers: &axum::http::HeaderMap) -> bool {
    let upgrade = headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let connection_upgrade = headers
        .get(axum::http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    upgrade && connection_upgrade
}

/// Authenticates and admits the handshake, then (on success) completes the
/// axum upgrade and spawns the bridge. A denial before the upgrade is
/// rendered as a normal HTTP error response — the client never sees a 101
/// for a request that was never going to be allowed through.
pub async fn handle(orchestrator: Arc<Orchestrator>, peer: SocketAddr, request: Request<Body>) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(parse_query).unwrap_or_default();
    let headers = flatten_headers(request.headers());
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| peer.ip().to_string());

    let inbound = InboundRequest { method: method.clone(), path: path.clone(), query, headers, body: None, client_ip };

    let authorization = match orchestrator.authorize_websocket(&inbound).await {
        Ok(a) => a,
        Err(err) => return error_response(err),
    };

    let upstream_url = match websocket_url(&authorization.upstream, &inbound.path, &inbound.query) {
        Ok(url) => url,
        Err(err) => return error_response(err),
    };

    let (mut parts, _body) = request.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(u) => u,
        Err(rejection) => return rejection.into_response(),
    };

    info!(%peer, route_id = %authorization.route.id, "websocket upgrade accepted");

    upgrade.on_upgrade(move |socket| async move {
        let started = std::time::Instant::now();
        let (bytes_up, bytes_down) = bridge(socket, &upstream_url, &authorization.upstream, authorization.auth_value.as_deref()).await;
        orchestrator.record_websocket_usage(
            &authorization.principal,
            &authorization.key_id,
            &authorization.route,
            &method,
            &path,
            bytes_up,
            bytes_down,
            started,
        );
    })
}

fn error_response(err: GatewayError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, axum::Json(err.to_json_body())).into_response()
}

fn websocket_url(upstream: &Upstream, path: &str, query: &std::collections::HashMap<String, String>) -> Result<String, GatewayError> {
    let ws_base = if let Some(rest) = upstream.base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = upstream.base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(GatewayError::internal("upstream base_url must be http(s) to bridge a websocket"));
    };

    let mut url = format!("{}{}", ws_base.trim_end_matches('/'), path);
    if !query.is_empty() {
        if let Ok(qs) = serde_urlencoded::to_string(query) {
            url.push('?');
            url.push_str(&qs);
        }
    }
    Ok(url)
}

/// Relays frames until either half closes or errors; returns
/// `(bytes_from_client, bytes_from_upstream)` for connection-lifetime
/// `bytes` metering (§4.6).
async fn bridge(client: WebSocket, upstream_url: &str, upstream: &Upstream, auth_value: Option<&str>) -> (u64, u64) {
    let mut request = match upstream_url.into_client_request() {
        Ok(r) => r,
        Err(err) => {
            warn!(error = %err, "invalid upstream websocket url");
            return (0, 0);
        }
    };
    inject_ws_auth(&mut request, upstream, auth_value);

    let (upstream_ws, _response) = match tokio_tungstenite::connect_async(request).await {
        Ok(pair) => pair,
        Err(err) => {
            warn!(error = %err, "failed to connect to upstream websocket");
            return (0, 0);
        }
    };

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream_ws.split();

    let mut bytes_up = 0u64;
    let mut bytes_down = 0u64;

    loop {
        tokio::select! {
            msg = client_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                bytes_up += axum_message_len(&msg) as u64;
                let is_close = matches!(msg, AxumMessage::Close(_));
                if upstream_tx.send(axum_to_upstream(msg)).await.is_err() || is_close {
                    break;
                }
            }
            msg = upstream_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                bytes_down += upstream_message_len(&msg) as u64;
                let is_close = matches!(msg, UpstreamMessage::Close(_));
                if client_tx.send(upstream_to_axum(msg)).await.is_err() || is_close {
                    break;
                }
            }
        }
    }

    (bytes_up, bytes_down)
}

fn inject_ws_auth(request: &mut axum::http::Request<()>, upstream: &Upstream, auth_value: Option<&str>) {
    let Some(value) = auth_value else { return };
    let (name, header_value) = match upstream.auth_type {
        AuthType::None => return,
        AuthType::Bearer => ("authorization".to_string(), format!("Bearer {value}")),
        AuthType::Header => (upstream.auth_header.clone().unwrap_or_else(|| "Authorization".to_string()), value.to_string()),
        AuthType::Basic => {
            let (user, pass) = value.split_once(':').unwrap_or((value, ""));
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
            ("authorization".to_string(), format!("Basic {encoded}"))
        }
    };
    if let (Ok(name), Ok(value)) = (axum::http::HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&header_value)) {
        request.headers_mut().insert(name, value);
    }
}

fn axum_message_len(msg: &AxumMessage) -> usize {
    match msg {
        AxumMessage::Text(t) => t.len(),
        AxumMessage::Binary(b) => b.len(),
        AxumMessage::Ping(b) | AxumMessage::Pong(b) => b.len(),
        AxumMessage::Close(_) => 0,
    }
}

fn upstream_message_len(msg: &UpstreamMessage) -> usize {
    match msg {
        UpstreamMessage::Text(t) => t.len(),
        UpstreamMessage::Binary(b) => b.len(),
        UpstreamMessage::Ping(b) | UpstreamMessage::Pong(b) => b.len(),
        UpstreamMessage::Close(_) => 0,
        UpstreamMessage::Frame(_) => 0,
    }
}

fn axum_to_upstream(msg: AxumMessage) -> UpstreamMessage {
    match msg {
        AxumMessage::Text(t) => UpstreamMessage::Text(t.to_string().into()),
        AxumMessage::Binary(b) => UpstreamMessage::Binary(b),
        AxumMessage::Ping(b) => UpstreamMessage::Ping(b),
        AxumMessage::Pong(b) => UpstreamMessage::Pong(b),
        AxumMessage::Close(frame) => UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        })),
    }
}

fn upstream_to_axum(msg: UpstreamMessage) -> AxumMessage {
    match msg {
        UpstreamMessage::Text(t) => AxumMessage::Text(t.to_string().into()),
        UpstreamMessage::Binary(b) => AxumMessage::Binary(b),
        UpstreamMessage::Ping(b) => AxumMessage::Ping(b),
        UpstreamMessage::Pong(b) => AxumMessage::Pong(b),
        UpstreamMessage::Close(frame) => AxumMessage::Close(frame.map(|f| axum::extract::ws::CloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        })),
        UpstreamMessage::Frame(_) => AxumMessage::Binary(bytes::Bytes::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(base_url: &str) -> Upstream {
        Upstream {
            id: "u1".into(),
            name: "u1".into(),
            base_url: base_url.into(),
            timeout_secs: 30.0,
            max_idle_conns: 4,
            idle_conn_timeout_secs: 90.0,
            auth_type: AuthType::None,
            auth_header: None,
            auth_value: None,
            enabled: true,
        }
    }

    #[test]
    fn websocket_url_swaps_http_scheme_for_ws() {
        let url = websocket_url(&upstream("http://upstream.internal"), "/v1/stream", &Default::default()).unwrap();
        assert_eq!(url, "ws://upstream.internal/v1/stream");
    }

    #[test]
    fn websocket_url_swaps_https_scheme_for_wss() {
        let url = websocket_url(&upstream("https://upstream.internal"), "/v1/stream", &Default::default()).unwrap();
        assert_eq!(url, "wss://upstream.internal/v1/stream");
    }

    #[test]
    fn websocket_url_appends_query_string() {
        let query = std::collections::HashMap::from([("model".to_string(), "gpt".to_string())]);
        let url = websocket_url(&upstream("http://upstream.internal"), "/v1/stream", &query).unwrap();
        assert_eq!(url, "ws://upstream.internal/v1/stream?model=gpt");
    }

    #[test]
    fn is_upgrade_request_requires_both_headers() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(axum::http::header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(!is_upgrade_request(&headers));
        headers.insert(axum::http::header::CONNECTION, HeaderValue::from_static("Upgrade"));
        assert!(is_upgrade_request(&headers));
    }
}
