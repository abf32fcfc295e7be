//! Pooled upstream HTTP client (§4.5 step 6). One `reqwest::Client` is built
//! per upstream id so connection-pool limits and timeouts follow that
//! upstream's config; grounded on the teacher's `health_check.rs`, which
//! already builds a per-upstream `reqwest::Client` with a configured timeout.

use apigate_core::error::GatewayError;
use apigate_core::upstream::{AuthType, Upstream};
use bytes::Bytes;
use dashmap::DashMap;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

/// Hop-by-hop headers that must never be forwarded verbatim (§4.5 step 6).
const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "transfer-encoding", "upgrade", "te", "trailer"];

pub struct UpstreamClients {
    clients: DashMap<String, Client>,
}

impl UpstreamClients {
    pub fn new() -> Self {
        Self { clients: DashMap::new() }
    }

    fn client_for(&self, upstream: &Upstream) -> Client {
        if let Some(existing) = self.clients.get(&upstream.id) {
            return existing.clone();
        }
        let client = Client::builder()
            .timeout(Duration::from_secs_f64(upstream.timeout_secs))
            .pool_max_idle_per_host(upstream.max_idle_conns)
            .pool_idle_timeout(Duration::from_secs_f64(upstream.idle_conn_timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        self.clients.insert(upstream.id.clone(), client.clone());
        client
    }

    /// Resolves the full upstream URL (§4.5 step 5) and forwards the
    /// request, injecting the upstream's configured auth (§3) and copying
    /// hop-by-hop-safe headers only.
    pub async fn forward(
        &self,
        upstream: &Upstream,
        method: &str,
        path: &str,
        query: &HashMap<String, String>,
        headers: &HashMap<String, String>,
        body: Option<Bytes>,
        auth_value: Option<&str>,
    ) -> Result<UpstreamResponse, GatewayError> {
        let client = self.client_for(upstream);
        let url = format!("{}{}", upstream.base_url.trim_end_matches('/'), path);

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| GatewayError::validation(format!("invalid method: {method}")))?;
        let mut req = client.request(method, &url);

        if !query.is_empty() {
            req = req.query(&query.iter().collect::<Vec<_>>());
        }

        for (name, value) in headers {
            if HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            req = req.header(name, value);
        }

        req = inject_auth(req, upstream, auth_value);

        if let Some(body) = body {
            req = req.body(body);
        }

        let started = std::time::Instant::now();
        let response = req.send().await.map_err(|err| {
            if err.is_timeout() {
                GatewayError::upstream_timeout(err.to_string())
            } else {
                GatewayError::upstream_unavailable(err.to_string())
            }
        })?;

        Ok(UpstreamResponse {
            status: response.status().as_u16(),
            headers: response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
                .collect(),
            inner: response,
            elapsed: started.elapsed(),
        })
    }
}

impl Default for UpstreamClients {
    fn default() -> Self {
        Self::new()
    }
}

fn inject_auth(req: reqwest::RequestBuilder, upstream: &Upstream, auth_value: Option<&str>) -> reqwest::RequestBuilder {
    let Some(value) = auth_value else { return req };
    match upstream.auth_type {
        AuthType::None => req,
        AuthType::Header => {
            let header_name = upstream.auth_header.as_deref().unwrap_or("Authorization");
            req.header(header_name, value)
        }
        AuthType::Bearer => req.bearer_auth(value),
        AuthType::Basic => {
            let (user, pass) = value.split_once(':').unwrap_or((value, ""));
            req.basic_auth(user, Some(pass))
        }
    }
}

/// Streamed upstream response: headers arrive immediately (§4.5 step 7),
/// body is consumed incrementally by the caller's tee reader.
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub elapsed: Duration,
    inner: reqwest::Response,
}

impl UpstreamResponse {
    pub fn into_stream(self) -> impl futures_util::Stream<Item = reqwest::Result<Bytes>> {
        self.inner.bytes_stream()
    }

    pub async fn into_bytes(self) -> Result<Bytes, GatewayError> {
        self.inner
            .bytes()
            .await
            .map_err(|err| GatewayError::upstream_unavailable(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(auth_type: AuthType) -> Upstream {
        Upstream {
            id: "u1".into(),
            name: "u1".into(),
            base_url: "http://127.0.0.1:1".into(),
            timeout_secs: 1.0,
            max_idle_conns: 4,
            idle_conn_timeout_secs: 10.0,
            auth_type,
            auth_header: None,
            auth_value: None,
            enabled: true,
        }
    }

    #[test]
    fn bearer_auth_injects_authorization_header() {
        let client = Client::new();
        let req = client.request(reqwest::Method::GET, "http://example.invalid");
        let req = inject_auth(req, &upstream(AuthType::Bearer), Some("tok"));
        let built = req.build().unwrap();
        assert!(built.headers().get("authorization").is_some());
    }

    #[test]
    fn none_auth_leaves_request_untouched() {
        let client = Client::new();
        let req = client.request(reqwest::Method::GET, "http://example.invalid");
        let req = inject_auth(req, &upstream(AuthType::None), Some("tok"));
        let built = req.build().unwrap();
        assert!(built.headers().get("authorization").is_none());
    }

    #[test]
    fn client_for_upstream_is_cached() {
        let clients = UpstreamClients::new();
        let up = upstream(AuthType::None);
        let a = clients.client_for(&up);
        let b = clients.client_for(&up);
        assert_eq!(clients.clients.len(), 1);
        drop(a);
        drop(b);
    }
}
