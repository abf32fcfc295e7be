use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

/// VictoriaMetrics remote-write push target. Ambient infra config, not part
/// of `apigate_core::config::GatewayConfig`: only the `victoria` feature's
/// push loop needs it, and it is wired in at the admin/server layer from a
/// `Setting` row rather than the static config file.
#[derive(Debug, Clone)]
pub struct VictoriaMetricsConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub push_interval_secs: u64,
}

/// Metrics collector for the gateway.
///
/// Collects request metrics, latency histograms, and system gauges.
/// Supports both Prometheus pull (text exposition) and VictoriaMetrics push.
pub struct MetricsCollector {
    registry: Registry,

    /// Total HTTP requests by route, method, status
    pub http_requests_total: IntCounterVec,

    /// Request latency histogram by route
    pub http_request_duration: HistogramVec,

    /// Active connections gauge
    pub active_connections: IntGauge,

    /// Upstream response time histogram
    pub upstream_latency: HistogramVec,

    /// Bandwidth counters
    pub ingress_bytes: IntCounterVec,
    pub egress_bytes: IntCounterVec,

    /// Denials by reason (rate_limited, quota_exceeded, unauthorized, …)
    pub denials_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("apigate_http_requests_total", "Total HTTP requests").namespace("apigate"),
            &["route", "method", "status"],
        )?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new("apigate_http_request_duration_seconds", "Request latency")
                .namespace("apigate")
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
            &["route"],
        )?;

        let active_connections = IntGauge::new("apigate_active_connections", "Number of active connections")?;

        let upstream_latency = HistogramVec::new(
            HistogramOpts::new("apigate_upstream_latency_seconds", "Upstream response time")
                .namespace("apigate")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["upstream"],
        )?;

        let ingress_bytes = IntCounterVec::new(
            Opts::new("apigate_ingress_bytes_total", "Total ingress bandwidth").namespace("apigate"),
            &["route"],
        )?;

        let egress_bytes = IntCounterVec::new(
            Opts::new("apigate_egress_bytes_total", "Total egress bandwidth").namespace("apigate"),
            &["route"],
        )?;

        let denials_total = IntCounterVec::new(
            Opts::new("apigate_denials_total", "Requests denied before reaching the upstream").namespace("apigate"),
            &["reason"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;
        registry.register(Box::new(upstream_latency.clone()))?;
        registry.register(Box::new(ingress_bytes.clone()))?;
        registry.register(Box::new(egress_bytes.clone()))?;
        registry.register(Box::new(denials_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            active_connections,
            upstream_latency,
            ingress_bytes,
            egress_bytes,
            denials_total,
        })
    }

    /// Record a completed HTTP request.
    pub fn record_request(&self, route: &str, method: &str, status: u16, duration_secs: f64) {
        self.http_requests_total
            .with_label_values(&[route, method, &status.to_string()])
            .inc();
        self.http_request_duration.with_label_values(&[route]).observe(duration_secs);
    }

    /// Record a request denied before it reached the upstream (§7 taxonomy).
    pub fn record_denial(&self, reason: &str) {
        self.denials_total.with_label_values(&[reason]).inc();
    }

    /// Get Prometheus text exposition.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metrics = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metrics, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Start the VictoriaMetrics push loop.
    pub fn start_push_loop(self: Arc<Self>, config: VictoriaMetricsConfig) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if !config.enabled {
                return;
            }

            info!(endpoint = %config.endpoint, interval = config.push_interval_secs, "starting VictoriaMetrics push loop");

            let client = reqwest::Client::new();
            let mut tick = interval(Duration::from_secs(config.push_interval_secs));

            loop {
                tick.tick().await;

                let metrics_text = self.gather_text();

                match client
                    .post(&config.endpoint)
                    .header("Content-Type", "text/plain")
                    .body(metrics_text)
                    .send()
                    .await
                {
                    Ok(resp) => {
                        if !resp.status().is_success() {
                            error!(status = %resp.status(), "VictoriaMetrics push failed");
                        } else {
                            debug!("VictoriaMetrics push successful");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "VictoriaMetrics push error");
                    }
                }
            }
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("failed to create metrics collector")
    }
}
