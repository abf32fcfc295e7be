use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Canonical declarative config, sections per §6: `server`, `upstream`,
/// `auth`, `rate_limit`, `usage`, `plans`, `endpoints`, `logging`,
/// `metrics`, `openapi`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamDefaultsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub usage: UsageConfig,
    #[serde(default)]
    pub plans: PlansConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub openapi: OpenApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// 32-byte deployment key (base64) used to encrypt sensitive settings
    /// and upstream auth_value at rest (§3, §6). Read from env in
    /// production; never checked in.
    #[serde(default)]
    pub deployment_key_base64: Option<String>,
    #[serde(default = "default_reload_interval_secs")]
    pub config_reload_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamDefaultsConfig {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: f64,
    #[serde(default = "default_max_idle_conns")]
    pub default_max_idle_conns: usize,
    #[serde(default = "default_idle_conn_timeout_secs")]
    pub default_idle_conn_timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Header name carrying the caller's API key (§4.2, default `X-API-Key`).
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_burst_tokens")]
    pub burst_tokens: u32,
    #[serde(default = "default_bucket_idle_ttl_secs")]
    pub bucket_idle_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Bounded channel capacity; 0 means unbounded (grows at memory cost,
    /// §4.7).
    #[serde(default)]
    pub bounded_capacity: usize,
    #[serde(default = "default_close_deadline_secs")]
    pub close_deadline_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlansConfig {
    #[serde(default)]
    pub overage_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointsConfig {
    #[serde(default = "default_admin_addr")]
    pub admin_addr: SocketAddr,
    #[serde(default = "default_admin_prefix")]
    pub admin_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_openapi_path")]
    pub path: String,
}

impl GatewayConfig {
    /// Load from YAML file (`APIGATE_CONFIG` env override, else default
    /// search locations) merged with `APIGATE_`-prefixed environment
    /// variables (double-underscore nesting), matching the teacher's
    /// figment-based `AndoConfig::load` (§6).
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        let env_override = std::env::var("APIGATE_CONFIG").ok();
        let path = config_path.map(str::to_string).or(env_override);

        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for default_path in &["apigate.yaml", "/etc/apigate/apigate.yaml", "config/apigate.yaml"] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        figment = figment.merge(Env::prefixed("APIGATE_").split("__"));

        let config: Self = figment.extract()?;
        Ok(config)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamDefaultsConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            usage: UsageConfig::default(),
            plans: PlansConfig::default(),
            endpoints: EndpointsConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            openapi: OpenApiConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            data_dir: default_data_dir(),
            deployment_key_base64: None,
            config_reload_interval_secs: default_reload_interval_secs(),
        }
    }
}

impl Default for UpstreamDefaultsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            default_max_idle_conns: default_max_idle_conns(),
            default_idle_conn_timeout_secs: default_idle_conn_timeout_secs(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_header: default_api_key_header(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_tokens: default_burst_tokens(),
            bucket_idle_ttl_secs: default_bucket_idle_ttl_secs(),
        }
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
            bounded_capacity: 0,
            close_deadline_secs: default_close_deadline_secs(),
        }
    }
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            overage_enabled: false,
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            admin_addr: default_admin_addr(),
            admin_prefix: default_admin_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

impl Default for OpenApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_openapi_path(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/apigate")
}
fn default_reload_interval_secs() -> u64 {
    30
}
fn default_timeout_secs() -> f64 {
    30.0
}
fn default_max_idle_conns() -> usize {
    32
}
fn default_idle_conn_timeout_secs() -> f64 {
    90.0
}
fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}
fn default_burst_tokens() -> u32 {
    0
}
fn default_bucket_idle_ttl_secs() -> u64 {
    600
}
fn default_batch_size() -> usize {
    100
}
fn default_flush_interval_secs() -> u64 {
    10
}
fn default_close_deadline_secs() -> u64 {
    5
}
fn default_admin_addr() -> SocketAddr {
    "127.0.0.1:8081".parse().unwrap()
}
fn default_admin_prefix() -> String {
    "/api/admin".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_path() -> String {
    "/metrics".to_string()
}
fn default_openapi_path() -> String {
    "/openapi.json".to_string()
}
fn default_true() -> bool {
    true
}
