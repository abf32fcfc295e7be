//! Security Headers plugin.
//!
//! Injects standardised HTTP response headers that protect clients from
//! common web-layer attacks and satisfy the transmission-security controls
//! mandated by the main compliance frameworks supported by Ando CE.
//!
//! | Standard              | Control                                               |
//! |-----------------------|-------------------------------------------------------|
//! | HIPAA                 | 164.312(e)(1) – Transmission Security (HSTS, no-store)|
//! | SOC2 Type II          | CC6.6 – Logical access controls over transmission     |
//! | ISO/IEC 27001:2022    | A.8.23 – Web filtering / A.8.24 – Cryptography        |
//! | GDPR                  | Art. 32 – technical measures (TLS + header hardening) |
//! | OWASP Top 10          | A05:2021 Security Misconfiguration                    |
//!
//! # Example plugin config
//!
//! ```yaml
//! plugins:
//!   - name: security-headers
//!     config:
//!       hsts_max_age: 31536000
//!       hsts_include_subdomains: true
//!       hsts_preload: true
//!       x_frame_options: "DENY"
//!       x_content_type_options: true
//!       referrer_policy: "no-referrer"
//!       content_security_policy: "default-src 'self'"
//!       permissions_policy: "geolocation=(), microphone=(), camera=()"
//!       no_store_cache: false
//! ```

use ando_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use serde::Deserialize;

// ─────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────

/// Configuration for the security-headers plugin.
///
/// All fields have secure defaults so the plugin is effective with an
/// empty `config: {}` block.
#[derive(Debug, Deserialize, Clone)]
struct SecurityHeadersConfig {
    /// `Strict-Transport-Security: max-age=<N>` value (seconds).
    /// Default: 31 536 000 (1 year — Chrome preload list minimum).
    #[serde(default = "default_hsts_max_age")]
    hsts_max_age: u64,

    /// Append `; includeSubDomains` to the HSTS directive.
    #[serde(default = "default_true")]
    hsts_include_subdomains: bool,

    /// Append `; preload` to the HSTS directive (required for HSTS preload list).
    #[serde(default = "default_true")]
    hsts_preload: bool,

    /// `X-Frame-Options` value: `DENY`, `SAMEORIGIN`, or empty string to omit.
    #[serde(default = "default_frame_options")]
    x_frame_options: String,

    /// Emit `X-Content-Type-Options: nosniff`.
    #[serde(default = "default_true")]
    x_content_type_options: bool,

    /// `Referrer-Policy` value.
    #[serde(default = "default_referrer_policy")]
    referrer_policy: String,

    /// `Content-Security-Policy` value.  Empty string = omit the header.
    #[serde(default)]
    content_security_policy: String,

    /// `Permissions-Policy` value.  Empty string = omit the header.
    #[serde(default = "default_permissions_policy")]
    permissions_policy: String,

    /// Emit `Cache-Control: no-store, no-cache` and `Pragma: no-cache`.
    /// **Required for PHI / PII routes** (HIPAA 164.312(e)(2)(i)).
    #[serde(default)]
    no_store_cache: bool,
}

fn default_hsts_max_age() -> u64 {
    31_536_000
}
fn default_true() -> bool {
    true
}
fn default_frame_options() -> String {
    "DENY".into()
}
fn default_referrer_policy() -> String {
    "no-referrer".into()
}
fn default_permissions_policy() -> String {
    "geolocation=(), microphone=(), camera=()".into()
}

// ─────────────────────────────────────────────────────────────
// Plugin factory
// ─────────────────────────────────────────────────────────────

/// Security Headers plugin factory.
pub struct SecurityHeadersPlugin;

impl Plugin for SecurityHeadersPlugin {
    fn name(&self) -> &str {
        "security-headers"
    }

    /// Priority 3000: runs before most other header-filter plugins so that
    /// downstream plugins can override individual headers if necessary.
    fn priority(&self) -> i32 {
        3000
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::HeaderFilter]
    }

    fn configure(&self, config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let cfg: SecurityHeadersConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("security-headers config error: {e}"))?;

        let headers = build_headers(&cfg);
        Ok(Box::new(SecurityHeadersInstance { headers }))
    }
}

// ─────────────────────────────────────────────────────────────
// Instance
// ─────────────────────────────────────────────────────────────

struct SecurityHeadersInstance {
    /// Pre-built list of (name, value) pairs to inject.  Calculated once at
    /// configure-time to avoid per-request allocation.
    headers: Vec<(String, String)>,
}

impl PluginInstance for SecurityHeadersInstance {
    fn name(&self) -> &str {
        "security-headers"
    }
    fn priority(&self) -> i32 {
        3000
    }

    fn header_filter(&self, ctx: &mut PluginContext) -> PluginResult {
        for (k, v) in &self.headers {
            ctx.response_headers.insert(k.clone(), v.clone());
        }
        PluginResult::Continue
    }
}

/// Build the flat list of response headers from a validated config.
///
/// Extracted as a free function to allow unit-testing header generation
/// without constructing a full plugin instance.
fn build_headers(cfg: &SecurityHeadersConfig) -> Vec<(String, String)> {
    let mut h: Vec<(String, String)> = Vec::with_capacity(8);

    // ── HSTS (HIPAA 164.312(e)(1), SOC2 CC6.6, ISO A.8.24) ──────
    let mut hsts = format!("max-age={}", cfg.hsts_max_age);
    if cfg.hsts_include_subdomains {
        hsts.push_str("; includeSubDomains");
    }
    if cfg.hsts_preload {
        hsts.push_str("; preload");
    }
    h.push(("strict-transport-security".into(), hsts));

    // ── Clickjacking (OWASP A05) ─────────────────────────────────
    if !cfg.x_frame_options.is_empty() {
        h.push(("x-frame-options".into(), cfg.x_frame_options.clone()));
    }

    // ── MIME sniffing ────────────────────────────────────────────
    if cfg.x_content_type_options {
        h.push(("x-content-type-options".into(), "nosniff".into()));
    }

    // ── Legacy XSS filter (IE / old Chrome) ─────────────────────
    h.push(("x-xss-protection".into(), "1; mode=block".into()));

    // ── Referrer leakage ────────────────────────────────────────
    if !cfg.referrer_policy.is_empty() {
        h.push(("referrer-policy".into(), cfg.referrer_policy.clone()));
    }

    // ── Content-Security-Policy ──────────────────────────────────
    if !cfg.content_security_policy.is_empty() {
        h.push((
            "content-security-policy".into(),
            cfg.content_security_policy.clone(),
        ));
    }

    // ── Permissions-Policy ───────────────────────────────────────
    if !cfg.permissions_policy.is_empty() {
        h.push(("permissions-policy".into(), cfg.permissions_policy.clone()));
    }

    // ── Cache-Control (PHI / PII routes — HIPAA) ─────────────────
    if cfg.no_store_cache {
        h.push(("cache-control".into(), "no-store, no-cache".into()));
        h.push(("pragma".into(), "no-cache".into()));
    }

    h
}

// ─────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────
