use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row of the `users` table (§6 reference schema). `email` is the lookup
/// field other modules resolve refs against (§8 scenario 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub plan_id: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Identity obtained from a verified API key (GLOSSARY) — the subset of a
/// `User` the proxy's hot path needs, constructed fresh on every successful
/// auth lookup (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub plan_id: String,
    pub active: bool,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Principal {
    pub fn is_usable(&self) -> bool {
        self.active && self.revoked_at.is_none()
    }

    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            plan_id: user.plan_id.clone(),
            active: user.active,
            revoked_at: user.revoked_at,
        }
    }
}

/// §3: raw key material is returned exactly once at issuance and never
/// persisted; only `hash` is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub owner_principal_id: String,
    pub prefix: String,
    /// Opaque bcrypt hash bytes (Open Question a: stored as bytes, never a string).
    pub hash: Vec<u8>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// A revoked key is never admitted; a key with `expires_at < now` is
    /// never admitted; both are checked atomically at match time (§8).
    pub fn is_admissible(&self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        match self.expires_at {
            Some(exp) => exp >= now,
            None => true,
        }
    }
}

/// Derive the lookup prefix: leading alphanumeric run, length clamped to
/// 7–12 chars (§3).
pub fn key_prefix(raw_key: &str) -> String {
    let run: String = raw_key
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    run.chars().take(12).collect()
}

/// Policy bundle — rate limit, monthly quota, price (GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub rate_limit_per_minute: u32,
    pub requests_per_month: u64,
    pub price_monthly: f64,
    pub overage_price: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_default: bool,
}

fn default_true() -> bool {
    true
}

/// key → value setting; sensitive keys are stored encrypted with the
/// deployment key (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub encrypted: bool,
}

const SENSITIVE_SETTING_SUBSTRINGS: &[&str] = &["password", "secret", "webhook_secret"];

impl Setting {
    pub fn is_sensitive_key(key: &str) -> bool {
        let lower = key.to_ascii_lowercase();
        SENSITIVE_SETTING_SUBSTRINGS
            .iter()
            .any(|needle| lower.contains(needle))
    }
}

/// Append-only billing record (§3, §9 Open Question c: this is the billing
/// source of truth, distinct from the analytics path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub timestamp: DateTime<Utc>,
    pub principal_id: String,
    pub key_id: String,
    #[serde(default)]
    pub route_id: Option<String>,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub units: f64,
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub duration_ns: u64,
    #[serde(default)]
    pub aborted: bool,
}
