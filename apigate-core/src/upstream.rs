use serde::{Deserialize, Serialize};

/// Authentication applied to outgoing calls toward the upstream (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    None,
    Header,
    Bearer,
    Basic,
}

impl Default for AuthType {
    fn default() -> Self {
        AuthType::None
    }
}

/// Named backend with base URL, timeouts, and an authentication mode
/// (GLOSSARY). Content-based load balancing across replicas is a non-goal
/// (§1), so an upstream is a single target, not a node pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upstream {
    pub id: String,
    pub name: String,
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: usize,
    #[serde(default = "default_idle_conn_timeout_secs")]
    pub idle_conn_timeout_secs: f64,

    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub auth_header: Option<String>,
    /// Encrypted at rest with the deployment key (see apigate-core::crypto).
    #[serde(default)]
    pub auth_value: Option<Vec<u8>>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
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
fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_serde() {
        let json = r#"{"id":"u1","name":"up","base_url":"http://up"}"#;
        let us: Upstream = serde_json::from_str(json).unwrap();
        assert_eq!(us.timeout_secs, 30.0);
        assert_eq!(us.max_idle_conns, 32);
        assert_eq!(us.auth_type, AuthType::None);
        assert!(us.enabled);
    }

    #[test]
    fn serde_roundtrip() {
        let us = Upstream {
            id: "u1".into(),
            name: "up".into(),
            base_url: "http://up".into(),
            timeout_secs: 5.0,
            max_idle_conns: 8,
            idle_conn_timeout_secs: 60.0,
            auth_type: AuthType::Bearer,
            auth_header: None,
            auth_value: Some(vec![1, 2, 3]),
            enabled: true,
        };
        let json = serde_json::to_string(&us).unwrap();
        let decoded: Upstream = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.base_url, "http://up");
        assert_eq!(decoded.auth_value, Some(vec![1, 2, 3]));
    }
}
