use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a route's `path_pattern` is matched against an inbound request path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Prefix,
    Regex,
}

/// How many chargeable units a completed exchange counts for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeteringMode {
    Request,
    ResponseField,
    Bytes,
    Custom,
}

impl Default for MeteringMode {
    fn default() -> Self {
        MeteringMode::Request
    }
}

/// Transport shape of the proxied exchange.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Http,
    HttpStream,
    Sse,
    Websocket,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Http
    }
}

impl Protocol {
    /// Streaming protocols must not buffer the response body.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Protocol::HttpStream | Protocol::Sse | Protocol::Websocket)
    }
}

/// A header predicate attached to a route. Required predicates filter
/// candidates; non-required ones are tie-breakers only (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderPredicate {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Declarative mapping from a request shape to an upstream and a set of
/// transforms (see GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub name: String,

    pub path_pattern: String,
    pub match_type: MatchType,

    /// Allowed HTTP methods; empty means "matches any method" (§8 boundary).
    #[serde(default)]
    pub methods: Vec<String>,

    #[serde(default)]
    pub headers: Vec<HeaderPredicate>,

    pub upstream_id: String,

    #[serde(default)]
    pub path_rewrite: Option<String>,
    #[serde(default)]
    pub method_override: Option<String>,

    #[serde(default)]
    pub request_transform: Option<crate::transform::Transform>,
    #[serde(default)]
    pub response_transform: Option<crate::transform::Transform>,

    #[serde(default = "default_metering_expr")]
    pub metering_expr: String,
    #[serde(default)]
    pub metering_mode: MeteringMode,
    #[serde(default)]
    pub protocol: Protocol,

    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_enabled() -> bool {
    true
}

fn default_metering_expr() -> String {
    "1".to_string()
}

impl Route {
    pub fn method_allowed(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Path matching per §4.1: exact equality, prefix with trailing `*`
    /// meaning "any suffix", or a fully anchored regex match.
    pub fn path_matches(&self, path: &str, compiled_regex: Option<&Regex>) -> bool {
        match self.match_type {
            MatchType::Exact => self.path_pattern == path,
            MatchType::Prefix => {
                if let Some(stripped) = self.path_pattern.strip_suffix('*') {
                    path.starts_with(stripped)
                } else {
                    path.starts_with(&self.path_pattern)
                }
            }
            MatchType::Regex => compiled_regex.map(|re| re.is_match(path)).unwrap_or(false),
        }
    }

    /// Every required header must be present (and match its value, if one is
    /// declared); non-required headers never exclude a candidate.
    pub fn headers_match(&self, request_headers: &std::collections::HashMap<String, String>) -> bool {
        self.headers.iter().filter(|h| h.required).all(|h| {
            let lower = h.name.to_ascii_lowercase();
            match request_headers
                .iter()
                .find(|(k, _)| k.to_ascii_lowercase() == lower)
            {
                None => false,
                Some((_, v)) => match &h.value {
                    Some(expected) => v == expected,
                    None => true,
                },
            }
        })
    }
}
