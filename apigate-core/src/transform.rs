use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A transform is a structured document naming mutations applied in
/// declared order (§4.4). Request and response transforms are separate
/// values of this same shape; the proxy's transform engine (apigate-proxy)
/// interprets `mutations` against a live exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default)]
    pub mutations: Vec<Mutation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    SetHeaders(HashMap<String, String>),
    RemoveHeaders(Vec<String>),
    AddQuery(HashMap<String, String>),
    RewritePath(String),
    OverrideMethod(String),
    SetBodyJsonPath { path: String, value: serde_json::Value },
    RemoveBodyJsonPath { path: String },
}

impl Mutation {
    /// For streaming protocols, response transforms must only touch
    /// headers (§4.4).
    pub fn is_header_only(&self) -> bool {
        matches!(self, Mutation::SetHeaders(_) | Mutation::RemoveHeaders(_))
    }
}
