use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hook phase around a module action (§4.9/§4.10). The teacher's six-phase
/// proxy lifecycle collapses to two here: actions are not a byte-buffer
/// pipeline, they're a single storage mutation with a before and an after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    Before,
    After,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::Before => "before",
            HookPhase::After => "after",
        }
    }
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `"module.action.phase"` dispatch key (§4.10).
pub fn hook_key(module: &str, action: &str, phase: HookPhase) -> String {
    format!("{module}.{action}.{phase}")
}

/// Mutable context threaded through a hook chain. `data` is the action's
/// input/output payload; `meta` carries out-of-band values (e.g. a raw API
/// key shown once) back to the caller (§4.9 step 4).
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub module: String,
    pub action: String,
    pub data: Value,
    pub meta: Value,
}

impl HookContext {
    pub fn new(module: impl Into<String>, action: impl Into<String>, data: Value) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            data,
            meta: Value::Object(Default::default()),
        }
    }
}
