use crate::phase::HookContext;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// A function reachable from YAML `call: name` hooks and `metering_mode:
/// custom` route config (§4.6, §4.10).
#[async_trait]
pub trait NamedFunction: Send + Sync {
    async fn call(&self, ctx: &mut HookContext) -> anyhow::Result<Value>;
}

/// Name → function map, built once at startup.
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, Arc<dyn NamedFunction>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>, function: Arc<dyn NamedFunction>) {
        let name = name.into();
        info!(function = %name, "registered named function");
        self.functions.write().unwrap().insert(name, function);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NamedFunction>> {
        self.functions.read().unwrap().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.functions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `call: function_name` from a YAML hook; an unregistered name logs and
    /// passes rather than failing the action (§4.10).
    pub async fn call(&self, name: &str, ctx: &mut HookContext) -> anyhow::Result<Value> {
        match self.get(name) {
            Some(function) => function.call(ctx).await,
            None => {
                warn!(function = %name, "call to unregistered function ignored");
                Ok(Value::Null)
            }
        }
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
