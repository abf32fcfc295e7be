use crate::phase::{hook_key, HookContext, HookPhase};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// A single bound hook handler. Registration order alone determines
/// dispatch order; there is no separate priority field.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, ctx: &mut HookContext) -> anyhow::Result<()>;
}

struct BoundHook {
    hook: Arc<dyn Hook>,
    required: bool,
}

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Dispatches hooks in pure registration order, keyed by `"module.action.phase"`.
#[derive(Default)]
pub struct HookDispatcher {
    handlers: DashMap<String, Vec<BoundHook>>,
    timeout: Duration,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            handlers: DashMap::new(),
            timeout,
        }
    }

    /// Append-only during startup (§5): binds `hook` at the end of the
    /// existing chain for `(module, action, phase)`.
    pub fn register(&self, module: &str, action: &str, phase: HookPhase, hook: Arc<dyn Hook>, required: bool) {
        let key = hook_key(module, action, phase);
        self.handlers.entry(key).or_default().push(BoundHook { hook, required });
    }

    /// `before` hooks: the first error aborts the action (§4.9 step 2).
    pub async fn dispatch_before(&self, module: &str, action: &str, ctx: &mut HookContext) -> anyhow::Result<()> {
        let key = hook_key(module, action, HookPhase::Before);
        let Some(chain) = self.handlers.get(&key) else {
            return Ok(());
        };
        for bound in chain.iter() {
            self.run_one(&key, bound, ctx).await?;
        }
        Ok(())
    }

    /// `after` hooks: run only once the storage mutation has already
    /// succeeded; a failing non-required hook is logged, never undoes the
    /// mutation (§4.9 step 4, §7).
    pub async fn dispatch_after(&self, module: &str, action: &str, ctx: &mut HookContext) {
        let key = hook_key(module, action, HookPhase::After);
        let Some(chain) = self.handlers.get(&key) else {
            return;
        };
        for bound in chain.iter() {
            if let Err(err) = self.run_one(&key, bound, ctx).await {
                warn!(hook = %bound.hook.name(), key = %key, error = %err, "after hook failed, mutation stands");
            }
        }
    }

    async fn run_one(&self, key: &str, bound: &BoundHook, ctx: &mut HookContext) -> anyhow::Result<()> {
        debug!(hook = %bound.hook.name(), key = %key, "dispatching hook");
        match tokio::time::timeout(self.timeout, bound.hook.call(ctx)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                error!(hook = %bound.hook.name(), key = %key, error = %err, "hook returned an error");
                if bound.required {
                    Err(err)
                } else {
                    Ok(())
                }
            }
            Err(_) => {
                error!(hook = %bound.hook.name(), key = %key, "hook timed out");
                if bound.required {
                    Err(anyhow::anyhow!("hook '{}' timed out", bound.hook.name()))
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn hook_count(&self, module: &str, action: &str, phase: HookPhase) -> usize {
        self.handlers.get(&hook_key(module, action, phase)).map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingHook {
        name: String,
        order: Arc<std::sync::Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Hook for RecordingHook {
        fn name(&self) -> &str {
            &self.name
        }

        async fn call(&self, _ctx: &mut HookContext) -> anyhow::Result<()> {
            self.order.lock().unwrap().push(self.name.clone());
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn before_hooks_run_in_registration_order() {
        let dispatcher = HookDispatcher::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        dispatcher.register(
            "orders",
            "create",
            HookPhase::Before,
            Arc::new(RecordingHook { name: "a".into(), order: order.clone(), fail: false }),
            true,
        );
        dispatcher.register(
            "orders",
            "create",
            HookPhase::Before,
            Arc::new(RecordingHook { name: "b".into(), order: order.clone(), fail: false }),
            true,
        );
        let mut ctx = HookContext::new("orders", "create", json!({}));
        dispatcher.dispatch_before("orders", "create", &mut ctx).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn required_before_hook_failure_aborts() {
        let dispatcher = HookDispatcher::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        dispatcher.register(
            "orders",
            "create",
            HookPhase::Before,
            Arc::new(RecordingHook { name: "a".into(), order: order.clone(), fail: true }),
            true,
        );
        dispatcher.register(
            "orders",
            "create",
            HookPhase::Before,
            Arc::new(RecordingHook { name: "b".into(), order: order.clone(), fail: false }),
            true,
        );
        let mut ctx = HookContext::new("orders", "create", json!({}));
        let result = dispatcher.dispatch_before("orders", "create", &mut ctx).await;
        assert!(result.is_err());
        assert_eq!(*order.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn after_hook_failure_never_propagates() {
        let dispatcher = HookDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        struct CountingFailure(Arc<AtomicUsize>);
        #[async_trait]
        impl Hook for CountingFailure {
            fn name(&self) -> &str {
                "counting-failure"
            }
            async fn call(&self, _ctx: &mut HookContext) -> anyhow::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("reconciliation needed")
            }
        }
        dispatcher.register(
            "orders",
            "create",
            HookPhase::After,
            Arc::new(CountingFailure(calls.clone())),
            false,
        );
        let mut ctx = HookContext::new("orders", "create", json!({}));
        dispatcher.dispatch_after("orders", "create", &mut ctx).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
