// Hook registry: string-keyed dispatch table for task handlers

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Type alias for task handler functions
///
/// A handler receives the task's JSON payload and reports success or failure.
/// Handlers must be idempotent: at-least-once delivery means a crashed
/// invocation can hand the same task to a handler again.
pub type TaskHandler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<(), anyhow::Error>> + Send + Sync>;

/// Registry mapping hook names to handlers
///
/// Populated once at startup, before the first invocation runs. A task whose
/// hook has no registered handler is recorded as failed, never silently
/// completed.
#[derive(Default)]
pub struct HookRegistry {
    handlers: HashMap<String, TaskHandler>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a hook name
    ///
    /// Re-registering a hook replaces the previous handler.
    pub fn register(&mut self, hook: impl Into<String>, handler: TaskHandler) {
        self.handlers.insert(hook.into(), handler);
    }

    /// Register an async function as the handler for a hook name
    ///
    /// Convenience wrapper that boxes the future, so call sites can pass a
    /// plain async closure.
    pub fn register_fn<F, Fut>(&mut self, hook: impl Into<String>, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.register(
            hook,
            Arc::new(move |payload| {
                // Coerce to the trait object here; closure return types do not unsize
                let fut: BoxFuture<'static, Result<(), anyhow::Error>> =
                    Box::pin(handler(payload));
                fut
            }),
        );
    }

    /// Look up the handler for a hook name
    pub fn get(&self, hook: &str) -> Option<TaskHandler> {
        self.handlers.get(hook).cloned()
    }

    /// Whether a handler is registered for the hook name
    pub fn contains(&self, hook: &str) -> bool {
        self.handlers.contains_key(hook)
    }

    /// Registered hook names, sorted for stable output
    pub fn hooks(&self) -> Vec<&str> {
        let mut hooks: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        hooks.sort_unstable();
        hooks
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks())
            .finish()
    }
}
