// Handler Registry & Default Handler (§4.3). A handler is a small,
// uniform interface; adapter-specific code lives behind it, never
// inside the core (§9, duck-typed handler contract -> small interface).

use async_trait::async_trait;
use saturn_broker::Task;
use saturn_injector::InjectionContext;
use std::collections::HashMap;
use std::sync::Arc;

/// `(task, context) -> (success, reason?)`. Obligations: bounded
/// wall-clock (the consumer enforces the deadline externally regardless);
/// no retention of `context` after return; idempotent under at-least-once
/// delivery.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, task: &Task, context: &InjectionContext) -> (bool, Option<String>);
}

pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    default_handler: Option<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: None,
        }
    }

    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(task_type.into(), handler);
    }

    pub fn set_default(&mut self, handler: Arc<dyn Handler>) {
        self.default_handler = Some(handler);
    }

    /// Registry miss falls through to the default handler; if neither
    /// exists the caller must fail the task with `no_handler` (§4.3).
    pub fn resolve(&self, task_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .get(task_type)
            .cloned()
            .or_else(|| self.default_handler.clone())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysSucceeds;
    #[async_trait]
    impl Handler for AlwaysSucceeds {
        async fn handle(&self, _task: &Task, _context: &InjectionContext) -> (bool, Option<String>) {
            (true, None)
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl Handler for AlwaysFails {
        async fn handle(&self, _task: &Task, _context: &InjectionContext) -> (bool, Option<String>) {
            (false, Some("api_error:500".to_string()))
        }
    }

    #[test]
    fn resolve_falls_through_to_default_on_registry_miss() {
        let mut registry = HandlerRegistry::new();
        registry.set_default(Arc::new(AlwaysSucceeds));
        registry.register("1m_realtime", Arc::new(AlwaysFails));

        assert!(registry.resolve("15m_backfill").is_some());
        assert!(registry.resolve("1m_realtime").is_some());
    }

    #[test]
    fn resolve_returns_none_when_no_handler_and_no_default() {
        let registry = HandlerRegistry::new();
        assert!(registry.resolve("unknown_type").is_none());
    }
}
