pub mod guard;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

pub use guard::{ApprovalChannel, ApprovalHandler, ApprovalRequest, DangerousCommandGuard};

/// Points in the tool lifecycle where hooks can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
}

/// What a hook gets to look at.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub tool_name: String,
    pub input: Value,
}

impl HookContext {
    pub fn new(tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Allow,
    Deny { reason: String },
}

impl HookDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        HookDecision::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, HookDecision::Allow)
    }
}

/// A predicate over a tool call that may veto it. Implementations must not
/// hold references to mutable agent state.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn handle(&self, ctx: &HookContext) -> HookDecision;
}

/// Adapter so plain closures can act as hooks.
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> HookHandler for FnHook<F>
where
    F: Fn(&HookContext) -> HookDecision + Send + Sync,
{
    async fn handle(&self, ctx: &HookContext) -> HookDecision {
        (self.0)(ctx)
    }
}

pub struct Hook {
    pub event: HookEvent,
    pub name: String,
    pub handler: Arc<dyn HookHandler>,
}

impl Hook {
    pub fn new(
        event: HookEvent,
        name: impl Into<String>,
        handler: impl HookHandler + 'static,
    ) -> Self {
        Self {
            event,
            name: name.into(),
            handler: Arc::new(handler),
        }
    }
}

/// Ordered hook pipeline. Hooks for an event run one after another in
/// registration order; the first denial wins. No hooks means allow.
#[derive(Default)]
pub struct HookManager {
    hooks: Vec<Hook>,
}

impl HookManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn register(&mut self, hook: Hook) {
        self.hooks.push(hook);
    }

    pub fn with_hook(mut self, hook: Hook) -> Self {
        self.register(hook);
        self
    }

    pub async fn run(&self, event: HookEvent, ctx: &HookContext) -> HookDecision {
        for hook in self.hooks.iter().filter(|h| h.event == event) {
            let decision = hook.handler.handle(ctx).await;
            if let HookDecision::Deny { ref reason } = decision {
                info!(hook = %hook.name, tool = %ctx.tool_name, %reason, "hook denied tool use");
                return decision;
            }
            debug!(hook = %hook.name, tool = %ctx.tool_name, "hook allowed");
        }
        HookDecision::Allow
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// A manager plugged in as the loop's pre-tool-use handler runs its
/// `PreToolUse` hooks.
#[async_trait]
impl HookHandler for HookManager {
    async fn handle(&self, ctx: &HookContext) -> HookDecision {
        self.run(HookEvent::PreToolUse, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn ctx() -> HookContext {
        HookContext::new("bash", json!({"command": "ls"}))
    }

    fn allow() -> FnHook<impl Fn(&HookContext) -> HookDecision + Send + Sync> {
        FnHook(|_: &HookContext| HookDecision::Allow)
    }

    #[tokio::test]
    async fn empty_manager_allows() {
        let manager = HookManager::new();
        assert_eq!(manager.run(HookEvent::PreToolUse, &ctx()).await, HookDecision::Allow);
    }

    #[tokio::test]
    async fn all_allowing_hooks_allow() {
        let manager = HookManager::new()
            .with_hook(Hook::new(HookEvent::PreToolUse, "a", allow()))
            .with_hook(Hook::new(HookEvent::PreToolUse, "b", allow()));
        assert!(manager.run(HookEvent::PreToolUse, &ctx()).await.is_allowed());
    }

    #[tokio::test]
    async fn first_denial_wins() {
        let manager = HookManager::new()
            .with_hook(Hook::new(
                HookEvent::PreToolUse,
                "first",
                FnHook(|_: &HookContext| HookDecision::deny("first reason")),
            ))
            .with_hook(Hook::new(
                HookEvent::PreToolUse,
                "second",
                FnHook(|_: &HookContext| HookDecision::deny("second reason")),
            ));
        assert_eq!(
            manager.run(HookEvent::PreToolUse, &ctx()).await,
            HookDecision::deny("first reason")
        );
    }

    #[tokio::test]
    async fn denial_stops_later_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let manager = HookManager::new()
            .with_hook(Hook::new(
                HookEvent::PreToolUse,
                "deny",
                FnHook(|_: &HookContext| HookDecision::deny("no")),
            ))
            .with_hook(Hook::new(
                HookEvent::PreToolUse,
                "count",
                FnHook(move |_: &HookContext| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    HookDecision::Allow
                }),
            ));
        manager.run(HookEvent::PreToolUse, &ctx()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut manager = HookManager::new();
        for name in ["one", "two", "three"] {
            let order = order.clone();
            manager.register(Hook::new(
                HookEvent::PreToolUse,
                name,
                FnHook(move |_: &HookContext| {
                    order.lock().unwrap().push(name);
                    HookDecision::Allow
                }),
            ));
        }
        manager.run(HookEvent::PreToolUse, &ctx()).await;
        assert_eq!(*order.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn other_events_are_ignored() {
        let manager = HookManager::new().with_hook(Hook::new(
            HookEvent::PostToolUse,
            "post",
            FnHook(|_: &HookContext| HookDecision::deny("post only")),
        ));
        assert!(manager.run(HookEvent::PreToolUse, &ctx()).await.is_allowed());
        assert!(!manager.run(HookEvent::PostToolUse, &ctx()).await.is_allowed());
    }

    #[tokio::test]
    async fn manager_as_handler_runs_pre_tool_use() {
        let manager = HookManager::new().with_hook(Hook::new(
            HookEvent::PreToolUse,
            "deny",
            FnHook(|c: &HookContext| HookDecision::deny(format!("no {}", c.tool_name))),
        ));
        let handler: Arc<dyn HookHandler> = Arc::new(manager);
        assert_eq!(handler.handle(&ctx()).await, HookDecision::deny("no bash"));
    }
}
