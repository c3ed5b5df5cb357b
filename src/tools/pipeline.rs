use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::handler::{OutputSender, OutputSink, ToolContext, ToolResult};
use super::registry::ToolRegistry;
use crate::error::ToolCallError;
use crate::hooks::{HookContext, HookDecision, HookHandler};

/// Executes tools on behalf of the model for one conversation.
///
/// 1. The pre-tool-use hook (if any) may veto the call; a veto becomes a
///    failed `ToolResult` and the tool never runs.
/// 2. The tool runs with a fresh `ToolContext` bound to the conversation's
///    working directory, the caller's cancellation token and an output sink
///    tagged with the call id.
/// 3. The result is normalized for the model: structured `data` when the tool
///    provides it, the whole `ToolResult` otherwise.
#[derive(Clone)]
pub struct ToolPipeline {
    registry: Arc<ToolRegistry>,
    cwd: PathBuf,
    pre_tool_use: Option<Arc<dyn HookHandler>>,
    output: Option<OutputSender>,
}

impl ToolPipeline {
    pub fn new(registry: Arc<ToolRegistry>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            cwd: cwd.into(),
            pre_tool_use: None,
            output: None,
        }
    }

    pub fn with_pre_tool_use(mut self, hook: Arc<dyn HookHandler>) -> Self {
        self.pre_tool_use = Some(hook);
        self
    }

    pub fn with_output(mut self, tx: OutputSender) -> Self {
        self.output = Some(tx);
        self
    }

    /// Run hooks and the tool, returning the raw result.
    pub async fn invoke(
        &self,
        call_id: &str,
        name: &str,
        input: &Value,
        cancel: Option<CancellationToken>,
    ) -> Result<ToolResult, ToolCallError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolCallError::UnknownTool(name.to_string()))?;

        if let Some(ref hook) = self.pre_tool_use {
            let ctx = HookContext::new(name, input.clone());
            if let HookDecision::Deny { reason } = hook.handle(&ctx).await {
                info!(tool = name, call_id, %reason, "tool call blocked");
                return Ok(ToolResult::failure(format!("Blocked: {reason}")));
            }
        }

        let sink = self
            .output
            .as_ref()
            .map(|tx| OutputSink::new(call_id, tx.clone()));
        let mut ctx = ToolContext::new(self.cwd.clone());
        ctx.cancel = cancel;
        ctx.output = sink.clone();
        let _marker = sink.map(CompletionMarker);

        debug!(tool = name, call_id, "executing tool");
        let result = tool.execute(input, &ctx).await;
        debug!(tool = name, call_id, success = result.success, "tool finished");
        Ok(result)
    }

    /// Run the full pipeline and produce the value the model sees.
    pub async fn execute(
        &self,
        call_id: &str,
        name: &str,
        input: &Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, ToolCallError> {
        let result = self.invoke(call_id, name, input, cancel).await?;
        Ok(model_value(result))
    }

    /// Delegate to the registry for schemas.
    pub fn schemas(&self) -> Vec<Value> {
        self.registry.schemas()
    }
}

/// Ends a call's output stream. Sent on drop, so a call abandoned mid-flight
/// still closes its stream.
struct CompletionMarker(OutputSink);

impl Drop for CompletionMarker {
    fn drop(&mut self) {
        self.0.complete();
    }
}

/// Structured data when present, else the whole result.
pub fn model_value(result: ToolResult) -> Value {
    match result.data {
        Some(data) => data,
        None => serde_json::to_value(&result).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::FnHook;
    use crate::tools::{ToolDef, ToolHandler};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolHandler for Counting {
        async fn call(&self, input: &Value, ctx: &ToolContext) -> ToolResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ref out) = ctx.output {
                out.emit("working");
            }
            ToolResult::ok(format!("echo {input}"))
        }
    }

    struct Structured;

    #[async_trait]
    impl ToolHandler for Structured {
        async fn call(&self, _input: &Value, ctx: &ToolContext) -> ToolResult {
            ToolResult::ok("3 files").with_data(json!({
                "count": 3,
                "cwd": ctx.cwd.display().to_string(),
            }))
        }
    }

    struct Stuck;

    #[async_trait]
    impl ToolHandler for Stuck {
        async fn call(&self, _input: &Value, ctx: &ToolContext) -> ToolResult {
            if let Some(ref out) = ctx.output {
                out.emit("started");
            }
            std::future::pending().await
        }
    }

    fn pipeline(calls: Arc<AtomicUsize>) -> ToolPipeline {
        let registry = ToolRegistry::new()
            .add(ToolDef::new("echo", "Echoes", json!({"type": "object"}), Counting { calls }))
            .add(ToolDef::new("list", "Lists", json!({"type": "object"}), Structured))
            .add(ToolDef::new("stuck", "Never returns", json!({"type": "object"}), Stuck));
        ToolPipeline::new(Arc::new(registry), "/work")
    }

    #[tokio::test]
    async fn denial_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = pipeline(calls.clone()).with_pre_tool_use(Arc::new(FnHook(|_: &HookContext| {
            HookDecision::deny("not today")
        })));
        let result = p.invoke("c1", "echo", &json!({}), None).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.output, "");
        assert_eq!(result.error.as_deref(), Some("Blocked: not today"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn allowed_call_runs_tool() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = pipeline(calls.clone())
            .with_pre_tool_use(Arc::new(FnHook(|_: &HookContext| HookDecision::Allow)));
        let result = p.invoke("c1", "echo", &json!({"x": 1}), None).await.unwrap();
        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn model_sees_data_when_present() {
        let p = pipeline(Arc::new(AtomicUsize::new(0)));
        let value = p.execute("c1", "list", &json!({}), None).await.unwrap();
        assert_eq!(value, json!({"count": 3, "cwd": "/work"}));
    }

    #[tokio::test]
    async fn model_sees_whole_result_without_data() {
        let p = pipeline(Arc::new(AtomicUsize::new(0)));
        let value = p.execute("c1", "echo", &json!({"a": 1}), None).await.unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["output"], r#"echo {"a":1}"#);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let p = pipeline(Arc::new(AtomicUsize::new(0)));
        let err = p.execute("c1", "nope", &json!({}), None).await.unwrap_err();
        assert!(matches!(err, ToolCallError::UnknownTool(ref n) if n == "nope"));
    }

    #[tokio::test]
    async fn output_is_tagged_and_completed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let p = pipeline(Arc::new(AtomicUsize::new(0))).with_output(tx);
        p.invoke("call_9", "echo", &json!({}), None).await.unwrap();

        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.call_id, "call_9");
        assert_eq!(chunk.chunk, "working");
        let done = rx.recv().await.unwrap();
        assert_eq!(done.call_id, "call_9");
        assert!(done.is_complete);
    }

    #[tokio::test]
    async fn abandoned_call_still_completes_its_output() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let p = pipeline(Arc::new(AtomicUsize::new(0))).with_output(tx);
        let args = json!({});
        let call = p.invoke("call_3", "stuck", &args, None);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), call)
                .await
                .is_err()
        );

        assert_eq!(rx.recv().await.unwrap().chunk, "started");
        let done = rx.recv().await.unwrap();
        assert_eq!(done.call_id, "call_3");
        assert!(done.is_complete);
    }

    #[tokio::test]
    async fn repeated_runs_are_identical() {
        let p = pipeline(Arc::new(AtomicUsize::new(0)));
        let first = p.invoke("c1", "list", &json!({}), None).await.unwrap();
        let second = p.invoke("c2", "list", &json!({}), None).await.unwrap();
        assert_eq!(first, second);
    }
}
