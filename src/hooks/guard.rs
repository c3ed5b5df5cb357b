use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{Hook, HookContext, HookDecision, HookEvent, HookHandler};
use crate::tools::ToolRegistry;

/// Name of the shell tool whose commands get pattern-checked.
const SHELL_TOOL: &str = "bash";

/// Shell commands that warrant a specific warning on top of the tool's
/// generic danger flag.
static RISKY_COMMANDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\brm\s+(-[rf]+\s+)?/",
        r"\bgit\s+push\s+--force",
        r"\bgit\s+reset\s+--hard",
        r"(?i)\bdrop\s+(table|database)",
        r"\bsudo\b",
        r">\s*/dev/sd",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Whether a shell command matches any of the high-risk patterns.
pub fn is_risky_command(command: &str) -> bool {
    RISKY_COMMANDS.iter().any(|re| re.is_match(command))
}

/// Asks a human whether a tool call may proceed. No UI knowledge lives on
/// this side of the trait.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_approval(&self, tool_name: &str, input: &Value) -> bool;
}

/// A single approval question travelling to the UI.
#[derive(Debug)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub input: Value,
    pub respond: oneshot::Sender<bool>,
}

/// Request/response approval over a channel. Whoever owns the receiver
/// answers each request through its `respond` sender. A dropped responder or
/// a closed channel counts as a denial.
#[derive(Clone)]
pub struct ApprovalChannel {
    tx: mpsc::Sender<ApprovalRequest>,
}

impl ApprovalChannel {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ApprovalHandler for ApprovalChannel {
    async fn request_approval(&self, tool_name: &str, input: &Value) -> bool {
        let (respond, answer) = oneshot::channel();
        let request = ApprovalRequest {
            tool_name: tool_name.to_string(),
            input: input.clone(),
            respond,
        };
        if self.tx.send(request).await.is_err() {
            warn!(tool = tool_name, "approval channel closed, denying");
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

/// Pre-tool-use policy: tools flagged dangerous in the registry need
/// approval, and risky shell commands are asked about specifically.
pub struct DangerousCommandGuard {
    dangerous: HashSet<String>,
    approver: Arc<dyn ApprovalHandler>,
}

impl DangerousCommandGuard {
    pub fn new(registry: &ToolRegistry, approver: impl ApprovalHandler + 'static) -> Self {
        Self::with_approver(registry, Arc::new(approver))
    }

    pub fn with_approver(registry: &ToolRegistry, approver: Arc<dyn ApprovalHandler>) -> Self {
        let dangerous = registry
            .iter()
            .filter(|t| t.dangerous)
            .map(|t| t.name.clone())
            .collect();
        Self {
            dangerous,
            approver,
        }
    }

    /// Wrap the guard as a `PreToolUse` hook for a `HookManager`.
    pub fn into_hook(self) -> Hook {
        Hook::new(HookEvent::PreToolUse, "dangerous-command-guard", self)
    }
}

#[async_trait]
impl HookHandler for DangerousCommandGuard {
    async fn handle(&self, ctx: &HookContext) -> HookDecision {
        if !self.dangerous.contains(&ctx.tool_name) {
            return HookDecision::Allow;
        }

        if ctx.tool_name == SHELL_TOOL {
            if let Some(command) = ctx.input.get("command").and_then(Value::as_str) {
                if is_risky_command(command) {
                    debug!(command, "risky shell command, asking for approval");
                    return if self.approver.request_approval(&ctx.tool_name, &ctx.input).await {
                        HookDecision::Allow
                    } else {
                        HookDecision::deny("user denied dangerous command")
                    };
                }
            }
        }

        if self.approver.request_approval(&ctx.tool_name, &ctx.input).await {
            HookDecision::Allow
        } else {
            HookDecision::deny("user denied tool use")
        }
    }
}
