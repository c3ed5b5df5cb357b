pub mod error;
pub mod events;
pub mod hooks;
pub mod inference;
pub mod model;
pub mod progress;
pub mod tools;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use error::{AgentError, InferenceError, ToolCallError};
pub use events::{AgentEvent, TokenUsage};
pub use hooks::{
    ApprovalChannel, ApprovalHandler, ApprovalRequest, DangerousCommandGuard, FnHook, Hook,
    HookContext, HookDecision, HookEvent, HookHandler, HookManager,
};
pub use inference::{InferenceProvider, OpenAiProvider};
pub use model::{
    ChunkError, FinishReason, LanguageModel, ModelTurn, RawUsage, StepModel, StreamChunk,
    TurnRequest,
};
pub use progress::ProgressState;
pub use tools::{
    OutputSender, ToolContext, ToolDef, ToolHandler, ToolOutputChunk, ToolPipeline, ToolRegistry,
    ToolResult,
};
pub use types::{ContentBlock, InferenceRequest, InferenceResponse, Message, Role, StopReason, Usage};

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TURNS: usize = 40;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub max_tokens: u32,
    pub max_turns: usize,
    pub system_prompt: String,
    /// Working directory handed to every tool call.
    pub cwd: PathBuf,
}

impl AgentConfig {
    /// Defaults for `cwd`, with the built-in system prompt pointing at it.
    pub fn for_cwd(cwd: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into();
        Self {
            model: DEFAULT_MODEL.into(),
            max_tokens: 4096,
            max_turns: DEFAULT_MAX_TURNS,
            system_prompt: default_system_prompt(&cwd),
            cwd,
        }
    }

    /// Defaults overridden by `MODEL_ID` and `MAX_TURNS`.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// [`AgentConfig::from_env`] over an arbitrary variable source.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(model) = lookup("MODEL_ID").filter(|m| !m.is_empty()) {
            config.model = model;
        }
        if let Some(raw) = lookup("MAX_TURNS") {
            match raw.parse() {
                Ok(n) => config.max_turns = n,
                Err(_) => warn!(value = %raw, "ignoring invalid MAX_TURNS"),
            }
        }
        config
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::for_cwd(cwd)
    }
}

pub fn default_system_prompt(cwd: &Path) -> String {
    format!(
        "You are a coding agent running in the user's terminal. You help with software engineering tasks.

## Available Tools
- **read_file**: Read file contents (with optional offset/limit for large files)
- **glob**: Find files by pattern (e.g. \"**/*.rs\")
- **grep**: Search file contents with regex
- **tree**: Show the directory layout with file sizes
- **write_file**: Create or overwrite files (requires approval)
- **edit_file**: Make surgical edits by replacing exact string matches (requires approval)
- **bash**: Run shell commands (requires approval)

## Guidelines
- Be concise. Don't explain what you're about to do unless the task is complex.
- Use tools to read files before modifying them. Never guess at file contents.
- For multi-step tasks, briefly outline your plan, then execute.
- Match the existing code style and conventions.
- After making changes, verify they work (run tests, typecheck, etc.) when appropriate.
- If a tool call fails, diagnose the issue and try a different approach.

Current working directory: {}",
        cwd.display()
    )
}

/// The agent. Wire up a model, optionally tools and a pre-tool-use hook,
/// then drive a conversation with [`Agent::run`].
pub struct Agent {
    model: Arc<dyn LanguageModel>,
    tools: Option<Arc<ToolRegistry>>,
    pre_tool_use: Option<Arc<dyn HookHandler>>,
    output: Option<OutputSender>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(model: impl LanguageModel + 'static, config: AgentConfig) -> Self {
        Self {
            model: Arc::new(model),
            tools: None,
            pre_tool_use: None,
            output: None,
            config,
        }
    }

    pub fn with_tools(mut self, registry: ToolRegistry) -> Self {
        self.tools = Some(Arc::new(registry));
        self
    }

    /// Hook consulted before every tool call; usually a [`HookManager`].
    pub fn with_pre_tool_use(mut self, hook: impl HookHandler + 'static) -> Self {
        self.pre_tool_use = Some(Arc::new(hook));
        self
    }

    /// Sink for incremental tool output, tagged by call id.
    pub fn with_output(mut self, tx: OutputSender) -> Self {
        self.output = Some(tx);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn pipeline(&self) -> Option<ToolPipeline> {
        let registry = self.tools.clone()?;
        let mut pipeline = ToolPipeline::new(registry, self.config.cwd.clone());
        if let Some(ref hook) = self.pre_tool_use {
            pipeline = pipeline.with_pre_tool_use(hook.clone());
        }
        if let Some(ref tx) = self.output {
            pipeline = pipeline.with_output(tx.clone());
        }
        Some(pipeline)
    }

    /// Drive the conversation until the model stops asking for tools, the
    /// turn budget runs out, or `cancel` fires.
    ///
    /// The stream is lazy: nothing happens until it is polled. Each turn's
    /// model messages are appended to `history` once the turn's stream is
    /// drained. Cancellation ends the stream silently; a stream failure not
    /// caused by cancellation is yielded as the final `Err`.
    pub fn run<'a>(
        &'a self,
        history: &'a mut Vec<Message>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<AgentEvent, AgentError>> + Send + 'a {
        try_stream! {
            let max_turns = self.config.max_turns;
            let tools = self.pipeline();
            let mut turn = 0;

            loop {
                if cancel.is_cancelled() {
                    info!(turn, "agent cancelled");
                    return;
                }
                turn += 1;
                if turn > max_turns {
                    info!(max_turns, "max turns reached");
                    return;
                }

                info!(turn, max_turns, "turn start");
                yield AgentEvent::TurnStart { turn, max_turns };

                if cancel.is_cancelled() {
                    info!(turn, "agent cancelled before stream");
                    return;
                }

                let ModelTurn {
                    mut chunks,
                    response,
                    finish_reason,
                } = self.model.stream(TurnRequest {
                    system: self.config.system_prompt.clone(),
                    messages: history.clone(),
                    tools: tools.clone(),
                    cancel: cancel.clone(),
                });

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        next = chunks.next() => Some(next),
                    };
                    let Some(next) = next else {
                        info!(turn, "agent cancelled mid-stream");
                        return;
                    };
                    let Some(item) = next else {
                        break;
                    };
                    match item {
                        Ok(chunk) => {
                            yield translate(chunk);
                        }
                        Err(e) if cancel.is_cancelled() => {
                            debug!(turn, error = %e, "stream error after cancellation");
                            return;
                        }
                        Err(e) => {
                            warn!(turn, error = %e, "model stream failed");
                            Err(AgentError::Inference(e))?;
                        }
                    }
                }
                drop(chunks);

                // The deferred values may reject once cancellation lands.
                if cancel.is_cancelled() {
                    info!(turn, "agent cancelled after stream");
                    return;
                }
                let settled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    settled = async { tokio::join!(response, finish_reason) } => Some(settled),
                };
                let Some((messages, reason)) = settled else {
                    info!(turn, "agent cancelled after stream");
                    return;
                };
                let messages = messages?;
                let reason = reason?;

                history.extend(messages);
                debug!(turn, finish_reason = %reason, history = history.len(), "turn committed");

                if !reason.requests_tools() {
                    info!(turn, finish_reason = %reason, "agent complete");
                    return;
                }
            }
        }
    }
}

/// One chunk, one event.
fn translate(chunk: StreamChunk) -> AgentEvent {
    match chunk {
        StreamChunk::TextDelta { text } => AgentEvent::TextDelta { text },
        StreamChunk::ToolCall {
            tool_name,
            call_id,
            input,
        } => AgentEvent::ToolCall {
            tool_name,
            input,
            call_id,
        },
        StreamChunk::ToolResult {
            tool_name,
            call_id,
            output,
        } => {
            let output = match output {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            AgentEvent::ToolResult {
                tool_name,
                call_id,
                result: ToolResult::ok(output),
            }
        }
        StreamChunk::ToolError {
            tool_name,
            call_id,
            error,
        } => {
            let error = if error.is_empty() {
                "tool call failed".to_string()
            } else {
                error
            };
            AgentEvent::ToolResult {
                tool_name,
                call_id,
                result: ToolResult::failure(error),
            }
        }
        StreamChunk::Error { error } => AgentEvent::Error {
            error: AgentError::Inference(error.into_inference_error()),
        },
        StreamChunk::Finish { usage } => AgentEvent::Finish {
            usage: usage.unwrap_or_default().normalize(),
        },
    }
}
