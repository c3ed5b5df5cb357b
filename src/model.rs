//! Streaming model binding consumed by the agent loop, plus `StepModel`,
//! which turns a request/response `InferenceProvider` into one.

use std::fmt;
use std::sync::Arc;

use async_stream::try_stream;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::Stream;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{InferenceError, ToolCallError};
use crate::events::TokenUsage;
use crate::inference::InferenceProvider;
use crate::tools::ToolPipeline;
use crate::types::{ContentBlock, InferenceRequest, Message, StopReason};

/// Error payload of an in-band `Error` chunk. Providers do not always hand
/// over a typed error.
#[derive(Debug)]
pub enum ChunkError {
    Typed(InferenceError),
    Untyped(Value),
}

impl ChunkError {
    /// Untyped payloads are wrapped with their message text preserved.
    pub fn into_inference_error(self) -> InferenceError {
        match self {
            ChunkError::Typed(e) => e,
            ChunkError::Untyped(Value::String(message)) => InferenceError::Stream(message),
            ChunkError::Untyped(other) => InferenceError::Stream(other.to_string()),
        }
    }
}

/// Usage as reported upstream; either count may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl RawUsage {
    /// Missing counts become 0. Any upstream total is ignored.
    pub fn normalize(self) -> TokenUsage {
        TokenUsage::new(self.input_tokens.unwrap_or(0), self.output_tokens.unwrap_or(0))
    }
}

/// One element of a model turn's stream.
#[derive(Debug)]
pub enum StreamChunk {
    TextDelta {
        text: String,
    },
    ToolCall {
        tool_name: String,
        call_id: String,
        input: Value,
    },
    ToolResult {
        tool_name: String,
        call_id: String,
        output: Value,
    },
    ToolError {
        tool_name: String,
        call_id: String,
        error: String,
    },
    Error {
        error: ChunkError,
    },
    Finish {
        usage: Option<RawUsage>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Error,
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::ToolCalls => "tool-calls",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content-filter",
            FinishReason::Error => "error",
            FinishReason::Other(s) => s,
        }
    }

    /// Only a tool-call finish continues the loop.
    pub fn requests_tools(&self) -> bool {
        matches!(self, FinishReason::ToolCalls)
    }
}

impl From<&str> for FinishReason {
    fn from(raw: &str) -> Self {
        match raw {
            "stop" => FinishReason::Stop,
            "tool-calls" | "tool_calls" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            "content-filter" | "content_filter" => FinishReason::ContentFilter,
            "error" => FinishReason::Error,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl From<StopReason> for FinishReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::EndTurn => FinishReason::Stop,
            StopReason::ToolUse => FinishReason::ToolCalls,
            StopReason::MaxTokens => FinishReason::Length,
            StopReason::ContentFilter => FinishReason::ContentFilter,
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a model needs for one turn.
pub struct TurnRequest {
    pub system: String,
    pub messages: Vec<Message>,
    /// Tool bindings. `None` means the turn runs without tools.
    pub tools: Option<ToolPipeline>,
    pub cancel: CancellationToken,
}

/// A single turn in flight. `response` and `finish_reason` resolve once
/// `chunks` has been drained.
pub struct ModelTurn {
    pub chunks: BoxStream<'static, Result<StreamChunk, InferenceError>>,
    pub response: BoxFuture<'static, Result<Vec<Message>, InferenceError>>,
    pub finish_reason: BoxFuture<'static, Result<FinishReason, InferenceError>>,
}

pub trait LanguageModel: Send + Sync {
    fn stream(&self, request: TurnRequest) -> ModelTurn;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Arc<M> {
    fn stream(&self, request: TurnRequest) -> ModelTurn {
        (**self).stream(request)
    }
}

/// Drives a request/response provider as a streaming model. Each turn does
/// one inference, replays its content as chunks and resolves every tool call
/// through the bound pipeline before the next chunk.
pub struct StepModel<P> {
    provider: Arc<P>,
    model: String,
    max_tokens: u32,
}

impl<P: InferenceProvider + 'static> StepModel<P> {
    pub fn new(provider: P, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            provider: Arc::new(provider),
            model: model.into(),
            max_tokens,
        }
    }
}

fn unresolved() -> InferenceError {
    InferenceError::Stream("model stream ended before the turn resolved".into())
}

impl<P: InferenceProvider + 'static> LanguageModel for StepModel<P> {
    fn stream(&self, request: TurnRequest) -> ModelTurn {
        let (response_tx, response_rx) = oneshot::channel::<Vec<Message>>();
        let (finish_tx, finish_rx) = oneshot::channel::<FinishReason>();

        let provider = self.provider.clone();
        let TurnRequest {
            system,
            messages,
            tools,
            cancel,
        } = request;
        let inference = InferenceRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(system),
            tools: tools.as_ref().map(ToolPipeline::schemas).unwrap_or_default(),
            messages,
        };

        let chunks = step_chunks(provider, inference, tools, cancel, response_tx, finish_tx);

        ModelTurn {
            chunks: Box::pin(chunks),
            response: Box::pin(async move { response_rx.await.map_err(|_| unresolved()) }),
            finish_reason: Box::pin(async move { finish_rx.await.map_err(|_| unresolved()) }),
        }
    }
}

fn step_chunks<P: InferenceProvider + 'static>(
    provider: Arc<P>,
    inference: InferenceRequest,
    tools: Option<ToolPipeline>,
    cancel: CancellationToken,
    response_tx: oneshot::Sender<Vec<Message>>,
    finish_tx: oneshot::Sender<FinishReason>,
) -> impl Stream<Item = Result<StreamChunk, InferenceError>> + Send + 'static {
    try_stream! {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InferenceError::Request("request aborted".into())),
            r = provider.infer(inference) => r,
        };
        let response = response?;
        debug!(
            blocks = response.content.len(),
            stop_reason = ?response.stop_reason,
            "inference complete"
        );

        let mut assistant = Vec::new();
        let mut results = Vec::new();
        for block in response.content {
            match block {
                ContentBlock::Text { text } => {
                    assistant.push(ContentBlock::Text { text: text.clone() });
                    yield StreamChunk::TextDelta { text };
                }
                ContentBlock::ToolUse { id, name, input } => {
                    assistant.push(ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    });
                    yield StreamChunk::ToolCall {
                        tool_name: name.clone(),
                        call_id: id.clone(),
                        input: input.clone(),
                    };

                    let outcome = match &tools {
                        Some(pipeline) => {
                            pipeline.execute(&id, &name, &input, Some(cancel.clone())).await
                        }
                        None => Err(ToolCallError::UnknownTool(name.clone())),
                    };
                    match outcome {
                        Ok(output) => {
                            results.push(ContentBlock::ToolResult {
                                call_id: id.clone(),
                                name: name.clone(),
                                output: output.clone(),
                                is_error: false,
                            });
                            yield StreamChunk::ToolResult { tool_name: name, call_id: id, output };
                        }
                        Err(e) => {
                            results.push(ContentBlock::ToolResult {
                                call_id: id.clone(),
                                name: name.clone(),
                                output: Value::String(e.to_string()),
                                is_error: true,
                            });
                            yield StreamChunk::ToolError {
                                tool_name: name,
                                call_id: id,
                                error: e.to_string(),
                            };
                        }
                    }
                }
                // Providers never send results back.
                ContentBlock::ToolResult { .. } => {}
            }
        }

        yield StreamChunk::Finish {
            usage: Some(RawUsage {
                input_tokens: Some(response.usage.input_tokens),
                output_tokens: Some(response.usage.output_tokens),
            }),
        };

        let mut produced = vec![Message::assistant(assistant)];
        if !results.is_empty() {
            produced.push(Message::tool(results));
        }
        let _ = response_tx.send(produced);
        let _ = finish_tx.send(FinishReason::from(response.stop_reason));
    }
}
