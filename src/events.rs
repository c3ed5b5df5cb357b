use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;
use crate::tools::ToolResult;

/// Token counts reported with a `Finish` event. `total_tokens` is always
/// `input_tokens + output_tokens`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        *self = Self::new(
            self.input_tokens + other.input_tokens,
            self.output_tokens + other.output_tokens,
        );
    }
}

/// Events emitted during agent execution, for UI streaming.
#[derive(Debug)]
pub enum AgentEvent {
    TurnStart {
        turn: usize,
        max_turns: usize,
    },
    TextDelta {
        text: String,
    },
    ToolCall {
        tool_name: String,
        input: Value,
        call_id: String,
    },
    ToolResult {
        tool_name: String,
        call_id: String,
        result: ToolResult,
    },
    Finish {
        usage: TokenUsage,
    },
    /// An in-band error reported by the model stream. The turn keeps going.
    Error {
        error: AgentError,
    },
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::TurnStart { .. } => "turn-start",
            AgentEvent::TextDelta { .. } => "text-delta",
            AgentEvent::ToolCall { .. } => "tool-call",
            AgentEvent::ToolResult { .. } => "tool-result",
            AgentEvent::Finish { .. } => "finish",
            AgentEvent::Error { .. } => "error",
        }
    }
}
