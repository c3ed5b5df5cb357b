#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API returned {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    /// Catch-all for stream errors that arrive without a typed cause.
    #[error("{0}")]
    Stream(String),
}

/// Why a bound tool call could not produce a model-facing value at all.
/// Surfaces as a tool-error chunk, never as a loop failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolCallError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}
