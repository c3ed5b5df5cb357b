use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outcome of a single tool execution.
///
/// `output` is the terse human-readable summary. `data`, when present, is what
/// the model sees instead of the whole result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A piece of incremental tool output, attributable to one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutputChunk {
    pub call_id: String,
    pub chunk: String,
    /// Set on the final marker sent once the call has returned.
    pub is_complete: bool,
}

pub type OutputSender = mpsc::UnboundedSender<ToolOutputChunk>;

/// Output sink bound to a specific call id.
#[derive(Debug, Clone)]
pub struct OutputSink {
    call_id: String,
    tx: OutputSender,
}

impl OutputSink {
    pub fn new(call_id: impl Into<String>, tx: OutputSender) -> Self {
        Self {
            call_id: call_id.into(),
            tx,
        }
    }

    pub fn emit(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        // Receiver gone means nobody is watching; the tool still runs.
        let _ = self.tx.send(ToolOutputChunk {
            call_id: self.call_id.clone(),
            chunk: chunk.to_string(),
            is_complete: false,
        });
    }

    pub(crate) fn complete(&self) {
        let _ = self.tx.send(ToolOutputChunk {
            call_id: self.call_id.clone(),
            chunk: String::new(),
            is_complete: true,
        });
    }
}

/// Everything a tool may know about its surroundings. Built fresh for each
/// invocation and dropped when the call returns.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub cwd: PathBuf,
    pub cancel: Option<CancellationToken>,
    pub output: Option<OutputSink>,
}

impl ToolContext {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            cancel: None,
            output: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = Some(output);
        self
    }

    /// Resolve a possibly-relative path against the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.cwd.join(p)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

/// A tool's execution handler. Consumers implement this for each tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: &Value, ctx: &ToolContext) -> ToolResult;
}

/// A tool definition: schema for the LLM + handler for execution.
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Requires human approval before it runs.
    pub dangerous: bool,
    pub(crate) handler: Box<dyn ToolHandler>,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            dangerous: false,
            handler: Box::new(handler),
        }
    }

    pub fn dangerous(mut self) -> Self {
        self.dangerous = true;
        self
    }

    /// The complete JSON tool definition (name, description, input_schema)
    /// sent to the LLM.
    pub fn schema(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema,
        })
    }

    pub async fn execute(&self, input: &Value, ctx: &ToolContext) -> ToolResult {
        self.handler.call(input, ctx).await
    }
}

/// Deserialize a tool's typed parameters from the model-supplied JSON.
pub fn parse_params<T: serde::de::DeserializeOwned>(input: &Value) -> Result<T, ToolResult> {
    serde_json::from_value(input.clone())
        .map_err(|e| ToolResult::failure(format!("invalid input: {e}")))
}
