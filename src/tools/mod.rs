pub mod builtin;
pub mod handler;
pub mod pipeline;
pub mod registry;

pub use handler::{
    parse_params, OutputSender, OutputSink, ToolContext, ToolDef, ToolHandler, ToolOutputChunk,
    ToolResult,
};
pub use pipeline::ToolPipeline;
pub use registry::ToolRegistry;
