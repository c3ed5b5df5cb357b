use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{parse_params, ToolContext, ToolDef, ToolHandler, ToolResult};

#[derive(Deserialize)]
struct Params {
    file_path: String,
    /// 1-based first line.
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadTool;

pub fn definition() -> ToolDef {
    ToolDef::new(
        "read_file",
        "Read the contents of a file. Returns the file contents with line numbers. \
         Use offset and limit for large files.",
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Absolute or relative path to the file to read"},
                "offset": {"type": "number", "description": "Line number to start reading from (1-based)"},
                "limit": {"type": "number", "description": "Maximum number of lines to read"}
            },
            "required": ["file_path"]
        }),
        ReadTool,
    )
}

#[async_trait]
impl ToolHandler for ReadTool {
    async fn call(&self, input: &Value, ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_params(input) {
            Ok(p) => p,
            Err(result) => return result,
        };
        let path = ctx.resolve(&params.file_path);

        let (content, meta) = match tokio::try_join!(
            tokio::fs::read_to_string(&path),
            tokio::fs::metadata(&path)
        ) {
            Ok(pair) => pair,
            Err(e) => return ToolResult::failure(format!("{}: {e}", path.display())),
        };

        let lines: Vec<&str> = content.split('\n').collect();
        let total_lines = lines.len();
        let offset = params.offset.unwrap_or(1).saturating_sub(1);
        let limit = params.limit.unwrap_or(total_lines);
        let end = offset.saturating_add(limit);
        let slice: Vec<&str> = lines.iter().skip(offset).take(limit).copied().collect();

        let numbered = slice
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:>5} | {line}", offset + i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        ToolResult::ok(numbered).with_data(json!({
            "filePath": path.display().to_string(),
            "content": slice.join("\n"),
            "startLine": offset + 1,
            "endLine": offset + slice.len(),
            "totalLines": total_lines,
            "sizeBytes": meta.len(),
            "truncated": end < total_lines,
        }))
    }
}
