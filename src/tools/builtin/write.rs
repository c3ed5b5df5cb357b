use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{parse_params, ToolContext, ToolDef, ToolHandler, ToolResult};

#[derive(Deserialize)]
struct Params {
    file_path: String,
    content: String,
}

pub struct WriteTool;

pub fn definition() -> ToolDef {
    ToolDef::new(
        "write_file",
        "Write content to a file. Creates the file if it doesn't exist, or overwrites it. \
         Parent directories are created automatically.",
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Absolute or relative path to the file to write"},
                "content": {"type": "string", "description": "The content to write to the file"}
            },
            "required": ["file_path", "content"]
        }),
        WriteTool,
    )
    .dangerous()
}

#[async_trait]
impl ToolHandler for WriteTool {
    async fn call(&self, input: &Value, ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_params(input) {
            Ok(p) => p,
            Err(result) => return result,
        };
        let path = ctx.resolve(&params.file_path);

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::failure(format!("{}: {e}", parent.display()));
            }
        }
        if let Err(e) = tokio::fs::write(&path, &params.content).await {
            return ToolResult::failure(format!("{}: {e}", path.display()));
        }

        let chars = params.content.chars().count();
        ToolResult::ok(format!("Wrote {chars} chars to {}", path.display())).with_data(json!({
            "filePath": path.display().to_string(),
            "bytesWritten": params.content.len(),
            "linesWritten": params.content.split('\n').count(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_parents_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let result = WriteTool
            .call(&json!({"file_path": "deep/nested/out.txt", "content": "a\nb"}), &ctx)
            .await;
        assert!(result.success);
        let written = std::fs::read_to_string(dir.path().join("deep/nested/out.txt")).unwrap();
        assert_eq!(written, "a\nb");
        assert_eq!(result.data.unwrap()["linesWritten"], 2);
    }

    #[test]
    fn is_dangerous() {
        assert!(definition().dangerous);
    }
}
