use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{parse_params, ToolContext, ToolDef, ToolHandler, ToolResult};

#[derive(Deserialize)]
struct Params {
    file_path: String,
    old_string: String,
    new_string: String,
}

pub struct EditTool;

pub fn definition() -> ToolDef {
    ToolDef::new(
        "edit_file",
        "Edit a file by replacing an exact string match. The old_string must appear exactly \
         once in the file. Use this for surgical edits rather than rewriting entire files.",
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path to the file to edit"},
                "old_string": {"type": "string", "description": "The exact string to find and replace"},
                "new_string": {"type": "string", "description": "The replacement string"}
            },
            "required": ["file_path", "old_string", "new_string"]
        }),
        EditTool,
    )
    .dangerous()
}

#[async_trait]
impl ToolHandler for EditTool {
    async fn call(&self, input: &Value, ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_params(input) {
            Ok(p) => p,
            Err(result) => return result,
        };
        if params.old_string.is_empty() {
            return ToolResult::failure("old_string must not be empty");
        }
        let path = ctx.resolve(&params.file_path);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::failure(format!("{}: {e}", path.display())),
        };

        let count = content.matches(&params.old_string).count();
        match count {
            0 => return ToolResult::failure("old_string not found in file"),
            1 => {}
            n => {
                return ToolResult::failure(format!(
                    "old_string found {n} times, must be unique. Provide more context."
                ))
            }
        }

        let at = content.find(&params.old_string).unwrap_or(0);
        let updated = content.replacen(&params.old_string, &params.new_string, 1);
        if let Err(e) = tokio::fs::write(&path, &updated).await {
            return ToolResult::failure(format!("{}: {e}", path.display()));
        }

        ToolResult::ok(format!("Edited {}", path.display())).with_data(json!({
            "filePath": path.display().to_string(),
            "editLine": content[..at].split('\n').count(),
            "linesRemoved": params.old_string.split('\n').count(),
            "linesAdded": params.new_string.split('\n').count(),
            "totalLines": updated.split('\n').count(),
        }))
    }
}
