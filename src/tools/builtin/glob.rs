use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::IGNORED_DIRS;
use crate::tools::{parse_params, ToolContext, ToolDef, ToolHandler, ToolResult};

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

pub struct GlobTool;

pub fn definition() -> ToolDef {
    ToolDef::new(
        "glob",
        "Find files matching a glob pattern. Returns a list of matching file paths. \
         Useful for discovering project structure and finding files by name pattern.",
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Glob pattern to match files (e.g. \"**/*.rs\", \"src/**/*.toml\")"},
                "path": {"type": "string", "description": "Directory to search in. Defaults to cwd."}
            },
            "required": ["pattern"]
        }),
        GlobTool,
    )
}

/// Files under `root` matching `pattern`, relative to `root` and sorted.
pub(crate) fn find_files(root: &Path, pattern: &str) -> Result<Vec<String>, String> {
    let full = format!("{}/{}", glob::Pattern::escape(&root.to_string_lossy()), pattern);
    let options = glob::MatchOptions {
        require_literal_leading_dot: true,
        ..Default::default()
    };
    let paths = glob::glob_with(&full, options).map_err(|e| e.to_string())?;

    let mut files: Vec<String> = paths
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .filter_map(|p| relative(root, &p))
        .filter(|rel| {
            !Path::new(rel)
                .components()
                .any(|c| IGNORED_DIRS.contains(&c.as_os_str().to_string_lossy().as_ref()))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

#[async_trait]
impl ToolHandler for GlobTool {
    async fn call(&self, input: &Value, ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_params(input) {
            Ok(p) => p,
            Err(result) => return result,
        };
        let root = params
            .path
            .as_deref()
            .map(|p| ctx.resolve(p))
            .unwrap_or_else(|| ctx.cwd.clone());

        let pattern = params.pattern.clone();
        let search_root = root.clone();
        let found = tokio::task::spawn_blocking(move || find_files(&search_root, &pattern)).await;
        let files = match found {
            Ok(Ok(files)) => files,
            Ok(Err(e)) => return ToolResult::failure(e),
            Err(e) => return ToolResult::failure(format!("glob task failed: {e}")),
        };

        if files.is_empty() {
            return ToolResult::ok("No files matched the pattern.").with_data(json!({
                "files": [],
                "count": 0,
                "pattern": params.pattern,
            }));
        }

        ToolResult::ok(format!("{} files found:\n{}", files.len(), files.join("\n"))).with_data(
            json!({
                "count": files.len(),
                "files": files,
                "pattern": params.pattern,
                "searchDir": root.display().to_string(),
            }),
        )
    }
}
