use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::IGNORED_DIRS;
use crate::tools::{parse_params, ToolContext, ToolDef, ToolHandler, ToolResult};

const MAX_RESULTS: usize = 50;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    file_pattern: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Serialize)]
struct GrepMatch {
    file: String,
    line: usize,
    content: String,
}

pub struct GrepTool;

pub fn definition() -> ToolDef {
    ToolDef::new(
        "grep",
        "Search file contents using a regex pattern. Returns matching lines with file paths \
         and line numbers. Useful for finding where functions, variables, or patterns are used.",
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Regex pattern to search for in file contents"},
                "file_pattern": {"type": "string", "description": "Glob to filter files (e.g. \"*.rs\"). Defaults to all files."},
                "path": {"type": "string", "description": "Directory to search in. Defaults to cwd."}
            },
            "required": ["pattern"]
        }),
        GrepTool,
    )
}

fn is_skipped(name: &str) -> bool {
    name.starts_with('.') || IGNORED_DIRS.contains(&name)
}

/// Candidate files under `root`, sorted, optionally filtered by a glob over
/// the root-relative path.
fn candidate_files(root: &Path, filter: Option<&glob::Pattern>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped(&e.file_name().to_string_lossy()))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| !matches!(p.extension(), Some(ext) if ext == "lock"))
        .filter(|p| match filter {
            Some(pattern) => p
                .strip_prefix(root)
                .is_ok_and(|rel| pattern.matches_path(rel)),
            None => true,
        })
        .collect();
    files.sort();
    files
}

fn search(root: &Path, cwd: &Path, regex: &Regex, filter: Option<&glob::Pattern>) -> (Vec<GrepMatch>, usize) {
    let files = candidate_files(root, filter);
    let mut matches = Vec::new();

    'files: for file in &files {
        // Binary or unreadable files are skipped.
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        let shown = file
            .strip_prefix(cwd)
            .unwrap_or(file)
            .to_string_lossy()
            .into_owned();
        for (i, line) in content.split('\n').enumerate() {
            if regex.is_match(line) {
                matches.push(GrepMatch {
                    file: shown.clone(),
                    line: i + 1,
                    content: line.trim().to_string(),
                });
                if matches.len() >= MAX_RESULTS {
                    break 'files;
                }
            }
        }
    }
    (matches, files.len())
}

#[async_trait]
impl ToolHandler for GrepTool {
    async fn call(&self, input: &Value, ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_params(input) {
            Ok(p) => p,
            Err(result) => return result,
        };
        let regex = match RegexBuilder::new(&params.pattern).case_insensitive(true).build() {
            Ok(r) => r,
            Err(e) => return ToolResult::failure(format!("invalid pattern: {e}")),
        };
        let filter = match params.file_pattern.as_deref().map(glob::Pattern::new).transpose() {
            Ok(f) => f,
            Err(e) => return ToolResult::failure(format!("invalid file_pattern: {e}")),
        };
        let root = params
            .path
            .as_deref()
            .map(|p| ctx.resolve(p))
            .unwrap_or_else(|| ctx.cwd.clone());
        let cwd = ctx.cwd.clone();

        let searched =
            tokio::task::spawn_blocking(move || search(&root, &cwd, &regex, filter.as_ref())).await;
        let (matches, files_searched) = match searched {
            Ok(found) => found,
            Err(e) => return ToolResult::failure(format!("grep task failed: {e}")),
        };

        if matches.is_empty() {
            return ToolResult::ok("No matches found.").with_data(json!({
                "matches": [],
                "count": 0,
                "pattern": params.pattern,
                "truncated": false,
            }));
        }

        let truncated = matches.len() >= MAX_RESULTS;
        let lines = matches
            .iter()
            .map(|m| format!("{}:{}: {}", m.file, m.line, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        ToolResult::ok(format!(
            "{} matches{}:\n{lines}",
            matches.len(),
            if truncated { " (truncated)" } else { "" }
        ))
        .with_data(json!({
            "count": matches.len(),
            "matches": matches,
            "pattern": params.pattern,
            "truncated": truncated,
            "filesSearched": files_searched,
        }))
    }
}
