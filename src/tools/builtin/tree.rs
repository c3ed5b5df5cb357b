use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::IGNORED_DIRS;
use crate::tools::{parse_params, ToolContext, ToolDef, ToolHandler, ToolResult};

const DEFAULT_DEPTH: usize = 3;

#[derive(Deserialize)]
struct Params {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    depth: Option<usize>,
}

pub struct TreeTool;

pub fn definition() -> ToolDef {
    ToolDef::new(
        "tree",
        "Show directory structure as a tree with file sizes and counts. Respects .gitignore \
         patterns. Useful for understanding project layout in a single call.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list. Defaults to cwd."},
                "depth": {"type": "number", "description": "Max depth to traverse (default: 3)"}
            }
        }),
        TreeTool,
    )
}

struct Entry {
    depth: usize,
    name: String,
    is_dir: bool,
    size: u64,
}

#[derive(Default)]
struct Totals {
    files: usize,
    dirs: usize,
    size: u64,
}

/// Patterns from a root `.gitignore`. A trailing slash restricts the
/// pattern to directories.
struct GitIgnore {
    patterns: Vec<(glob::Pattern, bool)>,
}

impl GitIgnore {
    fn load(root: &Path) -> Self {
        let content = std::fs::read_to_string(root.join(".gitignore")).unwrap_or_default();
        let patterns = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let dir_only = line.ends_with('/');
                let raw = line.trim_end_matches('/').trim_start_matches('/');
                glob::Pattern::new(raw).ok().map(|p| (p, dir_only))
            })
            .collect();
        Self { patterns }
    }

    fn is_ignored(&self, rel: &Path, name: &str, is_dir: bool) -> bool {
        self.patterns.iter().any(|(pattern, dir_only)| {
            (is_dir || !dir_only) && (pattern.matches(name) || pattern.matches_path(rel))
        })
    }
}

/// Walks the whole tree once. Totals cover every visible entry, the
/// returned entries only those within `max_depth`, in display order.
fn walk(root: &Path, max_depth: usize) -> (Vec<Entry>, Totals) {
    let ignore = GitIgnore::load(root);
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by(|a, b| {
            b.file_type()
                .is_dir()
                .cmp(&a.file_type().is_dir())
                .then_with(|| a.file_name().cmp(b.file_name()))
        })
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            if name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref()) {
                return false;
            }
            let rel = e.path().strip_prefix(root).unwrap_or(e.path());
            !ignore.is_ignored(rel, &name, e.file_type().is_dir())
        });

    let mut entries = Vec::new();
    let mut totals = Totals::default();
    for entry in walker.filter_map(Result::ok) {
        let is_dir = entry.file_type().is_dir();
        let size = if is_dir {
            0
        } else {
            entry.metadata().map(|m| m.len()).unwrap_or(0)
        };
        if is_dir {
            totals.dirs += 1;
        } else {
            totals.files += 1;
            totals.size += size;
        }
        if entry.depth() <= max_depth {
            entries.push(Entry {
                depth: entry.depth(),
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
                size,
            });
        }
    }
    (entries, totals)
}

fn is_last_sibling(entries: &[Entry], i: usize) -> bool {
    let depth = entries[i].depth;
    entries[i + 1..]
        .iter()
        .find(|e| e.depth <= depth)
        .map_or(true, |e| e.depth < depth)
}

fn render(root_name: &str, entries: &[Entry]) -> String {
    let mut lines = vec![format!("{root_name}/")];
    // One flag per ancestor level: was that ancestor the last of its siblings.
    let mut ancestors: Vec<bool> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let last = is_last_sibling(entries, i);
        ancestors.truncate(entry.depth - 1);
        let prefix: String = ancestors
            .iter()
            .map(|&done| if done { "    " } else { "│   " })
            .collect();
        let connector = if last { "└── " } else { "├── " };
        let suffix = if entry.is_dir {
            "/".to_string()
        } else {
            format!(" ({})", format_size(entry.size))
        };
        lines.push(format!("{prefix}{connector}{}{suffix}", entry.name));
        ancestors.push(last);
    }
    lines.join("\n")
}

pub(crate) fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / MB)
    }
}

#[async_trait]
impl ToolHandler for TreeTool {
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
        let depth = params.depth.unwrap_or(DEFAULT_DEPTH);

        if !tokio::fs::metadata(&root).await.is_ok_and(|m| m.is_dir()) {
            return ToolResult::failure(format!("Directory not found: {}", root.display()));
        }

        let walk_root = root.clone();
        let (entries, totals) =
            match tokio::task::spawn_blocking(move || walk(&walk_root, depth)).await {
                Ok(walked) => walked,
                Err(e) => return ToolResult::failure(format!("tree task failed: {e}")),
            };

        let root_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        let data = |files: usize, dirs: usize, size: u64| {
            json!({
                "root": root.display().to_string(),
                "depth": depth,
                "totalFiles": files,
                "totalDirs": dirs,
                "totalSize": size,
            })
        };

        if depth == 0 {
            return ToolResult::ok(format!(
                "{root_name}/ ({} files, {} dirs, {})",
                totals.files,
                totals.dirs,
                format_size(totals.size)
            ))
            .with_data(data(totals.files, totals.dirs, totals.size));
        }
        if entries.is_empty() {
            return ToolResult::ok(format!("{root_name}/ (empty)")).with_data(data(0, 0, 0));
        }

        let output = format!(
            "{}\n{} files, {} directories, {}",
            render(&root_name, &entries),
            totals.files,
            totals.dirs,
            format_size(totals.size)
        );
        ToolResult::ok(output).with_data(data(totals.files, totals.dirs, totals.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/components")).unwrap();
        std::fs::create_dir_all(root.join("src/utils")).unwrap();
        std::fs::create_dir_all(root.join("docs")).unwrap();
        std::fs::write(root.join("src/index.ts"), "export const main = 1;").unwrap();
        std::fs::write(root.join("src/components/App.tsx"), "<div>App</div>").unwrap();
        std::fs::write(root.join("src/utils/helpers.ts"), "export {}").unwrap();
        std::fs::write(root.join("docs/README.md"), "# Docs").unwrap();
        std::fs::write(root.join("package.json"), "{}").unwrap();
        dir
    }

    async fn tree(dir: &Path, input: Value) -> ToolResult {
        TreeTool.call(&input, &ToolContext::new(dir)).await
    }

    #[tokio::test]
    async fn default_depth_shows_nested_files() {
        let dir = fixture();
        let result = tree(dir.path(), json!({})).await;
        assert!(result.success);
        for name in ["package.json", "index.ts", "App.tsx", "helpers.ts"] {
            assert!(result.output.contains(name), "missing {name}");
        }
        let data = result.data.unwrap();
        assert_eq!(data["depth"], 3);
        assert_eq!(data["totalFiles"], 5);
        assert_eq!(data["totalDirs"], 4);
    }

    #[tokio::test]
    async fn depth_limits_display_not_totals() {
        let dir = fixture();
        let result = tree(dir.path(), json!({"depth": 1})).await;
        assert!(result.output.contains("src/"));
        assert!(result.output.contains("package.json"));
        assert!(!result.output.contains("index.ts"));
        assert_eq!(result.data.unwrap()["totalFiles"], 5);
    }

    #[tokio::test]
    async fn skips_ignored_dirs_and_gitignore() {
        let dir = fixture();
        let root = dir.path();
        std::fs::create_dir_all(root.join("node_modules/dep")).unwrap();
        std::fs::write(root.join("node_modules/dep/index.js"), "").unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join(".git/config"), "").unwrap();
        std::fs::write(root.join(".gitignore"), "docs/\n*.log\n").unwrap();
        std::fs::write(root.join("error.log"), "e").unwrap();

        let result = tree(root, json!({})).await;
        assert!(!result.output.contains("node_modules"));
        assert!(!result.output.contains(".git"));
        assert!(!result.output.contains("docs"));
        assert!(!result.output.contains("error.log"));
    }

    #[tokio::test]
    async fn draws_connectors_dirs_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/c.txt"), "abc").unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();

        let result = tree(dir.path(), json!({})).await;
        let lines: Vec<&str> = result.output.lines().collect();
        assert_eq!(
            &lines[1..],
            &["├── b/", "│   └── c.txt (3 B)", "└── a.txt (1 B)", "2 files, 1 directories, 4 B"]
        );
    }

    #[tokio::test]
    async fn depth_zero_is_summary_only() {
        let dir = fixture();
        let result = tree(dir.path(), json!({"depth": 0})).await;
        assert!(result.output.ends_with("/ (5 files, 4 dirs, 53 B)"));
        assert_eq!(result.output.lines().count(), 1);
    }

    #[tokio::test]
    async fn empty_and_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let empty = tree(dir.path(), json!({})).await;
        assert!(empty.output.ends_with("/ (empty)"));
        assert_eq!(empty.data.unwrap()["totalFiles"], 0);

        let missing = tree(dir.path(), json!({"path": "nope"})).await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().starts_with("Directory not found:"));
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
