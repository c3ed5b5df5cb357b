use serde_json::Value;

use super::builtin;
use super::handler::ToolDef;

/// Catalog of available tools, built once at startup and read-only after.
/// Stores definitions, provides schemas, and looks up tools by name.
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// The standard coding toolset: read, search, write, edit and shell.
    pub fn builtin() -> Self {
        Self::new()
            .add(builtin::read::definition())
            .add(builtin::glob::definition())
            .add(builtin::grep::definition())
            .add(builtin::tree::definition())
            .add(builtin::write::definition())
            .add(builtin::edit::definition())
            .add(builtin::bash::definition())
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn add(mut self, def: ToolDef) -> Self {
        self.tools.retain(|t| t.name != def.name);
        self.tools.push(def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Whether the named tool is flagged as needing approval. Unknown tools
    /// are not dangerous; they cannot run.
    pub fn is_dangerous(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.dangerous)
    }

    /// All tool schemas for the LLM API request.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools.iter().map(ToolDef::schema).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDef> {
        self.tools.iter()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolContext, ToolHandler, ToolResult};
    use serde_json::json;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl ToolHandler for NoopHandler {
        async fn call(&self, _input: &Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::ok("ok")
        }
    }

    fn noop(name: &str) -> ToolDef {
        ToolDef::new(name, format!("{name} tool"), json!({"type": "object"}), NoopHandler)
    }

    #[test]
    fn builtin_registers_all_tools() {
        let reg = ToolRegistry::builtin();
        assert_eq!(
            reg.tool_names(),
            vec!["read_file", "glob", "grep", "tree", "write_file", "edit_file", "bash"]
        );
    }

    #[test]
    fn builtin_danger_flags() {
        let reg = ToolRegistry::builtin();
        assert!(reg.is_dangerous("bash"));
        assert!(reg.is_dangerous("write_file"));
        assert!(reg.is_dangerous("edit_file"));
        assert!(!reg.is_dangerous("read_file"));
        assert!(!reg.is_dangerous("grep"));
        assert!(!reg.is_dangerous("nope"));
    }

    #[test]
    fn schemas_carry_name_and_input_schema() {
        let reg = ToolRegistry::new().add(noop("echo"));
        let schemas = reg.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["name"], "echo");
        assert_eq!(schemas[0]["description"], "echo tool");
        assert!(schemas[0]["input_schema"].is_object());
    }

    #[test]
    fn re_adding_replaces() {
        let reg = ToolRegistry::new()
            .add(noop("echo"))
            .add(noop("echo").dangerous());
        assert_eq!(reg.len(), 1);
        assert!(reg.is_dangerous("echo"));
    }
}
