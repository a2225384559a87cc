//! Per-instance tool registry.
//!
//! A registry belongs to exactly one scoped server. Tools register enabled
//! and are then selectively disabled by the factory once the selection
//! strategy has spoken; `tools/list` shows only what survived.

use std::collections::HashMap;
use std::sync::Arc;

use spacegate_protocol::types::Tool;

use crate::handler::ToolHandler;

/// A registered tool: descriptor, handler, and visibility flag.
pub struct RegisteredTool {
    /// Descriptor as served by `tools/list`.
    pub tool: Tool,
    /// Execution target.
    pub handler: Arc<dyn ToolHandler>,
    /// Whether the tool is visible and callable in this instance.
    pub enabled: bool,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.tool.name)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Ordered tool registry for one scoped server.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, enabled. A duplicate name replaces the original
    /// descriptor and handler in place, keeping its position.
    pub fn register(&mut self, tool: Tool, handler: Arc<dyn ToolHandler>) {
        match self.index.get(&tool.name) {
            Some(&i) => {
                self.tools[i] = RegisteredTool {
                    tool,
                    handler,
                    enabled: true,
                };
            }
            None => {
                self.index.insert(tool.name.clone(), self.tools.len());
                self.tools.push(RegisteredTool {
                    tool,
                    handler,
                    enabled: true,
                });
            }
        }
    }

    /// Flip a tool's visibility. Unknown names are ignored.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        if let Some(&i) = self.index.get(name) {
            self.tools[i].enabled = enabled;
        }
    }

    /// Disable every registered tool whose name is not in `keep`.
    pub fn retain_enabled<F: Fn(&str) -> bool>(&mut self, keep: F) {
        for entry in &mut self.tools {
            entry.enabled = keep(&entry.tool.name);
        }
    }

    /// Descriptors of enabled tools, in registration order.
    pub fn enabled_tools(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.tool.clone())
            .collect()
    }

    /// Handler for an enabled tool.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .filter(|t| t.enabled)
            .map(|t| Arc::clone(&t.handler))
    }

    /// Whether the name is registered at all, enabled or not.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of registered tools, enabled or not.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FnTool;
    use serde_json::json;
    use spacegate_protocol::types::CallToolResult;

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            title: None,
            description: None,
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    fn noop() -> Arc<FnTool> {
        FnTool::new(|_, _| async { Ok(CallToolResult::text("ok")) })
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("b"), noop());
        registry.register(tool("a"), noop());
        let names: Vec<_> = registry
            .enabled_tools()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn disabled_tools_are_invisible_and_uncallable() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("x"), noop());
        registry.set_enabled("x", false);
        assert!(registry.enabled_tools().is_empty());
        assert!(registry.lookup("x").is_none());
        assert!(registry.contains("x"));
    }

    #[test]
    fn retain_enabled_applies_a_selection() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("keep"), noop());
        registry.register(tool("drop"), noop());
        registry.retain_enabled(|name| name == "keep");
        let names: Vec<_> = registry
            .enabled_tools()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["keep"]);
    }

    #[test]
    fn duplicate_registration_replaces_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("x"), noop());
        registry.register(tool("y"), noop());
        let mut replacement = tool("x");
        replacement.description = Some("v2".to_string());
        registry.register(replacement, noop());
        assert_eq!(registry.len(), 2);
        let tools = registry.enabled_tools();
        assert_eq!(tools[0].name, "x");
        assert_eq!(tools[0].description.as_deref(), Some("v2"));
    }
}
