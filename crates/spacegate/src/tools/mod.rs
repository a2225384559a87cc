//! The built-in tool catalog.
//!
//! Descriptors are built once at process start; per-request scoping only
//! wires enable/disable flags, which keeps stateless construction on the
//! order of microseconds. Handlers are thin adapters over
//! [`HubApiClient`] — the business logic lives upstream.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use spacegate_protocol::types::{CallToolResult, Tool};
use spacegate_server::{FnTool, ServerError, ToolHandler, ToolRegistry};

use crate::hub_client::HubApiClient;

/// One catalog entry: a stable id, its descriptor, and its handler.
pub struct CatalogEntry {
    /// Tool id, also the outward tool name.
    pub id: &'static str,
    /// Descriptor served by `tools/list`.
    pub tool: Tool,
    /// Execution target.
    pub handler: Arc<dyn ToolHandler>,
}

/// The precomputed built-in catalog.
pub struct BuiltinCatalog {
    entries: Vec<CatalogEntry>,
    /// `hub_inspect` variant exposing the `include_readme` flag; swapped in
    /// when the selection carries the README marker.
    hub_inspect_with_readme: Tool,
}

impl std::fmt::Debug for BuiltinCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinCatalog")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

fn text_result(value: &Value) -> CallToolResult {
    match value {
        Value::String(s) => CallToolResult::text(s.clone()),
        other => CallToolResult::text(
            serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        ),
    }
}

fn arg_str(arguments: &Map<String, Value>, name: &str) -> Result<String, ServerError> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ServerError::tool(format!("missing required argument: {name}")))
}

fn arg_u32(arguments: &Map<String, Value>, name: &str, default: u32) -> u32 {
    arguments
        .get(name)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(default)
}

fn query_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": description},
            "limit": {"type": "integer", "description": "Maximum results", "default": 10}
        },
        "required": ["query"]
    })
}

fn id_schema(field: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            field: {"type": "string", "description": description}
        },
        "required": [field]
    })
}

impl BuiltinCatalog {
    /// Build the catalog around a Hub client.
    pub fn new(hub: Arc<HubApiClient>) -> Self {
        let mut entries = Vec::new();

        let mut add = |id: &'static str,
                       description: &str,
                       schema: Value,
                       handler: Arc<dyn ToolHandler>| {
            entries.push(CatalogEntry {
                id,
                tool: Tool {
                    name: id.to_string(),
                    title: None,
                    description: Some(description.to_string()),
                    input_schema: schema,
                },
                handler,
            });
        };

        let h = Arc::clone(&hub);
        add(
            "hf_whoami",
            "Identity of the authenticated caller",
            json!({"type": "object", "properties": {}}),
            FnTool::new(move |_args, ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let Some(token) = ctx.token.as_deref() else {
                        return Err(ServerError::tool(
                            "hf_whoami requires an authenticated request",
                        ));
                    };
                    Ok(text_result(&hub.whoami(token).await?))
                }
            }),
        );

        let h = Arc::clone(&hub);
        add(
            "space_search",
            "Search hosted Spaces by text query",
            query_schema("Search terms for Spaces"),
            FnTool::new(move |args, _ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let query = arg_str(&args, "query")?;
                    let limit = arg_u32(&args, "limit", 10);
                    Ok(text_result(&hub.search_spaces(&query, limit).await?))
                }
            }),
        );

        let h = Arc::clone(&hub);
        add(
            "model_search",
            "Search models by text query",
            query_schema("Search terms for models"),
            FnTool::new(move |args, _ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let query = arg_str(&args, "query")?;
                    let limit = arg_u32(&args, "limit", 10);
                    Ok(text_result(&hub.search_models(&query, limit).await?))
                }
            }),
        );

        let h = Arc::clone(&hub);
        add(
            "model_detail",
            "Detailed metadata for one model",
            id_schema("model_id", "Model id, e.g. org/name"),
            FnTool::new(move |args, _ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let id = arg_str(&args, "model_id")?;
                    Ok(text_result(&hub.model_detail(&id).await?))
                }
            }),
        );

        let h = Arc::clone(&hub);
        add(
            "paper_search",
            "Search indexed papers",
            query_schema("Search terms for papers"),
            FnTool::new(move |args, _ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let query = arg_str(&args, "query")?;
                    Ok(text_result(&hub.search_papers(&query).await?))
                }
            }),
        );

        let h = Arc::clone(&hub);
        add(
            "dataset_search",
            "Search datasets by text query",
            query_schema("Search terms for datasets"),
            FnTool::new(move |args, _ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let query = arg_str(&args, "query")?;
                    let limit = arg_u32(&args, "limit", 10);
                    Ok(text_result(&hub.search_datasets(&query, limit).await?))
                }
            }),
        );

        let h = Arc::clone(&hub);
        add(
            "dataset_detail",
            "Detailed metadata for one dataset",
            id_schema("dataset_id", "Dataset id, e.g. org/name"),
            FnTool::new(move |args, _ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let id = arg_str(&args, "dataset_id")?;
                    Ok(text_result(&hub.dataset_detail(&id).await?))
                }
            }),
        );

        let h = Arc::clone(&hub);
        add(
            "hub_inspect",
            "Inspect a repository's metadata",
            id_schema("repo_id", "Repository id, e.g. org/name"),
            FnTool::new(move |args, _ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let id = arg_str(&args, "repo_id")?;
                    let include_readme = args
                        .get("include_readme")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    Ok(text_result(&hub.inspect_repo(&id, include_readme).await?))
                }
            }),
        );

        let h = Arc::clone(&hub);
        add(
            "hf_doc_search",
            "Search product and library documentation",
            query_schema("Search terms for documentation"),
            FnTool::new(move |args, _ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let query = arg_str(&args, "query")?;
                    Ok(text_result(&hub.doc_search(&query).await?))
                }
            }),
        );

        let h = Arc::clone(&hub);
        add(
            "hf_doc_fetch",
            "Fetch one documentation page",
            id_schema("url", "Documentation page URL"),
            FnTool::new(move |args, _ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let url = arg_str(&args, "url")?;
                    Ok(text_result(&hub.doc_fetch(&url).await?))
                }
            }),
        );

        let h = Arc::clone(&hub);
        add(
            "hf_jobs",
            "List the caller's compute jobs",
            json!({"type": "object", "properties": {}}),
            FnTool::new(move |_args, ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let Some(token) = ctx.token.as_deref() else {
                        return Err(ServerError::tool("hf_jobs requires an authenticated request"));
                    };
                    Ok(text_result(&hub.list_jobs(token).await?))
                }
            }),
        );

        let h = Arc::clone(&hub);
        add(
            "dynamic_space",
            "Check whether a Space can be attached as live tools",
            id_schema("space", "Space id, e.g. owner/name"),
            FnTool::new(move |args, _ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let space = arg_str(&args, "space")?;
                    let info = hub.space_info(&space).await?;
                    let sdk = info.get("sdk").and_then(Value::as_str).unwrap_or("unknown");
                    let text = if sdk == "gradio" {
                        format!(
                            "Space {space} is a Gradio Space. Reconnect with the \
                             x-mcp-gradio header set to '{space}' to expose its tools."
                        )
                    } else {
                        format!("Space {space} uses the '{sdk}' SDK and cannot be proxied.")
                    };
                    Ok(CallToolResult::text(text))
                }
            }),
        );

        let h = Arc::clone(&hub);
        add(
            "use_space",
            "Describe how to invoke a Space's tools through this gateway",
            id_schema("space", "Space id, e.g. owner/name"),
            FnTool::new(move |args, _ctx| {
                let hub = Arc::clone(&h);
                async move {
                    let space = arg_str(&args, "space")?;
                    let info = hub.space_info(&space).await?;
                    let subdomain = info
                        .get("subdomain")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    Ok(CallToolResult::text(format!(
                        "Space {space} (serving from '{subdomain}') is invoked through \
                         its gr*-prefixed tools once attached via the x-mcp-gradio header."
                    )))
                }
            }),
        );

        let hub_inspect_with_readme = Tool {
            name: "hub_inspect".to_string(),
            title: None,
            description: Some("Inspect a repository's metadata".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_id": {"type": "string", "description": "Repository id, e.g. org/name"},
                    "include_readme": {
                        "type": "boolean",
                        "description": "Also return the repository README",
                        "default": false
                    }
                },
                "required": ["repo_id"]
            }),
        };

        Self {
            entries,
            hub_inspect_with_readme,
        }
    }

    /// Register every built-in tool, enabled, into a fresh registry.
    ///
    /// When `include_readme` is set, `hub_inspect` is registered with the
    /// descriptor variant that exposes the `include_readme` flag.
    pub fn register_into(&self, registry: &mut ToolRegistry, include_readme: bool) {
        for entry in &self.entries {
            let tool = if entry.id == "hub_inspect" && include_readme {
                self.hub_inspect_with_readme.clone()
            } else {
                entry.tool.clone()
            };
            registry.register(tool, Arc::clone(&entry.handler));
        }
    }

    /// Ids in catalog order.
    pub fn ids(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::BUILT_IN_TOOLS;
    use url::Url;

    fn catalog() -> BuiltinCatalog {
        BuiltinCatalog::new(Arc::new(HubApiClient::new(
            reqwest::Client::new(),
            Url::parse("https://hub.invalid").unwrap(),
        )))
    }

    #[test]
    fn catalog_covers_the_closed_tool_set() {
        let catalog = catalog();
        let ids = catalog.ids();
        assert_eq!(ids.len(), BUILT_IN_TOOLS.len());
        for id in BUILT_IN_TOOLS {
            assert!(ids.contains(id), "missing built-in tool {id}");
        }
    }

    #[test]
    fn readme_flag_swaps_the_hub_inspect_descriptor() {
        let catalog = catalog();

        let mut registry = ToolRegistry::new();
        catalog.register_into(&mut registry, false);
        let plain = registry
            .enabled_tools()
            .into_iter()
            .find(|t| t.name == "hub_inspect")
            .unwrap();
        assert!(plain.input_schema["properties"]
            .get("include_readme")
            .is_none());

        let mut registry = ToolRegistry::new();
        catalog.register_into(&mut registry, true);
        let readme = registry
            .enabled_tools()
            .into_iter()
            .find(|t| t.name == "hub_inspect")
            .unwrap();
        assert!(readme.input_schema["properties"]
            .get("include_readme")
            .is_some());
    }
}
