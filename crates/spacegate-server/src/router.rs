//! JSON-RPC request routing for a scoped server.
//!
//! One router instance serves one logical connection (stateful) or one
//! request (stateless). Transports hand it raw JSON and get raw JSON back;
//! notifications yield no response, per JSON-RPC 2.0.

use parking_lot::RwLock;
use serde_json::{json, Value};

use spacegate_protocol::error::parse_params;
use spacegate_protocol::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use spacegate_protocol::types::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    ListPromptsResult, ListToolsResult, ServerCapabilities,
};
use spacegate_protocol::{GatewayErrorCode, PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};

use crate::context::RequestContext;
use crate::error::ServerError;
use crate::registry::ToolRegistry;

/// A scoped MCP server: identity, instructions, capabilities, and tools.
#[derive(Debug)]
pub struct McpRouter {
    server_info: Implementation,
    instructions: Option<String>,
    capabilities: ServerCapabilities,
    registry: ToolRegistry,
    client_info: RwLock<Option<Implementation>>,
}

impl McpRouter {
    /// Assemble a router from its parts.
    pub fn new(
        server_info: Implementation,
        instructions: Option<String>,
        capabilities: ServerCapabilities,
        registry: ToolRegistry,
    ) -> Self {
        Self {
            server_info,
            instructions,
            capabilities,
            registry,
            client_info: RwLock::new(None),
        }
    }

    /// Client identity learned from initialize, when one happened.
    pub fn client_info(&self) -> Option<Implementation> {
        self.client_info.read().clone()
    }

    /// The tool registry, for inspection.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Parse, dispatch, and serialize one inbound message.
    ///
    /// Returns `None` for notifications. Never panics outward: everything
    /// unexpected becomes an `internal_error` envelope.
    pub async fn handle_value(&self, raw: Value, ctx: &RequestContext) -> Option<Value> {
        let message: JsonRpcMessage = match serde_json::from_value(raw) {
            Ok(m) => m,
            Err(e) => {
                let error =
                    GatewayErrorCode::ParseError.with_message(format!("unparseable message: {e}"));
                return Some(
                    serde_json::to_value(JsonRpcResponse::error_for(error, None))
                        .unwrap_or(Value::Null),
                );
            }
        };

        match message {
            JsonRpcMessage::Request(request) => {
                let response = self.handle_request(request, ctx).await;
                Some(serde_json::to_value(response).unwrap_or(Value::Null))
            }
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(&notification);
                None
            }
            // Responses are correlated by the transport (ping replies);
            // one reaching the router has nowhere to go.
            JsonRpcMessage::Response(_) => None,
        }
    }

    /// Dispatch a parsed request.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        ctx: &RequestContext,
    ) -> JsonRpcResponse {
        let id = request.id.clone();
        let result = match request.method.as_str() {
            "initialize" => self.initialize(request.params),
            "ping" => Ok(json!({})),
            "tools/list" => self.list_tools(),
            "tools/call" => self.call_tool(request.params, ctx).await,
            "prompts/list" => Ok(serde_json::to_value(ListPromptsResult { prompts: vec![] })
                .unwrap_or(Value::Null)),
            "prompts/get" => Err(GatewayErrorCode::InvalidParams.with_message("unknown prompt")),
            "resources/list" => Ok(json!({"resources": []})),
            "resources/templates/list" => Ok(json!({"resourceTemplates": []})),
            other => {
                Err(GatewayErrorCode::MethodNotFound.with_message(format!("unknown method: {other}")))
            }
        };

        match result {
            Ok(result) => JsonRpcResponse::success(result, id),
            Err(error) => JsonRpcResponse::error(error, id),
        }
    }

    fn handle_notification(&self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => {}
            "notifications/cancelled" => {
                tracing::debug!("client cancelled an in-flight request");
            }
            other => tracing::debug!(method = other, "ignoring notification"),
        }
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = parse_params(params, "initialize")?;

        // Echo the client's revision when the gateway speaks it; otherwise
        // answer with our own and let the client decide.
        let protocol_version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str())
        {
            params.protocol_version.clone()
        } else {
            PROTOCOL_VERSION.to_string()
        };

        *self.client_info.write() = Some(params.client_info);

        let result = InitializeResult {
            protocol_version,
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        };
        serde_json::to_value(result)
            .map_err(|e| GatewayErrorCode::InternalError.with_message(e.to_string()))
    }

    fn list_tools(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult {
            tools: self.registry.enabled_tools(),
            next_cursor: None,
        };
        serde_json::to_value(result)
            .map_err(|e| GatewayErrorCode::InternalError.with_message(e.to_string()))
    }

    async fn call_tool(
        &self,
        params: Option<Value>,
        ctx: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = parse_params(params, "tools/call")?;

        let Some(handler) = self.registry.lookup(&params.name) else {
            return Err(GatewayErrorCode::InvalidParams
                .with_message(format!("unknown tool: {}", params.name)));
        };

        let mut call_ctx = ctx.clone();
        call_ctx.progress_token = params.meta.and_then(|m| m.progress_token);
        if call_ctx.client_info.is_none() {
            call_ctx.client_info = self.client_info();
        }

        let arguments = params.arguments.unwrap_or_default();
        let result = match handler.call(arguments, &call_ctx).await {
            Ok(result) => result,
            // Tool-surface failures render as tool results so client UIs
            // can show them without interpreting protocol errors.
            Err(ServerError::Tool(message)) => CallToolResult::error_text(message),
            Err(ServerError::Protocol(error)) => return Err(error),
            Err(e) => {
                tracing::error!(tool = params.name, error = %e, "tool handler failed");
                return Err(GatewayErrorCode::InternalError.with_message(e.to_string()));
            }
        };

        serde_json::to_value(result)
            .map_err(|e| GatewayErrorCode::InternalError.with_message(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities;
    use crate::handler::FnTool;
    use pretty_assertions::assert_eq;
    use spacegate_protocol::types::{RequestId, Tool};

    fn router() -> McpRouter {
        let mut registry = ToolRegistry::new();
        registry.register(
            Tool {
                name: "echo".to_string(),
                title: None,
                description: Some("Echo arguments".to_string()),
                input_schema: json!({"type": "object", "properties": {}}),
            },
            FnTool::new(|arguments, _| async move {
                Ok(CallToolResult::text(
                    serde_json::to_string(&arguments).unwrap_or_default(),
                ))
            }),
        );
        registry.register(
            Tool {
                name: "hidden".to_string(),
                title: None,
                description: None,
                input_schema: json!({"type": "object", "properties": {}}),
            },
            FnTool::new(|_, _| async { Ok(CallToolResult::text("nope")) }),
        );
        registry.set_enabled("hidden", false);
        registry.register(
            Tool {
                name: "broken".to_string(),
                title: None,
                description: None,
                input_schema: json!({"type": "object", "properties": {}}),
            },
            FnTool::new(|_, _| async { Err(ServerError::tool("upstream exploded")) }),
        );

        McpRouter::new(
            Implementation {
                name: "spacegate".to_string(),
                version: "0.0.0".to_string(),
                title: None,
            },
            Some("instructions".to_string()),
            capabilities::build(true, false),
            registry,
        )
    }

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(method, Some(params), RequestId::Number(1))
    }

    #[tokio::test]
    async fn initialize_records_client_and_echoes_version() {
        let router = router();
        let response = router
            .handle_request(
                request(
                    "initialize",
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "clientInfo": {"name": "openai-mcp", "version": "1.0"}
                    }),
                ),
                &RequestContext::default(),
            )
            .await;
        let result = response.result().unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "spacegate");
        assert_eq!(router.client_info().unwrap().name, "openai-mcp");
    }

    #[tokio::test]
    async fn unknown_protocol_version_falls_back_to_ours() {
        let router = router();
        let response = router
            .handle_request(
                request(
                    "initialize",
                    json!({
                        "protocolVersion": "1999-01-01",
                        "clientInfo": {"name": "c", "version": "1"}
                    }),
                ),
                &RequestContext::default(),
            )
            .await;
        assert_eq!(
            response.result().unwrap()["protocolVersion"],
            PROTOCOL_VERSION
        );
    }

    #[tokio::test]
    async fn tools_list_shows_only_enabled_tools() {
        let router = router();
        let response = router
            .handle_request(request("tools/list", json!({})), &RequestContext::default())
            .await;
        let tools = response.result().unwrap()["tools"].as_array().unwrap().clone();
        let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["echo", "broken"]);
    }

    #[tokio::test]
    async fn call_dispatches_to_handler() {
        let router = router();
        let response = router
            .handle_request(
                request("tools/call", json!({"name": "echo", "arguments": {"a": 1}})),
                &RequestContext::default(),
            )
            .await;
        let text = response.result().unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.contains("\"a\":1"));
    }

    #[tokio::test]
    async fn disabled_tool_is_unknown_to_callers() {
        let router = router();
        let response = router
            .handle_request(
                request("tools/call", json!({"name": "hidden"})),
                &RequestContext::default(),
            )
            .await;
        let error = response.error_obj().unwrap();
        assert_eq!(error.code, GatewayErrorCode::InvalidParams.code());
    }

    #[tokio::test]
    async fn tool_failure_surfaces_as_error_result() {
        let router = router();
        let response = router
            .handle_request(
                request("tools/call", json!({"name": "broken"})),
                &RequestContext::default(),
            )
            .await;
        let result = response.result().unwrap();
        assert_eq!(result["isError"], json!(true));
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("upstream exploded"));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let router = router();
        let response = router
            .handle_request(request("bogus/метод", json!({})), &RequestContext::default())
            .await;
        assert_eq!(
            response.error_obj().unwrap().code,
            GatewayErrorCode::MethodNotFound.code()
        );
    }

    #[tokio::test]
    async fn notifications_produce_no_response() {
        let router = router();
        let out = router
            .handle_value(
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
                &RequestContext::default(),
            )
            .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn garbage_becomes_a_parse_error_with_null_id() {
        let router = router();
        let out = router
            .handle_value(json!({"not": "jsonrpc"}), &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(out["error"]["code"], json!(-32700));
        assert_eq!(out["id"], Value::Null);
    }
}
