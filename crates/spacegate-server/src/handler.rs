//! Tool handler trait and function adapter.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use spacegate_protocol::types::CallToolResult;

use crate::context::RequestContext;
use crate::error::ServerResult;

/// Something that can execute a tool call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the caller's arguments.
    async fn call(
        &self,
        arguments: Map<String, Value>,
        ctx: &RequestContext,
    ) -> ServerResult<CallToolResult>;
}

type BoxedToolFuture = Pin<Box<dyn Future<Output = ServerResult<CallToolResult>> + Send>>;

/// Adapter turning an async closure into a [`ToolHandler`].
///
/// Registration sites read as data: a descriptor plus a closure, no
/// per-tool struct boilerplate.
pub struct FnTool {
    f: Arc<dyn Fn(Map<String, Value>, RequestContext) -> BoxedToolFuture + Send + Sync>,
}

impl FnTool {
    /// Wrap an async closure.
    pub fn new<F, Fut>(f: F) -> Arc<Self>
    where
        F: Fn(Map<String, Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerResult<CallToolResult>> + Send + 'static,
    {
        Arc::new(Self {
            f: Arc::new(move |arguments, ctx| Box::pin(f(arguments, ctx))),
        })
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool").finish_non_exhaustive()
    }
}

#[async_trait]
impl ToolHandler for FnTool {
    async fn call(
        &self,
        arguments: Map<String, Value>,
        ctx: &RequestContext,
    ) -> ServerResult<CallToolResult> {
        (self.f)(arguments, ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_tool_invokes_closure() {
        let handler = FnTool::new(|arguments, _ctx| async move {
            let name = arguments
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("world");
            Ok(CallToolResult::text(format!("hello {name}")))
        });

        let mut arguments = Map::new();
        arguments.insert("name".to_string(), Value::String("gateway".to_string()));
        let result = handler
            .call(arguments, &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(result.content[0].as_text(), Some("hello gateway"));
    }
}
