//! Per-request server assembly.
//!
//! For every logical connection (stateful) or request (stateless) the
//! factory: reads the headers of interest, runs the selection strategy,
//! registers the precomputed built-in tools (then disables the ones the
//! selection excluded), and — unless the transport asked to skip it —
//! discovers and attaches the Gradio-proxied tools.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use spacegate_gradio::postprocess::{
    attach_url_structured_content, embed_audio_player, mcpui_url, strip_image_blocks,
    URL_EXTRACTION_CLIENT,
};
use spacegate_gradio::schema::SpaceHost;
use spacegate_gradio::upstream::{call_space_tool, ProgressRelay};
use spacegate_gradio::{
    outward_tool_name, DiscoveredSpace, DiscoveryOptions, GradioDiscovery, GradioError, SpaceId,
};
use spacegate_protocol::types::{CallToolResult, Implementation, Tool};
use spacegate_server::{
    capabilities, FnTool, McpRouter, RequestContext, ServerError, ServerResult, ToolRegistry,
};
use spacegate_transport::{FactoryRequest, McpServerFactory, ScopedServer};

use crate::config::{resolve_deadline, GatewayConfig};
use crate::selection::{select_tools, SelectionInput, README_MARKER};
use crate::settings::SettingsProvider;
use crate::tools::BuiltinCatalog;

/// Header enabling the image-content filter.
const NO_IMAGE_HEADER: &str = "x-mcp-no-image-content";
/// Header overriding the upstream call deadline.
const JOB_TIMEOUT_HEADER: &str = "x-mcp-job-timeout";

/// The gateway's server factory.
pub struct GatewayServerFactory {
    config: GatewayConfig,
    catalog: BuiltinCatalog,
    settings: Arc<dyn SettingsProvider>,
    discovery: GradioDiscovery,
    client: reqwest::Client,
}

impl std::fmt::Debug for GatewayServerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServerFactory").finish_non_exhaustive()
    }
}

impl GatewayServerFactory {
    /// Assemble the factory once at startup.
    pub fn new(
        config: GatewayConfig,
        catalog: BuiltinCatalog,
        settings: Arc<dyn SettingsProvider>,
        discovery: GradioDiscovery,
        client: reqwest::Client,
    ) -> Self {
        Self {
            config,
            catalog,
            settings,
            discovery,
            client,
        }
    }

    fn instructions(&self, authenticated: bool) -> String {
        if authenticated {
            "Gateway to hosted AI Spaces and platform APIs. You are authenticated: \
             account-scoped tools (whoami, jobs) act as the token's owner, and private \
             Spaces you can access are callable."
                .to_string()
        } else {
            "Gateway to hosted AI Spaces and platform APIs. You are anonymous: \
             account-scoped tools are unavailable and only public Spaces are callable. \
             Provide a bearer token to unlock the rest."
                .to_string()
        }
    }

    /// Register one discovered Space's tools into the registry.
    fn register_space_tools(
        &self,
        registry: &mut ToolRegistry,
        space: &DiscoveredSpace,
        space_index: usize,
        no_image: bool,
        deadline: Option<Duration>,
    ) {
        for (tool_index, descriptor) in space.tools.iter().enumerate() {
            let outward = outward_tool_name(
                space.private,
                space_index,
                tool_index + 1,
                &descriptor.name,
            );

            let description = match (&descriptor.description, &space.emoji) {
                (Some(description), Some(emoji)) => {
                    format!("{emoji} {} — {description}", space.id)
                }
                (Some(description), None) => format!("{} — {description}", space.id),
                (None, _) => format!("Tool '{}' on Space {}", descriptor.name, space.id),
            };

            let tool = Tool {
                name: outward.clone(),
                title: None,
                description: Some(description),
                input_schema: descriptor.input_schema.clone(),
            };

            let client = self.client.clone();
            let host = self.discovery.host().clone();
            let space_id = space.id.clone();
            let subdomain = space.subdomain.clone();
            let private = space.private;
            let upstream_name = descriptor.name.clone();

            let handler = FnTool::new(move |arguments, ctx: RequestContext| {
                let client = client.clone();
                let host = host.clone();
                let space_id = space_id.clone();
                let subdomain = subdomain.clone();
                let upstream_name = upstream_name.clone();
                let outward = outward.clone();
                async move {
                    proxy_call(
                        client,
                        host,
                        space_id,
                        subdomain,
                        private,
                        upstream_name,
                        outward,
                        no_image,
                        deadline,
                        arguments,
                        ctx,
                    )
                    .await
                }
            });

            registry.register(tool, handler);
        }
    }
}

/// Execute one proxied tool call and post-process its result.
#[allow(clippy::too_many_arguments)]
async fn proxy_call(
    client: reqwest::Client,
    host: SpaceHost,
    space_id: SpaceId,
    subdomain: String,
    private: bool,
    upstream_name: String,
    outward_name: String,
    no_image: bool,
    deadline: Option<Duration>,
    arguments: serde_json::Map<String, Value>,
    ctx: RequestContext,
) -> ServerResult<CallToolResult> {
    let relay = ctx
        .progress_token
        .clone()
        .zip(ctx.notifier.clone())
        .map(|(token, sink)| ProgressRelay::new(token, sink));

    let result = call_space_tool(
        client.clone(),
        &host,
        &space_id,
        &subdomain,
        private,
        ctx.token.as_deref(),
        &upstream_name,
        Value::Object(arguments),
        relay.as_ref(),
        deadline,
        &ctx.cancel,
    )
    .await;

    let mut result = match result {
        Ok(result) => result,
        Err(GradioError::Cancelled) => {
            // Cancellation is not a failure; the caller is already gone.
            return Err(ServerError::tool("call cancelled by client"));
        }
        Err(e) => {
            tracing::warn!(space = %space_id, tool = %upstream_name, error = %e, "upstream call failed");
            return Err(ServerError::tool(format!(
                "Space {space_id} failed: {e}"
            )));
        }
    };

    if no_image {
        strip_image_blocks(&mut result);
    }

    if ctx.client_name() == Some(URL_EXTRACTION_CLIENT) {
        attach_url_structured_content(&mut result, space_id.as_str());
    }

    if let Some(url) = mcpui_url(&outward_name, &result) {
        embed_audio_player(&client, &mut result, space_id.as_str(), &url).await;
    }

    Ok(result)
}

#[async_trait]
impl McpServerFactory for GatewayServerFactory {
    async fn create(&self, request: FactoryRequest) -> ServerResult<ScopedServer> {
        let header = |name: &str| request.headers.get(name).map(String::as_str);
        let bouquet_header = header("x-mcp-bouquet");
        let mix_header = header("x-mcp-mix");
        let gradio_header = header("x-mcp-gradio");

        let username = match &request.auth {
            spacegate_server::AuthState::Authenticated { username } => Some(username.clone()),
            spacegate_server::AuthState::Anonymous => None,
        };

        // A known non-`all` bouquet ignores settings entirely, so the
        // settings call is skipped on that path.
        let bouquet_is_exclusive = bouquet_header
            .and_then(crate::selection::bouquet)
            .is_some_and(|b| b.name != "all");
        let settings = if bouquet_is_exclusive {
            None
        } else {
            self.settings
                .load(username.as_deref(), request.token.as_deref())
                .await
        };

        let selection = select_tools(
            &SelectionInput {
                bouquet: bouquet_header,
                mix: mix_header,
                gradio: gradio_header,
                settings: settings.as_ref(),
            },
            &self.config,
        );
        tracing::debug!(
            mode = ?selection.mode,
            reason = selection.reason,
            tools = selection.enabled_tool_ids.len(),
            "tool selection"
        );

        let include_readme = selection
            .enabled_tool_ids
            .iter()
            .any(|id| id == README_MARKER);
        let mut registry = ToolRegistry::new();
        self.catalog.register_into(&mut registry, include_readme);
        registry.retain_enabled(|name| selection.enabled_tool_ids.iter().any(|id| id == name));

        let no_image = header(NO_IMAGE_HEADER).is_some_and(|v| v.eq_ignore_ascii_case("true"))
            || settings.as_ref().is_some_and(|s| s.no_image_content);
        let deadline = resolve_deadline(header(JOB_TIMEOUT_HEADER), self.config.upstream_call_timeout);

        if !request.skip_gradio && !selection.gradio_spaces.is_empty() {
            let mut endpoints: Vec<SpaceId> = Vec::new();
            for space in &selection.gradio_spaces {
                if !endpoints.contains(space) {
                    endpoints.push(space.clone());
                }
            }

            let options = DiscoveryOptions {
                skip_schemas: false,
                concurrency: self.config.discovery_concurrency,
                metadata_timeout: self.config.space_info_timeout,
                schema_timeout: self.config.space_schema_timeout,
            };
            let discovered = self
                .discovery
                .discover(&endpoints, request.token.as_deref(), options, &request.cancel)
                .await;

            for (i, space) in discovered.iter().enumerate() {
                self.register_space_tools(&mut registry, space, i + 1, no_image, deadline);
            }
        }

        let router = McpRouter::new(
            Implementation {
                name: "spacegate".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Spaces gateway".to_string()),
            },
            Some(self.instructions(request.auth.is_authenticated())),
            capabilities::build(false, false),
            registry,
        );

        Ok(ScopedServer {
            router: Arc::new(router),
            username,
        })
    }
}
