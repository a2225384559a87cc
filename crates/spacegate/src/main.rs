//! Gateway binary: wire the factory onto one of the three transports.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use spacegate::config::GatewayConfig;
use spacegate::factory::GatewayServerFactory;
use spacegate::hub_client::HubApiClient;
use spacegate::settings::{ExternalSettingsApi, NoSettings, SettingsProvider};
use spacegate::tools::BuiltinCatalog;
use spacegate_gradio::schema::SpaceHost;
use spacegate_gradio::{GradioDiscovery, SpaceCaches};
use spacegate_server::AuthState;
use spacegate_transport::auth::{AuthGate, TokenValidator};
use spacegate_transport::stateless::{StatelessHttpTransport, StatelessOptions};
use spacegate_transport::stdio::StdioTransport;
use spacegate_transport::streamable::{StreamableHttpOptions, StreamableHttpTransport};
use spacegate_transport::manager::SessionOptions;
use spacegate_transport::{FactoryRequest, McpServerFactory, ServerTransport, TransportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportChoice {
    /// Stateful streaming HTTP with sessions and SSE.
    Http,
    /// Stateless JSON-RPC per request.
    Json,
    /// Newline-delimited JSON-RPC on stdin/stdout.
    Stdio,
}

/// Multi-transport MCP gateway for hosted AI Spaces.
#[derive(Debug, Parser)]
#[command(name = "spacegate", version, about)]
struct Cli {
    /// Transport to serve.
    #[arg(long, value_enum, default_value = "http", env = "SPACEGATE_TRANSPORT")]
    transport: TransportChoice,

    /// Bind address for the HTTP transports.
    #[arg(long, default_value = "0.0.0.0:3000", env = "SPACEGATE_BIND")]
    bind: SocketAddr,

    /// MCP endpoint path.
    #[arg(long, default_value = "/mcp", env = "SPACEGATE_ENDPOINT")]
    endpoint: String,
}

fn init_tracing() {
    // Stderr only: stdout belongs to the protocol when serving stdio.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
}

fn build_factory(config: &GatewayConfig, client: &reqwest::Client) -> Arc<GatewayServerFactory> {
    let caches = Arc::new(SpaceCaches::new(
        config.space_metadata_ttl,
        config.space_schema_ttl,
    ));
    let discovery = GradioDiscovery::new(
        client.clone(),
        config.hub_base_url.clone(),
        SpaceHost::Subdomain,
        caches,
    );
    let catalog = BuiltinCatalog::new(Arc::new(HubApiClient::new(
        client.clone(),
        config.hub_base_url.clone(),
    )));
    let settings: Arc<dyn SettingsProvider> = match &config.settings_api_url {
        Some(url) => Arc::new(ExternalSettingsApi::new(client.clone(), url.clone())),
        None => Arc::new(NoSettings),
    };
    Arc::new(GatewayServerFactory::new(
        config.clone(),
        catalog,
        settings,
        discovery,
        client.clone(),
    ))
}

fn build_gate(config: &GatewayConfig, client: &reqwest::Client, bind: SocketAddr) -> AuthGate {
    let validator = TokenValidator::new(
        client.clone(),
        &config.hub_base_url,
        std::time::Duration::from_secs(5),
    );
    AuthGate::new(validator, format!("http://{bind}/mcp"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = GatewayConfig::from_env();

    let client = reqwest::Client::builder()
        .user_agent(concat!("spacegate/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building http client")?;
    let factory = build_factory(&config, &client);

    match cli.transport {
        TransportChoice::Stdio => run_stdio(factory, &config).await,
        TransportChoice::Http => {
            let options = StreamableHttpOptions {
                endpoint: cli.endpoint.clone(),
                session: SessionOptions {
                    heartbeat_interval: config.heartbeat_interval,
                    stale_check_interval: config.stale_check_interval,
                    stale_timeout: config.stale_timeout,
                    ping_enabled: config.ping_enabled,
                    ping_interval: config.ping_interval,
                    ping_failure_threshold: config.ping_failure_threshold,
                    ping_timeout: std::time::Duration::from_secs(10),
                },
                ..StreamableHttpOptions::default()
            };
            let transport = StreamableHttpTransport::new(
                factory,
                build_gate(&config, &client, cli.bind),
                options,
                config.as_report(),
            );
            serve_http(transport.router(), cli.bind, &transport).await
        }
        TransportChoice::Json => {
            // Strict compliance turns the convenience welcome page into a
            // plain 405, as the protocol prescribes for GET.
            let options = StatelessOptions {
                endpoint: cli.endpoint.clone(),
                welcome_page: config.welcome_page_enabled && !config.strict_compliance,
                analytics_sessions: config.analytics_sessions,
                temp_log_budget: config.temp_log_budget,
            };
            let transport = StatelessHttpTransport::new(
                factory,
                build_gate(&config, &client, cli.bind),
                options,
                config.as_report(),
            );
            serve_http(transport.router(), cli.bind, &transport).await
        }
    }
}

async fn serve_http<T: ServerTransport>(
    router: axum::Router,
    bind: SocketAddr,
    transport: &T,
) -> anyhow::Result<()> {
    transport.initialize().await.context("transport init")?;

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "gateway listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining");
    };

    let serve = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown);

    let result = serve.await;
    transport.shutdown();
    transport.cleanup().await.context("transport cleanup")?;
    result.context("serving http")
}

async fn run_stdio(factory: Arc<GatewayServerFactory>, config: &GatewayConfig) -> anyhow::Result<()> {
    // One implicit session for the process lifetime. Token and Space list
    // come from the environment rather than headers.
    let token = std::env::var("HF_TOKEN").ok();
    let mut headers = std::collections::HashMap::new();
    if let Ok(gradio) = std::env::var("SPACEGATE_GRADIO") {
        headers.insert("x-mcp-gradio".to_string(), gradio);
    }
    let auth = AuthState::Anonymous;
    let request = FactoryRequest {
        headers,
        auth: auth.clone(),
        token: token.clone(),
        skip_gradio: false,
        transport: TransportKind::Stdio,
        cancel: CancellationToken::new(),
    };
    let scoped = factory
        .create(request)
        .await
        .map_err(|e| anyhow::anyhow!("factory failed: {e}"))?;

    let transport = StdioTransport::new(scoped.router, auth, token, config.as_report());
    transport.run().await.context("stdio transport")
}
