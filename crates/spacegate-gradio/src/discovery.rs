//! Parallel Space discovery: metadata phase, filter, schema phase.
//!
//! Discovery is two fan-outs with a filter between them. Metadata fetches
//! run in batches of `concurrency`; schema fetches for the surviving
//! Gradio Spaces run fully parallel. Every per-space failure is logged and
//! isolated: the other Spaces still resolve.
//!
//! Configuration is copied into [`DiscoveryOptions`] at entry, so runtime
//! reconfiguration never races a discovery already in flight.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::SpaceCaches;
use crate::error::GradioError;
use crate::hub::{fetch_space_metadata, SpaceMetadata, SpaceRuntime};
use crate::schema::{fetch_space_schema, SpaceHost, ToolDescriptor};
use crate::space::SpaceId;

/// Options for one discovery run. Copied at entry; immutable thereafter.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Skip the schema phase entirely (metadata-only discovery).
    pub skip_schemas: bool,
    /// Metadata batch size.
    pub concurrency: usize,
    /// Per-space metadata fetch deadline.
    pub metadata_timeout: Duration,
    /// Per-space schema fetch deadline.
    pub schema_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            skip_schemas: false,
            concurrency: crate::DEFAULT_DISCOVERY_CONCURRENCY,
            metadata_timeout: crate::DEFAULT_METADATA_TIMEOUT,
            schema_timeout: crate::DEFAULT_SCHEMA_TIMEOUT,
        }
    }
}

/// One fully-resolved Space, ready for tool registration.
#[derive(Debug, Clone)]
pub struct DiscoveredSpace {
    /// Space identity.
    pub id: SpaceId,
    /// Serving subdomain.
    pub subdomain: String,
    /// Privacy flag; decides name prefix and token forwarding.
    pub private: bool,
    /// Emoji from the Hub, for display.
    pub emoji: Option<String>,
    /// Runtime details, when reported.
    pub runtime: Option<SpaceRuntime>,
    /// Normalized upstream tools. Empty when schemas were skipped.
    pub tools: Vec<ToolDescriptor>,
}

/// Discovery engine bound to the process-wide caches and HTTP client.
#[derive(Debug, Clone)]
pub struct GradioDiscovery {
    client: reqwest::Client,
    hub_base: Url,
    host: Arc<SpaceHost>,
    caches: Arc<SpaceCaches>,
}

impl GradioDiscovery {
    /// Create a discovery engine.
    pub fn new(
        client: reqwest::Client,
        hub_base: Url,
        host: SpaceHost,
        caches: Arc<SpaceCaches>,
    ) -> Self {
        Self {
            client,
            hub_base,
            host: Arc::new(host),
            caches,
        }
    }

    /// Shared caches, exposed for statistics reporting.
    pub fn caches(&self) -> &SpaceCaches {
        &self.caches
    }

    /// Where Spaces are hosted, exposed for the upstream call path.
    pub fn host(&self) -> &SpaceHost {
        &self.host
    }

    /// Resolve metadata (and unless skipped, schemas) for the given Spaces.
    ///
    /// Partial success is the contract: the result contains whatever
    /// resolved, and every failure is a log event, not an error.
    pub async fn discover(
        &self,
        spaces: &[SpaceId],
        token: Option<&str>,
        options: DiscoveryOptions,
        cancel: &CancellationToken,
    ) -> Vec<DiscoveredSpace> {
        let mut resolved: Vec<(SpaceId, SpaceMetadata)> = Vec::with_capacity(spaces.len());

        let batch_size = options.concurrency.max(1);
        for batch in spaces.chunks(batch_size) {
            if cancel.is_cancelled() {
                return Vec::new();
            }
            let fetches = batch.iter().map(|space| {
                let space = space.clone();
                async move {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => Err(GradioError::Cancelled),
                        r = fetch_space_metadata(
                            &self.client,
                            &self.hub_base,
                            &space,
                            token,
                            &self.caches.metadata,
                            options.metadata_timeout,
                        ) => r,
                    };
                    (space, result)
                }
            });
            for (space, result) in join_all(fetches).await {
                match result {
                    Ok(meta) => resolved.push((space, meta)),
                    Err(e) if e.is_cancellation() => {}
                    Err(e) => {
                        tracing::warn!(space = %space, error = %e, "space metadata fetch failed");
                    }
                }
            }
        }

        let proxyable: Vec<(SpaceId, SpaceMetadata)> = resolved
            .into_iter()
            .filter(|(space, meta)| {
                if !meta.is_proxyable() {
                    tracing::debug!(space = %space, sdk = ?meta.sdk, "skipping non-gradio space");
                }
                meta.is_proxyable()
            })
            .collect();

        if options.skip_schemas {
            return proxyable
                .into_iter()
                .map(|(id, meta)| into_discovered(id, meta, Vec::new()))
                .collect();
        }

        // Schema phase: no batching; each Space resolves independently.
        let fetches = proxyable.into_iter().map(|(space, meta)| async move {
            let tools = tokio::select! {
                _ = cancel.cancelled() => Err(GradioError::Cancelled),
                r = self.space_tools(&space, &meta, token, options.schema_timeout) => r,
            };
            (space, meta, tools)
        });

        let mut out = Vec::new();
        for (space, meta, tools) in join_all(fetches).await {
            match tools {
                Ok(tools) => out.push(into_discovered(space, meta, tools)),
                Err(e) if e.is_cancellation() => {}
                Err(e) => {
                    tracing::warn!(space = %space, error = %e, "space schema fetch failed");
                }
            }
        }
        out
    }

    /// Schema for one Space, through the schema cache.
    async fn space_tools(
        &self,
        space: &SpaceId,
        meta: &SpaceMetadata,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<ToolDescriptor>, GradioError> {
        if let Some(tools) = self.caches.schemas.get(space.as_str()) {
            return Ok(tools);
        }

        let tools = fetch_space_schema(
            &self.client,
            &self.host,
            space,
            &meta.subdomain,
            meta.private,
            token,
            timeout,
        )
        .await?;

        if !meta.private {
            self.caches.schemas.set(space.as_str(), tools.clone(), None);
        }
        Ok(tools)
    }
}

fn into_discovered(id: SpaceId, meta: SpaceMetadata, tools: Vec<ToolDescriptor>) -> DiscoveredSpace {
    DiscoveredSpace {
        id,
        subdomain: meta.subdomain,
        private: meta.private,
        emoji: meta.emoji,
        runtime: meta.runtime,
        tools,
    }
}
