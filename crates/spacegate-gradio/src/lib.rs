//! # Spacegate Gradio
//!
//! Discovery and proxying of Gradio-hosted Spaces.
//!
//! A Space is a hosted application named `owner/name`. When its SDK is
//! Gradio it exposes an MCP endpoint the gateway can mediate: this crate
//! resolves Space metadata and tool schemas (through a two-level TTL cache
//! with conditional revalidation), synthesizes outward tool names, opens a
//! fresh upstream session per tool call, relays progress notifications, and
//! post-processes results.
//!
//! Failure isolation is the governing rule throughout: one slow or broken
//! Space never fails discovery or invocation for the others.

#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(unsafe_code)]

pub mod cache;
pub mod discovery;
pub mod error;
pub mod hub;
pub mod naming;
pub mod postprocess;
pub mod schema;
pub mod space;
mod sse;
pub mod upstream;

pub use cache::{CacheStatsSnapshot, SpaceCaches, TtlCache};
pub use discovery::{DiscoveredSpace, DiscoveryOptions, GradioDiscovery};
pub use error::GradioError;
pub use hub::{SpaceMetadata, SpaceRuntime};
pub use naming::{is_outward_gradio_name, outward_tool_name};
pub use schema::ToolDescriptor;
pub use space::SpaceId;
pub use upstream::{ProgressRelay, UpstreamSession};

use std::time::Duration;

/// Default TTL for cached Space metadata.
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_millis(300_000);
/// Default TTL for cached Space schemas.
pub const DEFAULT_SCHEMA_TTL: Duration = Duration::from_millis(300_000);
/// Default parallelism of the metadata discovery phase.
pub const DEFAULT_DISCOVERY_CONCURRENCY: usize = 10;
/// Default timeout for one Space metadata fetch.
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_millis(5_000);
/// Default timeout for one Space schema fetch.
pub const DEFAULT_SCHEMA_TIMEOUT: Duration = Duration::from_millis(7_500);
/// Header used to forward the caller's token to private Spaces.
pub const UPSTREAM_AUTH_HEADER: &str = "X-HF-Authorization";
