//! Space metadata resolution against the Hub API.
//!
//! `GET {hub}/api/spaces/{owner}/{name}` with conditional revalidation:
//! a cached ETag is replayed via `If-None-Match`, and a `304` refreshes the
//! cache entry's creation timestamp without a body transfer.
//!
//! The privacy invariant lives here, at the `set` call site: metadata for a
//! private Space is returned to the caller but never written to the cache,
//! so authorization-sensitive state cannot go stale.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, IF_NONE_MATCH};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::TtlCache;
use crate::error::GradioError;
use crate::space::SpaceId;

/// Runtime details the Hub optionally reports for a Space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceRuntime {
    /// Lifecycle stage, e.g. `RUNNING`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Hardware flavor, e.g. `cpu-basic`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware: Option<String>,
}

/// Space metadata as cached by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceMetadata {
    /// Subdomain the Space is served from (`{subdomain}.hf.space`).
    #[serde(default)]
    pub subdomain: String,
    /// Emoji shown next to the Space name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    /// Whether the Space is private.
    #[serde(default)]
    pub private: bool,
    /// SDK tag; only `gradio` Spaces are proxied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk: Option<String>,
    /// Optional runtime details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<SpaceRuntime>,
}

impl SpaceMetadata {
    /// Whether this Space can be proxied: Gradio SDK and a usable subdomain.
    pub fn is_proxyable(&self) -> bool {
        self.sdk.as_deref() == Some("gradio") && !self.subdomain.is_empty()
    }
}

/// Fetch metadata for one Space, consulting and maintaining the cache.
///
/// Flow, in order:
/// 1. live cache entry → return it;
/// 2. expired entry with an ETag → conditional request, `304` refreshes and
///    returns the cached entry;
/// 3. `200` → parse, cache iff public, return.
///
/// Every failure is per-space: callers running a batch continue with the
/// other Spaces.
pub async fn fetch_space_metadata(
    client: &reqwest::Client,
    hub_base: &Url,
    space: &SpaceId,
    token: Option<&str>,
    cache: &TtlCache<SpaceMetadata>,
    timeout: Duration,
) -> Result<SpaceMetadata, GradioError> {
    if let Some(meta) = cache.get(space.as_str()) {
        return Ok(meta);
    }

    let mut headers = HeaderMap::new();
    let stale = cache.get_for_revalidation(space.as_str());
    if let Some((_, Some(etag))) = &stale {
        if let Ok(value) = HeaderValue::from_str(etag) {
            headers.insert(IF_NONE_MATCH, value);
        }
    }
    if let Some(token) = token {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, value);
        }
    }

    let url = space_info_url(hub_base, space);
    let response = client
        .get(url)
        .headers(headers)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| to_fetch_error(e, space, timeout))?;

    if response.status() == StatusCode::NOT_MODIFIED {
        if let Some(meta) = cache.mark_revalidated(space.as_str()) {
            return Ok(meta);
        }
        // A 304 without a cached entry means the upstream honored a header
        // we no longer have state for; refetch unconditionally.
        return Err(GradioError::Upstream {
            space: space.to_string(),
            detail: "304 with no cached entry".to_string(),
        });
    }

    let status = response.status();
    let etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GradioError::Hub {
            space: space.to_string(),
            status: status.as_u16(),
            body: GradioError::clip_body(&body),
        });
    }

    let meta: SpaceMetadata = response.json().await.map_err(|e| GradioError::Http {
        context: format!("space metadata for {space}"),
        source: e,
    })?;

    if !meta.private {
        cache.set(space.as_str(), meta.clone(), etag);
    }
    Ok(meta)
}

fn space_info_url(hub_base: &Url, space: &SpaceId) -> Url {
    let mut url = hub_base.clone();
    {
        let mut segments = url.path_segments_mut().expect("hub base url is not a base");
        segments.pop_if_empty();
        segments.extend(["api", "spaces", space.owner(), space.name()]);
    }
    url
}

fn to_fetch_error(e: reqwest::Error, space: &SpaceId, timeout: Duration) -> GradioError {
    if e.is_timeout() {
        GradioError::Timeout {
            context: format!("space metadata for {space}"),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        GradioError::Http {
            context: format!("space metadata for {space}"),
            source: e,
        }
    }
}
