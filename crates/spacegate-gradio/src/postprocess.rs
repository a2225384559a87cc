//! Upstream result post-processing.
//!
//! Two transforms run, in order, after a tool result comes back:
//!
//! 1. the image-content filter (header- or selection-enabled) removes every
//!    `image` block, leaving an explanatory text block when nothing else
//!    remains;
//! 2. for callers identifying as `openai-mcp`, the first URL found in the
//!    content is lifted into `structuredContent` so the client can render
//!    it without scraping text.
//!
//! Separately, tools whose name carries the `_mcpui` marker and whose sole
//! result block is a URL get that URL embedded as an audio-player UI
//! resource.

use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use uuid::Uuid;

use spacegate_protocol::types::{CallToolResult, Content, EmbeddedResource, ResourceContents};

/// Client name that opts into URL extraction.
pub const URL_EXTRACTION_CLIENT: &str = "openai-mcp";

/// Tool-name marker that opts into UI-resource embedding.
pub const MCPUI_MARKER: &str = "_mcpui";

static URL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:Image URL:\s*)?(https?://\S+)$").expect("static regex compiles")
});

/// Remove every image block from the result.
///
/// A result that was all images becomes a single text block explaining the
/// omission, so clients never see an empty content array.
pub fn strip_image_blocks(result: &mut CallToolResult) {
    let had_content = !result.content.is_empty();
    result
        .content
        .retain(|block| !matches!(block, Content::Image(_)));
    if had_content && result.content.is_empty() {
        result.content.push(Content::text(
            "The tool returned only image content, which was omitted at the client's request.",
        ));
    }
}

/// Find the first URL in the result's content blocks.
///
/// A URL is either an explicit link block or a text block that is exactly a
/// URL (optionally prefixed with `Image URL:`).
pub fn first_url(result: &CallToolResult) -> Option<String> {
    result.content.iter().find_map(|block| match block {
        Content::ResourceLink(link) => Some(link.uri.clone()),
        Content::Text(text) => URL_LINE
            .captures(text.text.trim())
            .map(|captures| captures[1].to_string()),
        _ => None,
    })
}

/// Lift the first URL into `structuredContent` for clients that want it.
pub fn attach_url_structured_content(result: &mut CallToolResult, space_name: &str) {
    if let Some(url) = first_url(result) {
        result.structured_content = Some(json!({
            "url": url,
            "spaceName": space_name,
        }));
    }
}

/// Whether a tool result qualifies for UI embedding: the marker is in the
/// tool name and the sole content block is a URL.
pub fn mcpui_url(tool_name: &str, result: &CallToolResult) -> Option<String> {
    if !tool_name.contains(MCPUI_MARKER) || result.content.len() != 1 {
        return None;
    }
    first_url(result)
}

/// Replace a lone audio URL with an embedded audio-player UI resource.
///
/// The target is fetched and inlined as a data URI inside a minimal HTML
/// player, served under a synthetic `ui://` URI. When the fetch fails the
/// result falls back to referencing the URL directly.
pub async fn embed_audio_player(
    client: &reqwest::Client,
    result: &mut CallToolResult,
    space_name: &str,
    url: &str,
) {
    let uri = format!("ui://{}/{}", space_name.replace('/', "-"), Uuid::new_v4());

    match fetch_audio(client, url).await {
        Ok((bytes, mime)) => {
            let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
            let html = format!(
                "<audio controls autoplay src=\"data:{mime};base64,{data}\">\
                 Your client cannot play embedded audio.</audio>"
            );
            result.content = vec![Content::Resource(EmbeddedResource {
                resource: ResourceContents {
                    uri,
                    mime_type: Some("text/html".to_string()),
                    text: Some(html),
                    blob: None,
                },
            })];
        }
        Err(e) => {
            tracing::warn!(url, error = %e, "audio fetch for ui embed failed");
            result.content = vec![Content::text(format!("Audio available at {url}"))];
        }
    }
}

async fn fetch_audio(
    client: &reqwest::Client,
    url: &str,
) -> Result<(Vec<u8>, String), reqwest::Error> {
    let response = client
        .get(url)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await?
        .error_for_status()?;
    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/wav")
        .to_string();
    let bytes = response.bytes().await?;
    Ok((bytes.to_vec(), mime))
}
