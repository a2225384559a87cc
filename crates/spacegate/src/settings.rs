//! User settings and their providers.
//!
//! Settings are an external collaborator behind a narrow interface: the
//! gateway asks for the caller's settings and gets back the enabled
//! built-in tools and any Gradio Space endpoints they configured. Where
//! the settings came from only affects the selection mode reported in
//! observability.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

/// Where a settings payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsSource {
    /// Fetched from the external settings API.
    External,
    /// Supplied locally (tests, self-hosted setups).
    Internal,
}

/// A caller's stored configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserSettings {
    /// Enabled built-in tool ids.
    #[serde(rename = "builtInTools", default)]
    pub built_in_tools: Vec<String>,
    /// Configured Gradio Space endpoints, as `owner/name` strings.
    #[serde(rename = "gradioSpaces", default)]
    pub gradio_spaces: Vec<String>,
    /// Strip image blocks from Gradio results for this user.
    #[serde(rename = "noImageContent", default)]
    pub no_image_content: bool,
    /// Provenance; not part of the wire payload.
    #[serde(skip, default = "default_source")]
    pub source: SettingsSource,
}

fn default_source() -> SettingsSource {
    SettingsSource::External
}

impl UserSettings {
    /// Settings supplied locally.
    pub fn internal(built_in_tools: Vec<String>, gradio_spaces: Vec<String>) -> Self {
        Self {
            built_in_tools,
            gradio_spaces,
            no_image_content: false,
            source: SettingsSource::Internal,
        }
    }
}

/// Loads settings for a caller.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Settings for the given identity, or `None` when unavailable.
    async fn load(&self, username: Option<&str>, token: Option<&str>) -> Option<UserSettings>;
}

/// Provider backed by the external settings API.
#[derive(Debug, Clone)]
pub struct ExternalSettingsApi {
    client: reqwest::Client,
    base: Url,
}

impl ExternalSettingsApi {
    /// Provider against `{base}/api/settings/{username}`.
    pub fn new(client: reqwest::Client, base: Url) -> Self {
        Self { client, base }
    }
}

#[async_trait]
impl SettingsProvider for ExternalSettingsApi {
    async fn load(&self, username: Option<&str>, token: Option<&str>) -> Option<UserSettings> {
        let username = username?;
        let mut url = self.base.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["api", "settings", username]);

        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "settings api unreachable");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "settings api returned no settings");
            return None;
        }
        match response.json::<UserSettings>().await {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::warn!(error = %e, "settings payload unparseable");
                None
            }
        }
    }
}

/// Provider for deployments without user settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSettings;

#[async_trait]
impl SettingsProvider for NoSettings {
    async fn load(&self, _username: Option<&str>, _token: Option<&str>) -> Option<UserSettings> {
        None
    }
}

/// Provider serving one fixed settings value; used by tests and
/// self-hosted single-user setups.
#[derive(Debug, Clone)]
pub struct StaticSettings(pub UserSettings);

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn load(&self, _username: Option<&str>, _token: Option<&str>) -> Option<UserSettings> {
        Some(self.0.clone())
    }
}
