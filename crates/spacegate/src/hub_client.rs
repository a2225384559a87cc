//! Narrow client for the platform APIs behind the built-in tools.
//!
//! Tool business logic lives upstream; this client only shapes requests
//! and clips responses. Every method returns a JSON value ready to be
//! rendered into a tool result, and every failure is a tool-surface error
//! with at most a short body excerpt.

use serde_json::Value;
use url::Url;

use spacegate_server::{ServerError, ServerResult};

/// Characters of upstream body kept in error messages.
const ERROR_EXCERPT: usize = 500;

/// Client for Hub search, detail, docs, and jobs endpoints.
#[derive(Debug, Clone)]
pub struct HubApiClient {
    client: reqwest::Client,
    base: Url,
}

impl HubApiClient {
    /// Client against the Hub base URL.
    pub fn new(client: reqwest::Client, base: Url) -> Self {
        Self { client, base }
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json(
        &self,
        url: Url,
        query: &[(&str, &str)],
        token: Option<&str>,
    ) -> ServerResult<Value> {
        let mut request = self.client.get(url.clone()).query(query);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ServerError::tool(format!("hub request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(ERROR_EXCERPT).collect();
            return Err(ServerError::tool(format!(
                "hub returned {status} for {}: {excerpt}",
                url.path()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ServerError::tool(format!("hub response unparseable: {e}")))
    }

    /// Identity of the token's owner.
    pub async fn whoami(&self, token: &str) -> ServerResult<Value> {
        self.get_json(self.url(&["api", "whoami-v2"]), &[], Some(token))
            .await
    }

    /// Search Spaces.
    pub async fn search_spaces(&self, query: &str, limit: u32) -> ServerResult<Value> {
        self.get_json(
            self.url(&["api", "spaces"]),
            &[("search", query), ("limit", &limit.to_string())],
            None,
        )
        .await
    }

    /// Search models.
    pub async fn search_models(&self, query: &str, limit: u32) -> ServerResult<Value> {
        self.get_json(
            self.url(&["api", "models"]),
            &[("search", query), ("limit", &limit.to_string())],
            None,
        )
        .await
    }

    /// Detail for one model.
    pub async fn model_detail(&self, model_id: &str) -> ServerResult<Value> {
        let mut segments = vec!["api", "models"];
        segments.extend(model_id.split('/'));
        self.get_json(self.url(&segments), &[], None).await
    }

    /// Search datasets.
    pub async fn search_datasets(&self, query: &str, limit: u32) -> ServerResult<Value> {
        self.get_json(
            self.url(&["api", "datasets"]),
            &[("search", query), ("limit", &limit.to_string())],
            None,
        )
        .await
    }

    /// Detail for one dataset.
    pub async fn dataset_detail(&self, dataset_id: &str) -> ServerResult<Value> {
        let mut segments = vec!["api", "datasets"];
        segments.extend(dataset_id.split('/'));
        self.get_json(self.url(&segments), &[], None).await
    }

    /// Metadata for one Space.
    pub async fn space_info(&self, space_id: &str) -> ServerResult<Value> {
        let mut segments = vec!["api", "spaces"];
        segments.extend(space_id.split('/'));
        self.get_json(self.url(&segments), &[], None).await
    }

    /// Search papers.
    pub async fn search_papers(&self, query: &str) -> ServerResult<Value> {
        self.get_json(
            self.url(&["api", "papers", "search"]),
            &[("q", query)],
            None,
        )
        .await
    }

    /// Inspect a repository; optionally include its README body.
    pub async fn inspect_repo(&self, repo_id: &str, include_readme: bool) -> ServerResult<Value> {
        let mut segments = vec!["api", "models"];
        segments.extend(repo_id.split('/'));
        let mut detail = self.get_json(self.url(&segments), &[], None).await?;
        if include_readme {
            let mut readme_segments: Vec<&str> = repo_id.split('/').collect();
            readme_segments.extend(["raw", "main", "README.md"]);
            let readme_url = self.url(&readme_segments);
            match self.client.get(readme_url).send().await {
                Ok(response) if response.status().is_success() => {
                    if let (Ok(text), Value::Object(map)) = (response.text().await, &mut detail) {
                        map.insert("readme".to_string(), Value::String(text));
                    }
                }
                _ => {
                    tracing::debug!(repo = repo_id, "readme unavailable");
                }
            }
        }
        Ok(detail)
    }

    /// Search the documentation index.
    pub async fn doc_search(&self, query: &str) -> ServerResult<Value> {
        self.get_json(self.url(&["api", "docs", "search"]), &[("q", query)], None)
            .await
    }

    /// Fetch one documentation page as text.
    pub async fn doc_fetch(&self, doc_url: &str) -> ServerResult<Value> {
        let url = Url::parse(doc_url)
            .map_err(|_| ServerError::tool(format!("invalid doc url: {doc_url}")))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServerError::tool(format!("doc fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(ServerError::tool(format!(
                "doc fetch returned {}",
                response.status()
            )));
        }
        let text = response
            .text()
            .await
            .map_err(|e| ServerError::tool(format!("doc body unreadable: {e}")))?;
        Ok(Value::String(text))
    }

    /// List the caller's compute jobs.
    pub async fn list_jobs(&self, token: &str) -> ServerResult<Value> {
        self.get_json(self.url(&["api", "jobs"]), &[], Some(token))
            .await
    }
}
