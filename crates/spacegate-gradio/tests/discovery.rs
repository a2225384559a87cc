//! Discovery behavior against a mock Hub and mock schema endpoints.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use spacegate_gradio::schema::SpaceHost;
use spacegate_gradio::{DiscoveryOptions, GradioDiscovery, SpaceCaches, SpaceId};

fn space_json(subdomain: &str, private: bool) -> serde_json::Value {
    json!({
        "subdomain": subdomain,
        "private": private,
        "sdk": "gradio",
        "emoji": "🛰️",
        "runtime": {"stage": "RUNNING", "hardware": "cpu-basic"}
    })
}

fn schema_json() -> serde_json::Value {
    json!([
        {"name": "infer", "description": "Run the model", "inputSchema": {
            "type": "object",
            "properties": {"prompt": {"type": "string"}},
            "required": ["prompt"]
        }}
    ])
}

async fn mount_space(server: &MockServer, owner: &str, name: &str, subdomain: &str, private: bool) {
    Mock::given(method("GET"))
        .and(path(format!("/api/spaces/{owner}/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(space_json(subdomain, private)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/host/{subdomain}/gradio_api/mcp/schema")))
        .respond_with(ResponseTemplate::new(200).set_body_json(schema_json()))
        .mount(server)
        .await;
}

fn discovery(server: &MockServer, caches: Arc<SpaceCaches>) -> GradioDiscovery {
    let hub = Url::parse(&server.uri()).unwrap();
    let host = SpaceHost::Rooted(Url::parse(&format!("{}/host", server.uri())).unwrap());
    GradioDiscovery::new(reqwest::Client::new(), hub, host, caches)
}

fn spaces(names: &[&str]) -> Vec<SpaceId> {
    names.iter().map(|n| SpaceId::parse(n).unwrap()).collect()
}

#[tokio::test]
async fn cold_discovery_caches_public_spaces_only() {
    let server = MockServer::start().await;
    mount_space(&server, "a", "x", "a-x", false).await;
    mount_space(&server, "b", "y", "b-y", false).await;
    mount_space(&server, "c", "z", "c-z", true).await;

    let caches = Arc::new(SpaceCaches::default());
    let discovery = discovery(&server, caches.clone());
    let cancel = CancellationToken::new();

    let result = discovery
        .discover(
            &spaces(&["a/x", "b/y", "c/z"]),
            Some("hf_token"),
            DiscoveryOptions::default(),
            &cancel,
        )
        .await;

    assert_eq!(result.len(), 3);
    assert!(result.iter().all(|s| !s.tools.is_empty()));

    // Privacy invariant: the private space is in the result but in neither
    // cache level.
    assert_eq!(caches.metadata.len(), 2);
    assert_eq!(caches.schemas.len(), 2);
    assert!(caches.metadata.get_for_revalidation("c/z").is_none());
    assert!(caches.schemas.get_for_revalidation("c/z").is_none());
}

#[tokio::test]
async fn warm_discovery_serves_public_spaces_from_cache() {
    let server = MockServer::start().await;
    // Public metadata and schema must be fetched exactly once across the
    // two rounds; the private space is fetched fresh both times.
    Mock::given(method("GET"))
        .and(path("/api/spaces/a/x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(space_json("a-x", false)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/host/a-x/gradio_api/mcp/schema"))
        .respond_with(ResponseTemplate::new(200).set_body_json(schema_json()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/spaces/c/z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(space_json("c-z", true)))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/host/c-z/gradio_api/mcp/schema"))
        .respond_with(ResponseTemplate::new(200).set_body_json(schema_json()))
        .expect(2)
        .mount(&server)
        .await;

    let caches = Arc::new(SpaceCaches::default());
    let discovery = discovery(&server, caches.clone());
    let cancel = CancellationToken::new();
    let list = spaces(&["a/x", "c/z"]);

    let cold = discovery
        .discover(&list, Some("t"), DiscoveryOptions::default(), &cancel)
        .await;
    let warm = discovery
        .discover(&list, Some("t"), DiscoveryOptions::default(), &cancel)
        .await;

    assert_eq!(cold.len(), 2);
    assert_eq!(warm.len(), 2);

    let stats = caches.metadata.stats();
    assert!(stats.hits >= 1, "expected warm metadata hit, got {stats:?}");
    // Cold round misses both; warm round misses only the private space.
    assert_eq!(stats.misses, 3);
}

#[tokio::test]
async fn expired_metadata_revalidates_with_etag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/spaces/a/x"))
        .and(header("If-None-Match", "W/\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/spaces/a/x"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "W/\"v1\"")
                .set_body_json(space_json("a-x", false)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let caches = Arc::new(SpaceCaches::new(
        Duration::from_millis(30),
        Duration::from_secs(300),
    ));
    let discovery = discovery(&server, caches.clone());
    let cancel = CancellationToken::new();
    let list = spaces(&["a/x"]);
    let options = DiscoveryOptions {
        skip_schemas: true,
        ..DiscoveryOptions::default()
    };

    discovery
        .discover(&list, None, options.clone(), &cancel)
        .await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    let result = discovery.discover(&list, None, options, &cancel).await;

    assert_eq!(result.len(), 1);
    let stats = caches.metadata.stats();
    assert_eq!(stats.etag_revalidations, 1);
    assert_eq!(stats.size, 1);
}

#[tokio::test]
async fn one_broken_space_does_not_fail_the_others() {
    let server = MockServer::start().await;
    mount_space(&server, "a", "x", "a-x", false).await;
    Mock::given(method("GET"))
        .and(path("/api/spaces/bad/dead"))
        .respond_with(ResponseTemplate::new(500).set_body_string("kaboom"))
        .mount(&server)
        .await;
    // A space whose schema endpoint fails is dropped; metadata alone is not
    // enough when schemas are required.
    Mock::given(method("GET"))
        .and(path("/api/spaces/slow/schema"))
        .respond_with(ResponseTemplate::new(200).set_body_json(space_json("slow-schema", false)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/host/slow-schema/gradio_api/mcp/schema"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let caches = Arc::new(SpaceCaches::default());
    let discovery = discovery(&server, caches.clone());
    let cancel = CancellationToken::new();

    let result = discovery
        .discover(
            &spaces(&["a/x", "bad/dead", "slow/schema"]),
            None,
            DiscoveryOptions::default(),
            &cancel,
        )
        .await;

    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id.as_str(), "a/x");
}

#[tokio::test]
async fn non_gradio_spaces_are_filtered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/spaces/docker/app"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subdomain": "docker-app",
            "private": false,
            "sdk": "docker"
        })))
        .mount(&server)
        .await;
    mount_space(&server, "a", "x", "a-x", false).await;

    let caches = Arc::new(SpaceCaches::default());
    let discovery = discovery(&server, caches);
    let cancel = CancellationToken::new();

    let result = discovery
        .discover(
            &spaces(&["docker/app", "a/x"]),
            None,
            DiscoveryOptions::default(),
            &cancel,
        )
        .await;

    assert_eq!(result.len(), 1);
    assert_eq!(result[0].subdomain, "a-x");
}

#[tokio::test]
async fn skip_schemas_returns_metadata_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/spaces/a/x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(space_json("a-x", false)))
        .mount(&server)
        .await;

    let caches = Arc::new(SpaceCaches::default());
    let discovery = discovery(&server, caches.clone());
    let cancel = CancellationToken::new();
    let options = DiscoveryOptions {
        skip_schemas: true,
        ..DiscoveryOptions::default()
    };

    let result = discovery
        .discover(&spaces(&["a/x"]), None, options, &cancel)
        .await;

    assert_eq!(result.len(), 1);
    assert!(result[0].tools.is_empty());
    assert_eq!(caches.schemas.len(), 0);
}

#[tokio::test]
async fn private_schema_fetch_forwards_caller_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/spaces/c/z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(space_json("c-z", true)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/host/c-z/gradio_api/mcp/schema"))
        .and(header("X-HF-Authorization", "Bearer hf_secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(schema_json()))
        .expect(1)
        .mount(&server)
        .await;

    let caches = Arc::new(SpaceCaches::default());
    let discovery = discovery(&server, caches);
    let cancel = CancellationToken::new();

    let result = discovery
        .discover(
            &spaces(&["c/z"]),
            Some("hf_secret"),
            DiscoveryOptions::default(),
            &cancel,
        )
        .await;

    assert_eq!(result.len(), 1);
    assert!(result[0].private);
}
