//! Space tool schemas: fetch, normalize, project.
//!
//! Spaces expose their tool schemas at
//! `https://{subdomain}.hf.space/gradio_api/mcp/schema` in one of two
//! shapes. Both are normalized at ingest into [`ToolDescriptor`] so nothing
//! downstream ever branches on wire form:
//!
//! - array form: `[{"name", "description"?, "inputSchema"}, ...]`
//! - object form: `{"tool_name": <input schema>, ...}` with the description
//!   carried on the schema object itself
//!
//! Tools whose name contains `<lambda` are unnamed Gradio event handlers
//! and are filtered out.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use url::Url;

use crate::error::GradioError;
use crate::space::SpaceId;
use crate::UPSTREAM_AUTH_HEADER;

/// Marker identifying anonymous Gradio handlers that must not be exposed.
const LAMBDA_MARKER: &str = "<lambda";

/// A normalized upstream tool description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name as the Space knows it.
    pub name: String,
    /// Human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Projected input schema.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Where a Space serves its MCP endpoints.
///
/// Production uses the `https://{subdomain}.hf.space` host per Space; tests
/// and self-hosted setups override with a shared base URL under which each
/// Space is a path segment.
#[derive(Debug, Clone)]
pub enum SpaceHost {
    /// `https://{subdomain}.hf.space`
    Subdomain,
    /// `{base}/{subdomain}` — used when Spaces sit behind one host.
    Rooted(Url),
}

impl SpaceHost {
    /// URL of the schema endpoint for a subdomain.
    pub fn schema_url(&self, subdomain: &str) -> Result<Url, GradioError> {
        self.endpoint_url(subdomain, "gradio_api/mcp/schema")
    }

    /// URL of the streaming MCP endpoint for a subdomain.
    pub fn sse_url(&self, subdomain: &str) -> Result<Url, GradioError> {
        self.endpoint_url(subdomain, "gradio_api/mcp/sse")
    }

    fn endpoint_url(&self, subdomain: &str, suffix: &str) -> Result<Url, GradioError> {
        let raw = match self {
            Self::Subdomain => format!("https://{subdomain}.hf.space/{suffix}"),
            Self::Rooted(base) => {
                let base = base.as_str().trim_end_matches('/');
                format!("{base}/{subdomain}/{suffix}")
            }
        };
        Url::parse(&raw).map_err(|_| GradioError::Upstream {
            space: subdomain.to_string(),
            detail: format!("unbuildable endpoint url for '{subdomain}'"),
        })
    }
}

/// Fetch and normalize the tool schema of one Space.
///
/// For a private Space the caller's token is forwarded in the dedicated
/// upstream header; the gateway itself never interprets it.
pub async fn fetch_space_schema(
    client: &reqwest::Client,
    host: &SpaceHost,
    space: &SpaceId,
    subdomain: &str,
    private: bool,
    token: Option<&str>,
    timeout: Duration,
) -> Result<Vec<ToolDescriptor>, GradioError> {
    let url = host.schema_url(subdomain)?;

    let mut headers = HeaderMap::new();
    if private {
        if let Some(token) = token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(UPSTREAM_AUTH_HEADER, value);
            }
        }
    }

    let response = client
        .get(url)
        .headers(headers)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                GradioError::Timeout {
                    context: format!("schema for {space}"),
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                GradioError::Http {
                    context: format!("schema for {space}"),
                    source: e,
                }
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GradioError::Schema {
            space: space.to_string(),
            status: status.as_u16(),
            body: GradioError::clip_body(&body),
        });
    }

    let payload: Value = response.json().await.map_err(|e| GradioError::Http {
        context: format!("schema for {space}"),
        source: e,
    })?;

    parse_schema_payload(space, payload)
}

/// Normalize either schema form into descriptors.
pub fn parse_schema_payload(
    space: &SpaceId,
    payload: Value,
) -> Result<Vec<ToolDescriptor>, GradioError> {
    let mut tools = match payload {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| {
                let obj = item.as_object()?;
                let name = obj.get("name")?.as_str()?.to_string();
                let description = obj
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let input_schema = obj
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
                Some(ToolDescriptor {
                    name,
                    description,
                    input_schema: project_input_schema(&input_schema),
                })
            })
            .collect::<Vec<_>>(),
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(name, schema)| {
                schema.as_object()?;
                let description = schema
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some(ToolDescriptor {
                    name,
                    description,
                    input_schema: project_input_schema(&schema),
                })
            })
            .collect::<Vec<_>>(),
        other => {
            return Err(GradioError::SchemaShape {
                space: space.to_string(),
                detail: format!("expected array or object, got {}", value_kind(&other)),
            })
        }
    };

    tools.retain(|t| !t.name.contains(LAMBDA_MARKER));
    Ok(tools)
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Best-effort projection of an upstream input schema onto the shape the
/// gateway supports: primitives, enums, arrays of primitives, shallow
/// objects, and FileData wrappers.
///
/// Defaults survive only on optional fields; a default on a required field
/// is contradictory and is dropped.
pub fn project_input_schema(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return json!({"type": "object", "properties": {}});
    };

    let required: Vec<String> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut properties = Map::new();
    if let Some(props) = obj.get("properties").and_then(Value::as_object) {
        for (name, prop) in props {
            let is_required = required.iter().any(|r| r == name);
            properties.insert(name.clone(), project_property(prop, is_required));
        }
    }

    let mut out = Map::new();
    out.insert("type".to_string(), json!("object"));
    out.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        out.insert("required".to_string(), json!(required));
    }
    Value::Object(out)
}

fn project_property(prop: &Value, is_required: bool) -> Value {
    let Some(obj) = prop.as_object() else {
        return json!({"type": "string"});
    };

    if is_file_data(obj) {
        return file_data_schema(obj.get("description").and_then(Value::as_str));
    }

    let mut out = Map::new();
    for key in ["type", "description", "title", "enum", "format"] {
        if let Some(v) = obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    if !is_required {
        if let Some(default) = obj.get("default") {
            out.insert("default".to_string(), default.clone());
        }
    }

    match obj.get("type").and_then(Value::as_str) {
        Some("array") => {
            // Arrays keep their item type but only one level deep.
            let items = obj
                .get("items")
                .and_then(Value::as_object)
                .map(|items| {
                    if is_file_data(items) {
                        file_data_schema(None)
                    } else {
                        let mut inner = Map::new();
                        for key in ["type", "enum", "description"] {
                            if let Some(v) = items.get(key) {
                                inner.insert(key.to_string(), v.clone());
                            }
                        }
                        Value::Object(inner)
                    }
                })
                .unwrap_or_else(|| json!({"type": "string"}));
            out.insert("items".to_string(), items);
        }
        Some("object") => {
            // Shallow objects: one level of properties, primitives only.
            if let Some(props) = obj.get("properties").and_then(Value::as_object) {
                let mut shallow = Map::new();
                for (name, p) in props {
                    let mut inner = Map::new();
                    if let Some(obj) = p.as_object() {
                        for key in ["type", "enum", "description"] {
                            if let Some(v) = obj.get(key) {
                                inner.insert(key.to_string(), v.clone());
                            }
                        }
                    }
                    shallow.insert(name.clone(), Value::Object(inner));
                }
                out.insert("properties".to_string(), Value::Object(shallow));
            }
        }
        _ => {}
    }

    if out.is_empty() {
        return json!({"type": "string"});
    }
    Value::Object(out)
}

/// Detect a Gradio FileData wrapper: either announced by title, or shaped
/// like one (an object schema exposing `path` and `url`).
fn is_file_data(obj: &Map<String, Value>) -> bool {
    if let Some(title) = obj.get("title").and_then(Value::as_str) {
        if title.contains("FileData") {
            return true;
        }
    }
    obj.get("properties")
        .and_then(Value::as_object)
        .is_some_and(|props| props.contains_key("path") && props.contains_key("url"))
}

/// The canonical FileData projection: representable as a URL string plus
/// optional file attributes.
fn file_data_schema(description: Option<&str>) -> Value {
    let mut out = Map::new();
    out.insert("type".to_string(), json!("object"));
    if let Some(description) = description {
        out.insert("description".to_string(), json!(description));
    }
    out.insert(
        "properties".to_string(),
        json!({
            "path": {"type": "string", "description": "Path or URL of the file"},
            "url": {"type": "string"},
            "size": {"type": "number"},
            "orig_name": {"type": "string"},
            "mime_type": {"type": "string"}
        }),
    );
    out.insert("required".to_string(), json!(["path"]));
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn space() -> SpaceId {
        SpaceId::parse("acme/foo").unwrap()
    }

    #[test]
    fn parses_array_form() {
        let payload = json!([
            {"name": "infer", "description": "Run inference", "inputSchema": {
                "type": "object",
                "properties": {"prompt": {"type": "string"}},
                "required": ["prompt"]
            }},
            {"name": "status", "inputSchema": {"type": "object", "properties": {}}}
        ]);
        let tools = parse_schema_payload(&space(), payload).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "infer");
        assert_eq!(tools[0].description.as_deref(), Some("Run inference"));
        assert_eq!(tools[1].name, "status");
        assert!(tools[1].description.is_none());
    }

    #[test]
    fn parses_object_form_with_description_on_schema() {
        let payload = json!({
            "transcribe": {
                "type": "object",
                "description": "Transcribe audio",
                "properties": {"audio": {"type": "string"}}
            }
        });
        let tools = parse_schema_payload(&space(), payload).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "transcribe");
        assert_eq!(tools[0].description.as_deref(), Some("Transcribe audio"));
    }

    #[test]
    fn filters_lambda_artifacts() {
        let payload = json!([
            {"name": "real_tool", "inputSchema": {"type": "object", "properties": {}}},
            {"name": "<lambda>", "inputSchema": {"type": "object", "properties": {}}},
            {"name": "wrapped_<lambda>_fn", "inputSchema": {"type": "object", "properties": {}}}
        ]);
        let tools = parse_schema_payload(&space(), payload).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "real_tool");
    }

    #[test]
    fn rejects_scalar_payloads() {
        let err = parse_schema_payload(&space(), json!("nope")).unwrap_err();
        assert!(matches!(err, GradioError::SchemaShape { .. }));
    }

    #[test]
    fn projection_preserves_enums_and_drops_required_defaults() {
        let projected = project_input_schema(&json!({
            "type": "object",
            "properties": {
                "mode": {"type": "string", "enum": ["fast", "slow"], "default": "fast"},
                "count": {"type": "integer", "default": 3}
            },
            "required": ["mode"]
        }));
        // `mode` is required: its default is contradictory and dropped.
        assert_eq!(projected["properties"]["mode"]["enum"], json!(["fast", "slow"]));
        assert!(projected["properties"]["mode"].get("default").is_none());
        // `count` is optional: its default survives.
        assert_eq!(projected["properties"]["count"]["default"], json!(3));
        assert_eq!(projected["required"], json!(["mode"]));
    }

    #[test]
    fn projection_rewrites_file_data() {
        let projected = project_input_schema(&json!({
            "type": "object",
            "properties": {
                "image": {
                    "type": "object",
                    "title": "FileData",
                    "properties": {"path": {"type": "string"}, "url": {"type": "string"}}
                }
            }
        }));
        let image = &projected["properties"]["image"];
        assert_eq!(image["required"], json!(["path"]));
        for field in ["path", "url", "size", "orig_name", "mime_type"] {
            assert!(image["properties"].get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn projection_detects_file_data_by_shape() {
        let projected = project_input_schema(&json!({
            "type": "object",
            "properties": {
                "file": {
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "url": {"type": "string"},
                        "size": {"type": "integer"}
                    }
                }
            }
        }));
        assert_eq!(projected["properties"]["file"]["required"], json!(["path"]));
    }

    #[test]
    fn projection_keeps_arrays_of_primitives_shallow() {
        let projected = project_input_schema(&json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string", "minLength": 1}}
            }
        }));
        assert_eq!(
            projected["properties"]["tags"]["items"],
            json!({"type": "string"})
        );
    }

    #[test]
    fn projection_tolerates_garbage() {
        assert_eq!(
            project_input_schema(&json!(null)),
            json!({"type": "object", "properties": {}})
        );
        assert_eq!(
            project_input_schema(&json!({"properties": {"x": 7}}))["properties"]["x"],
            json!({"type": "string"})
        );
    }

    #[test]
    fn host_urls() {
        let host = SpaceHost::Subdomain;
        assert_eq!(
            host.schema_url("acme-foo").unwrap().as_str(),
            "https://acme-foo.hf.space/gradio_api/mcp/schema"
        );
        let rooted = SpaceHost::Rooted(Url::parse("http://127.0.0.1:9000/spaces").unwrap());
        assert_eq!(
            rooted.sse_url("acme-foo").unwrap().as_str(),
            "http://127.0.0.1:9000/spaces/acme-foo/gradio_api/mcp/sse"
        );
    }
}
