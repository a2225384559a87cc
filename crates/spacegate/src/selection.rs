//! Tool-selection strategy.
//!
//! Precedence, first match wins:
//!
//! 1. **Bouquet override** — `x-mcp-bouquet` naming a known preset returns
//!    that preset verbatim, ignoring user settings.
//! 2. **Mix** — `x-mcp-mix` naming a known preset, with settings
//!    available: user tools first, preset tools appended, deduplicated.
//! 3. **User settings** — their `builtInTools`.
//! 4. **Fallback** — every known built-in tool.
//!
//! Unknown preset names fall through silently. The Gradio endpoint overlay
//! is orthogonal: an explicit `x-mcp-gradio` list is always honored
//! (`none` disables everything), and settings-provided endpoints are
//! skipped while a non-`all` bouquet is overriding.

use spacegate_gradio::SpaceId;

use crate::config::GatewayConfig;
use crate::settings::{SettingsSource, UserSettings};

/// Marker id (not a tool): `hub_inspect` exposes its `include_readme`
/// input field only when this id is in the selection.
pub const README_MARKER: &str = "hub_inspect_readme";

/// The closed set of built-in tool ids.
pub const BUILT_IN_TOOLS: &[&str] = &[
    "hf_whoami",
    "space_search",
    "model_search",
    "model_detail",
    "paper_search",
    "dataset_search",
    "dataset_detail",
    "hub_inspect",
    "hf_doc_search",
    "hf_doc_fetch",
    "hf_jobs",
    "dynamic_space",
    "use_space",
];

/// A named preset of built-in tools.
#[derive(Debug, Clone, Copy)]
pub struct Bouquet {
    /// Preset name as used in headers.
    pub name: &'static str,
    /// Tool ids, in presentation order.
    pub tools: &'static [&'static str],
}

/// The closed set of presets. `exercise_*` entries exist for integration
/// tests and are harmless in production.
pub const BOUQUETS: &[Bouquet] = &[
    Bouquet {
        name: "search",
        tools: &[
            "space_search",
            "model_search",
            "paper_search",
            "dataset_search",
            "hf_doc_search",
        ],
    },
    Bouquet {
        name: "docs",
        tools: &["hf_doc_search", "hf_doc_fetch"],
    },
    Bouquet {
        name: "spaces",
        tools: &["space_search", "use_space", "dynamic_space"],
    },
    Bouquet {
        name: "hf_api",
        tools: &[
            "hf_whoami",
            "model_search",
            "model_detail",
            "dataset_search",
            "dataset_detail",
            "paper_search",
            "hub_inspect",
        ],
    },
    Bouquet {
        name: "jobs",
        tools: &["hf_jobs", "hf_whoami"],
    },
    Bouquet {
        name: "all",
        tools: BUILT_IN_TOOLS,
    },
    Bouquet {
        name: "exercise_minimal",
        tools: &["hf_whoami"],
    },
    Bouquet {
        name: "exercise_readme",
        tools: &["hub_inspect", README_MARKER],
    },
];

/// Look up a preset by name.
pub fn bouquet(name: &str) -> Option<&'static Bouquet> {
    BOUQUETS.iter().find(|b| b.name == name)
}

/// How the enabled tool set was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// A bouquet header overrode everything.
    BouquetOverride,
    /// User settings mixed with a preset.
    Mix,
    /// Settings from the external settings API.
    ExternalApi,
    /// Settings supplied locally.
    InternalApi,
    /// No inputs: every built-in tool.
    Fallback,
}

/// Inputs to the strategy, extracted from one request.
#[derive(Debug, Clone, Default)]
pub struct SelectionInput<'a> {
    /// `x-mcp-bouquet` header.
    pub bouquet: Option<&'a str>,
    /// `x-mcp-mix` header.
    pub mix: Option<&'a str>,
    /// `x-mcp-gradio` header, unparsed.
    pub gradio: Option<&'a str>,
    /// The caller's settings, when available.
    pub settings: Option<&'a UserSettings>,
}

/// The strategy's output.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionResult {
    /// How the set was decided.
    pub mode: SelectionMode,
    /// Enabled built-in tool ids (may include marker ids).
    pub enabled_tool_ids: Vec<String>,
    /// Human-readable reason for observability.
    pub reason: String,
    /// The preset a mix merged in, when mode is `Mix`.
    pub mixed_bouquet: Option<String>,
    /// Gradio endpoints to attach, after the overlay rules.
    pub gradio_spaces: Vec<SpaceId>,
}

/// Run the strategy.
pub fn select_tools(input: &SelectionInput<'_>, config: &GatewayConfig) -> SelectionResult {
    let (mode, mut enabled, reason, mixed) = decide_tools(input);
    let gradio_spaces = gradio_overlay(input);

    if config.search_enables_fetch
        && enabled.iter().any(|t| t == "hf_doc_search")
        && !enabled.iter().any(|t| t == "hf_doc_fetch")
    {
        enabled.push("hf_doc_fetch".to_string());
    }

    SelectionResult {
        mode,
        enabled_tool_ids: enabled,
        reason,
        mixed_bouquet: mixed,
        gradio_spaces,
    }
}

fn decide_tools(
    input: &SelectionInput<'_>,
) -> (SelectionMode, Vec<String>, String, Option<String>) {
    if let Some(preset) = input.bouquet.and_then(bouquet) {
        return (
            SelectionMode::BouquetOverride,
            preset.tools.iter().map(|t| t.to_string()).collect(),
            format!("bouquet '{}' overrides settings", preset.name),
            None,
        );
    }

    if let (Some(preset), Some(settings)) = (input.mix.and_then(bouquet), input.settings) {
        let mut merged: Vec<String> = settings.built_in_tools.clone();
        for tool in preset.tools {
            if !merged.iter().any(|t| t == tool) {
                merged.push(tool.to_string());
            }
        }
        return (
            SelectionMode::Mix,
            merged,
            format!("user settings mixed with '{}'", preset.name),
            Some(preset.name.to_string()),
        );
    }

    if let Some(settings) = input.settings {
        let mode = match settings.source {
            SettingsSource::External => SelectionMode::ExternalApi,
            SettingsSource::Internal => SelectionMode::InternalApi,
        };
        return (
            mode,
            settings.built_in_tools.clone(),
            "user settings".to_string(),
            None,
        );
    }

    (
        SelectionMode::Fallback,
        BUILT_IN_TOOLS.iter().map(|t| t.to_string()).collect(),
        "no settings available, enabling all built-in tools".to_string(),
        None,
    )
}

/// The Gradio endpoint overlay, orthogonal to tool selection.
///
/// Explicitly listed endpoints are always included; `none` disables
/// everything, including settings-provided endpoints. Settings endpoints
/// merge in (deduplicated by space name) unless a non-`all` bouquet is
/// overriding, which keeps the override truly exclusive.
fn gradio_overlay(input: &SelectionInput<'_>) -> Vec<SpaceId> {
    let mut endpoints: Vec<SpaceId> = Vec::new();

    if let Some(raw) = input.gradio {
        match SpaceId::parse_list(raw) {
            None => return Vec::new(),
            Some(list) => endpoints.extend(list),
        }
    }

    let bouquet_excludes_settings = input
        .bouquet
        .and_then(bouquet)
        .is_some_and(|preset| preset.name != "all");

    if !bouquet_excludes_settings {
        if let Some(settings) = input.settings {
            for raw in &settings.gradio_spaces {
                match SpaceId::parse(raw) {
                    Ok(id) if !endpoints.contains(&id) => endpoints.push(id),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(entry = raw.as_str(), error = %e, "skipping configured space");
                    }
                }
            }
        }
    }

    endpoints
}
