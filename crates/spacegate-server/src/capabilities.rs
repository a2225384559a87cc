//! Capability assembly for scoped servers.
//!
//! Capabilities are declared only for surfaces the instance actually
//! serves. `tools.listChanged` is always advertised (Space discovery can
//! change the tool surface between lists); prompts and resources only when
//! the instance registered any. MCP SDKs tend to auto-advertise a
//! `completions` capability; the gateway's capability type simply has no
//! such field, which is the strip.

use spacegate_protocol::types::{ListChangedCapability, ServerCapabilities};

/// Build the capability set for a scoped server.
pub fn build(has_prompts: bool, has_resources: bool) -> ServerCapabilities {
    ServerCapabilities {
        tools: Some(ListChangedCapability {
            list_changed: Some(true),
        }),
        prompts: has_prompts.then(|| ListChangedCapability {
            list_changed: Some(false),
        }),
        resources: has_resources.then(|| ListChangedCapability {
            list_changed: Some(false),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_capability_is_always_present() {
        let caps = build(false, false);
        assert!(caps.tools.is_some());
        assert!(caps.prompts.is_none());
        assert!(caps.resources.is_none());
    }

    #[test]
    fn optional_surfaces_appear_when_served() {
        let caps = build(true, true);
        assert!(caps.prompts.is_some());
        assert!(caps.resources.is_some());
    }

    #[test]
    fn no_completions_capability_exists_on_the_wire() {
        let caps = serde_json::to_value(build(true, true)).unwrap();
        assert!(caps.get("completions").is_none());
    }
}
