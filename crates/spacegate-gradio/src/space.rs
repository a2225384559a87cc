//! Space identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GradioError;

/// Sentinel value that disables all Gradio endpoints when it appears in a
/// space list.
pub const DISABLE_SENTINEL: &str = "none";

/// A Space identifier of the form `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(String);

impl SpaceId {
    /// Parse a single `owner/name` token.
    ///
    /// Exactly one `/` with non-empty sides is required. Surrounding
    /// whitespace is tolerated.
    pub fn parse(raw: &str) -> Result<Self, GradioError> {
        let trimmed = raw.trim();
        let mut parts = trimmed.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
                Ok(Self(format!("{owner}/{name}")))
            }
            _ => Err(GradioError::InvalidSpaceId(raw.to_string())),
        }
    }

    /// Parse a comma-separated list of space identifiers.
    ///
    /// Returns `None` when the list contains the literal `none` sentinel
    /// (Gradio endpoints disabled outright). Invalid entries are logged and
    /// skipped; duplicates are dropped, first occurrence wins.
    pub fn parse_list(raw: &str) -> Option<Vec<Self>> {
        let mut out: Vec<Self> = Vec::new();
        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if token.eq_ignore_ascii_case(DISABLE_SENTINEL) {
                return None;
            }
            match Self::parse(token) {
                Ok(id) if !out.contains(&id) => out.push(id),
                Ok(_) => {}
                Err(e) => tracing::warn!(entry = token, error = %e, "skipping invalid space id"),
            }
        }
        Some(out)
    }

    /// The `owner/name` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The owner half.
    pub fn owner(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// The name half.
    pub fn name(&self) -> &str {
        self.0.split('/').nth(1).unwrap_or_default()
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_owner_name() {
        let id = SpaceId::parse("acme/foo").unwrap();
        assert_eq!(id.owner(), "acme");
        assert_eq!(id.name(), "foo");
        assert_eq!(id.as_str(), "acme/foo");
    }

    #[test]
    fn rejects_malformed_ids() {
        for raw in ["", "acme", "/foo", "acme/", "a/b/c", "/"] {
            assert!(SpaceId::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(SpaceId::parse("  acme/foo ").unwrap().as_str(), "acme/foo");
    }

    #[test]
    fn list_skips_invalid_entries() {
        let ids = SpaceId::parse_list("acme/foo, bogus ,b/y").unwrap();
        assert_eq!(
            ids,
            vec![
                SpaceId::parse("acme/foo").unwrap(),
                SpaceId::parse("b/y").unwrap()
            ]
        );
    }

    #[test]
    fn list_dedupes_preserving_first() {
        let ids = SpaceId::parse_list("a/x,b/y,a/x").unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].as_str(), "a/x");
    }

    #[test]
    fn none_sentinel_disables_everything() {
        assert!(SpaceId::parse_list("none").is_none());
        assert!(SpaceId::parse_list("acme/foo,none,b/y").is_none());
        assert!(SpaceId::parse_list("NONE").is_none());
    }

    #[test]
    fn empty_list_is_enabled_but_empty() {
        assert_eq!(SpaceId::parse_list("").unwrap(), vec![]);
        assert_eq!(SpaceId::parse_list(" , ").unwrap(), vec![]);
    }
}
