//! Error types for Space discovery and proxying.

use thiserror::Error;

/// Maximum number of upstream body characters echoed into error messages.
///
/// Upstream responses can contain secrets or megabytes of HTML; errors keep
/// only a prefix.
pub const ERROR_BODY_LIMIT: usize = 500;

/// Errors from the Gradio subsystem.
#[derive(Debug, Error)]
pub enum GradioError {
    /// A Space identifier failed to parse.
    #[error("invalid space identifier '{0}': expected owner/name")]
    InvalidSpaceId(String),

    /// The Hub returned a non-success status for a metadata fetch.
    #[error("hub returned {status} for space {space}: {body}")]
    Hub {
        /// Space being fetched.
        space: String,
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// A schema endpoint returned a non-success status.
    #[error("schema fetch for {space} returned {status}: {body}")]
    Schema {
        /// Space being fetched.
        space: String,
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// An outbound request failed at the HTTP layer.
    #[error("request to {context} failed: {source}")]
    Http {
        /// What was being reached.
        context: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// An outbound call exceeded its deadline.
    #[error("{context} timed out after {timeout_ms}ms")]
    Timeout {
        /// What was being reached.
        context: String,
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// The caller's request was cancelled while an upstream call was in
    /// flight. Not a failure: metrics must not count it as one.
    #[error("upstream call cancelled by caller")]
    Cancelled,

    /// An upstream payload did not match either known schema shape.
    #[error("unparseable schema from {space}: {detail}")]
    SchemaShape {
        /// Space whose schema was rejected.
        space: String,
        /// What was wrong.
        detail: String,
    },

    /// The upstream MCP session misbehaved (missing endpoint event, bad
    /// response correlation, closed stream).
    #[error("upstream session for {space}: {detail}")]
    Upstream {
        /// Space being called.
        space: String,
        /// What went wrong.
        detail: String,
    },

    /// The upstream tool call returned a JSON-RPC error.
    #[error("upstream tool error {code}: {message}")]
    UpstreamRpc {
        /// JSON-RPC error code from the Space.
        code: i32,
        /// Error message from the Space.
        message: String,
    },
}

impl GradioError {
    /// Truncate an upstream body for inclusion in an error message.
    pub fn clip_body(body: &str) -> String {
        if body.len() <= ERROR_BODY_LIMIT {
            body.to_string()
        } else {
            let mut end = ERROR_BODY_LIMIT;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}…", &body[..end])
        }
    }

    /// Whether this error represents caller-initiated cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_body_keeps_short_bodies() {
        assert_eq!(GradioError::clip_body("ok"), "ok");
    }

    #[test]
    fn clip_body_truncates_long_bodies() {
        let long = "x".repeat(2000);
        let clipped = GradioError::clip_body(&long);
        assert!(clipped.chars().count() <= ERROR_BODY_LIMIT + 1);
        assert!(clipped.ends_with('…'));
    }

    #[test]
    fn clip_body_respects_char_boundaries() {
        let long = "é".repeat(400);
        let clipped = GradioError::clip_body(&long);
        assert!(clipped.ends_with('…'));
    }
}
