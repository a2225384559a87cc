//! The authorization gate.
//!
//! Every transport runs the gate before per-request work. The rules:
//!
//! - no token: anonymous, unless the caller sent `x-mcp-force-auth`, which
//!   turns anonymity into a 401;
//! - token validates: the request is authenticated as that identity;
//! - validator says 401: reject with 401 and an `OAuth-Protected-Resource`
//!   hint header;
//! - validator unreachable or erroring: continue unauthenticated — a
//!   network failure is not an auth failure.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use spacegate_server::AuthState;

use crate::FORCE_AUTH_HEADER;

/// Name of the hint header attached to 401 responses.
pub const PROTECTED_RESOURCE_HEADER: &str = "OAuth-Protected-Resource";

/// Outcome of validating one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The token validated.
    Valid {
        /// Identity of the caller.
        username: String,
    },
    /// The validator rejected the token.
    Invalid,
    /// The validator could not be reached or failed unexpectedly.
    Unavailable,
}

/// Validates bearer tokens against the Hub's identity endpoint.
///
/// The endpoint is opaque to the gateway: `validate(token)` yields an
/// identity or a rejection, nothing else is interpreted.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    client: reqwest::Client,
    whoami_url: Url,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct WhoamiResponse {
    name: String,
}

impl TokenValidator {
    /// Validator against `{hub}/api/whoami-v2`.
    pub fn new(client: reqwest::Client, hub_base: &Url, timeout: Duration) -> Self {
        let mut whoami_url = hub_base.clone();
        if let Ok(mut segments) = whoami_url.path_segments_mut() {
            segments.pop_if_empty().extend(["api", "whoami-v2"]);
        }
        Self {
            client,
            whoami_url,
            timeout,
        }
    }

    /// Validate one token.
    pub async fn validate(&self, token: &str) -> AuthOutcome {
        let response = self
            .client
            .get(self.whoami_url.clone())
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "token validator unreachable");
                return AuthOutcome::Unavailable;
            }
        };

        match response.status().as_u16() {
            200 => match response.json::<WhoamiResponse>().await {
                Ok(body) => AuthOutcome::Valid {
                    username: body.name,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "whoami response unparseable");
                    AuthOutcome::Unavailable
                }
            },
            401 => AuthOutcome::Invalid,
            status => {
                tracing::warn!(status, "unexpected whoami status");
                AuthOutcome::Unavailable
            }
        }
    }
}

/// The gate's verdict for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateResult {
    /// Proceed with the given auth state and the token as presented.
    Proceed {
        /// Authorization outcome for the request context.
        auth: AuthState,
        /// Raw bearer token, for forwarding to private Spaces.
        token: Option<String>,
    },
    /// Reject with 401.
    Reject {
        /// Whether to attach the `OAuth-Protected-Resource` hint (the token
        /// was present but invalid, rather than merely missing).
        oauth_hint: bool,
    },
}

/// The gate itself: a validator plus the resource URL advertised in hints.
#[derive(Debug, Clone)]
pub struct AuthGate {
    validator: TokenValidator,
    resource_url: String,
}

impl AuthGate {
    /// Build the gate.
    pub fn new(validator: TokenValidator, resource_url: impl Into<String>) -> Self {
        Self {
            validator,
            resource_url: resource_url.into(),
        }
    }

    /// Value of the hint header for 401 responses.
    pub fn resource_hint(&self) -> &str {
        &self.resource_url
    }

    /// Run the gate for one request's headers.
    pub async fn check(&self, headers: &HashMap<String, String>) -> GateResult {
        let token = bearer_token(headers);
        let force_auth = headers.contains_key(FORCE_AUTH_HEADER);

        let Some(token) = token else {
            if force_auth {
                return GateResult::Reject { oauth_hint: false };
            }
            return GateResult::Proceed {
                auth: AuthState::Anonymous,
                token: None,
            };
        };

        match self.validator.validate(&token).await {
            AuthOutcome::Valid { username } => GateResult::Proceed {
                auth: AuthState::Authenticated { username },
                token: Some(token),
            },
            AuthOutcome::Invalid => GateResult::Reject { oauth_hint: true },
            // Do not conflate network errors with auth failures.
            AuthOutcome::Unavailable => GateResult::Proceed {
                auth: AuthState::Anonymous,
                token: Some(token),
            },
        }
    }
}

/// Extract the bearer token from normalized headers.
pub fn bearer_token(headers: &HashMap<String, String>) -> Option<String> {
    let value = headers.get("authorization")?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
