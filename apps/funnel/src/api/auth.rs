//! # Authentication Module
//!
//! Optional bearer-key protection for the HTTP API.
//!
//! When an API key is configured (`FUNNEL_API_KEY` or `api.api_key`), every
//! route except `/health` requires:
//! ```text
//! Authorization: Bearer <your-api-key>
//! ```

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// The configured API key.
#[derive(Clone)]
pub struct ApiKey(Arc<str>);

impl ApiKey {
    /// `None` for an absent or empty key (authentication disabled).
    #[must_use]
    pub fn from_config(key: Option<&str>) -> Option<Self> {
        key.map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| Self(Arc::from(k)))
    }

    /// Constant-time comparison; runs over the longer of the two keys so the
    /// timing does not reveal the expected length.
    #[must_use]
    pub fn matches(&self, provided: &str) -> bool {
        let expected = self.0.as_bytes();
        let provided = provided.as_bytes();
        let len = expected.len().max(provided.len());

        let pad = |bytes: &[u8]| {
            let mut v = bytes.to_vec();
            v.resize(len, 0);
            v
        };
        let same_bytes = pad(provided).ct_eq(&pad(expected));
        let same_len = (provided.len() as u64).ct_eq(&(expected.len() as u64));
        (same_bytes & same_len).into()
    }
}

/// Reject requests without the configured bearer key. `/health` is open.
pub async fn require_api_key(
    State(key): State<ApiKey>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v));

    match provided {
        Some(candidate) if key.matches(candidate) => next.run(request).await,
        Some(_) => {
            tracing::warn!(
                event = "auth_failure",
                reason = "invalid_api_key",
                "Authentication failed: invalid API key"
            );
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
        None => {
            tracing::warn!(
                event = "auth_failure",
                reason = "missing_authorization_header",
                "Missing Authorization header"
            );
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_disables_auth() {
        assert!(ApiKey::from_config(None).is_none());
        assert!(ApiKey::from_config(Some("  ")).is_none());
    }

    #[test]
    fn matches_only_the_exact_key() {
        let Some(key) = ApiKey::from_config(Some("s3cret")) else {
            unreachable!("non-empty key");
        };
        assert!(key.matches("s3cret"));
        assert!(!key.matches("s3cre"));
        assert!(!key.matches("s3cret2"));
        assert!(!key.matches(""));
    }
}
