//! Shared-secret authentication for the WebSocket endpoint.
//!
//! When a token is configured, a client must present it either as the
//! `token` query parameter or as `Authorization: Bearer <token>`.

use axum::http::{header, HeaderMap};
use tracing::info;

/// The server's shared secret.
#[derive(Clone, Default)]
pub struct SharedSecret {
    token: Option<String>,
}

impl SharedSecret {
    /// Create a secret. `None` or an empty token disables authentication.
    #[must_use]
    pub fn new(token: Option<&str>) -> Self {
        let token = token.filter(|t| !t.is_empty()).map(str::to_string);
        if token.is_some() {
            info!("Authentication enabled");
        } else {
            info!("Authentication disabled (no auth_token set)");
        }
        Self { token }
    }

    /// Whether a token is required.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Check a request's credentials.
    #[must_use]
    pub fn verify(&self, query_token: Option<&str>, headers: &HeaderMap) -> bool {
        let Some(expected) = self.token.as_deref() else {
            return true;
        };

        if query_token.is_some_and(|token| constant_time_eq(token, expected)) {
            return true;
        }

        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| constant_time_eq(token, expected))
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0, |d, (x, y)| d | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_disabled_accepts_everything() {
        for secret in [SharedSecret::new(None), SharedSecret::new(Some(""))] {
            assert!(!secret.is_enabled());
            assert!(secret.verify(None, &HeaderMap::new()));
            assert!(secret.verify(Some("anything"), &HeaderMap::new()));
        }
    }

    #[test]
    fn test_query_token() {
        let secret = SharedSecret::new(Some("s3cret"));
        assert!(secret.verify(Some("s3cret"), &HeaderMap::new()));
        assert!(!secret.verify(Some("wrong"), &HeaderMap::new()));
        assert!(!secret.verify(Some(""), &HeaderMap::new()));
        assert!(!secret.verify(None, &HeaderMap::new()));
    }

    #[test]
    fn test_bearer_header() {
        let secret = SharedSecret::new(Some("s3cret"));
        assert!(secret.verify(None, &bearer("s3cret")));
        assert!(!secret.verify(None, &bearer("s3cre")));

        let mut basic = HeaderMap::new();
        basic.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic s3cret"),
        );
        assert!(!secret.verify(None, &basic));
    }

    #[test]
    fn test_debug_hides_token() {
        let secret = SharedSecret::new(Some("s3cret"));
        assert!(!format!("{secret:?}").contains("s3cret"));
    }
}
