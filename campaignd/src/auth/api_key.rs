//! Bearer API key extractor.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use sha2::{Digest, Sha256};
use tracing::{instrument, trace};

use crate::{
    AppState,
    errors::{Error, Result},
};

/// A request authenticated with one of the configured API keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCaller {
    /// Short, non-reversible identifier of the key used, safe to log
    pub key_id: String,
}

impl ApiCaller {
    fn for_key(key: &str) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        Self {
            key_id: hex::encode(&digest[..4]),
        }
    }
}

/// Compare two keys without short-circuiting on the first differing byte.
///
/// Both sides are hashed first so the comparison length never depends on the secret.
fn keys_match(candidate: &str, configured: &str) -> bool {
    let a = Sha256::digest(candidate.as_bytes());
    let b = Sha256::digest(configured.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn bearer_token(parts: &Parts) -> Result<&str> {
    let header = parts.headers.get(AUTHORIZATION).ok_or(Error::Unauthenticated { message: None })?;

    let value = header.to_str().map_err(|e| Error::BadRequest {
        message: format!("Invalid authorization header: {e}"),
    })?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| Error::Unauthenticated {
            message: Some("Expected 'Authorization: Bearer <key>'".to_string()),
        })
}

impl FromRequestParts<AppState> for ApiCaller {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = bearer_token(parts)?;

        // Check every configured key so timing does not reveal which one matched
        let matched = state
            .config
            .auth
            .api_keys
            .iter()
            .fold(false, |found, key| keys_match(token, key) | found);

        if !matched {
            return Err(Error::Unauthenticated {
                message: Some("Invalid API key".to_string()),
            });
        }

        let caller = ApiCaller::for_key(token);
        trace!(key_id = %caller.key_id, "Authenticated API caller");
        Ok(caller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_config, create_test_state};
    use axum::http::Request;

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("http://localhost/api/v1/contacts");
        if let Some(value) = value {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_keys_match() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secret", "secreT"));
        assert!(!keys_match("secret", "secret-longer"));
        assert!(!keys_match("", "secret"));
    }

    #[test]
    fn test_key_id_is_stable_and_short() {
        let a = ApiCaller::for_key("test-key");
        assert_eq!(a, ApiCaller::for_key("test-key"));
        assert_eq!(a.key_id.len(), 8);
        assert_ne!(a, ApiCaller::for_key("other-key"));
    }

    #[tokio::test]
    async fn test_valid_key_accepted() {
        let state = create_test_state(create_test_config());
        let mut parts = parts_with_auth(Some("Bearer test-key"));

        let caller = ApiCaller::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(caller, ApiCaller::for_key("test-key"));
    }

    #[tokio::test]
    async fn test_rejections() {
        let state = create_test_state(create_test_config());

        for header in [None, Some("Bearer wrong-key"), Some("Basic dGVzdDp0ZXN0"), Some("Bearer ")] {
            let mut parts = parts_with_auth(header);
            let err = ApiCaller::from_request_parts(&mut parts, &state).await.unwrap_err();
            assert!(matches!(err, Error::Unauthenticated { .. }), "{header:?} should be rejected, got {err:?}");
        }
    }
}
