//! Admin authorization guard.
//!
//! Identity lives with the external auth collaborator; this core only checks
//! a bearer credential against the `AdminVerifier` seam. Every admin handler
//! calls `require_admin` first, nothing is authorized implicitly.

use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use base64ct::{Base64, Encoding};
use sha2::{Digest, Sha256};
use tracing::warn;

/// Caller context attached after a successful bearer check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminIdentity {
    pub subject: String,
}

/// Seam to the external auth collaborator.
pub trait AdminVerifier: Send + Sync {
    fn verify_token(&self, token: &str) -> Option<AdminIdentity>;
}

/// Single configured bearer token, compared by SHA-256 digest so the
/// comparison is fixed-width regardless of token length.
pub struct StaticTokenVerifier {
    token_digest: String,
}

impl StaticTokenVerifier {
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self {
            token_digest: digest(token),
        }
    }
}

impl AdminVerifier for StaticTokenVerifier {
    fn verify_token(&self, token: &str) -> Option<AdminIdentity> {
        if digest(token) == self.token_digest {
            Some(AdminIdentity {
                subject: "admin".to_string(),
            })
        } else {
            None
        }
    }
}

/// Default when no admin token is configured: every admin call is rejected.
pub struct DenyAllVerifier;

impl AdminVerifier for DenyAllVerifier {
    fn verify_token(&self, _token: &str) -> Option<AdminIdentity> {
        None
    }
}

/// Resolve the bearer token into an admin identity, or return 401.
///
/// # Errors
/// `UNAUTHORIZED` when the header is missing, malformed, or rejected.
pub fn require_admin(
    headers: &HeaderMap,
    verifier: &dyn AdminVerifier,
) -> Result<AdminIdentity, StatusCode> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    verifier.verify_token(token).ok_or_else(|| {
        warn!("Rejected admin request with an invalid bearer token");
        StatusCode::UNAUTHORIZED
    })
}

fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    Base64::encode_string(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
        );
        headers
    }

    #[test]
    fn accepts_configured_token() {
        let verifier = StaticTokenVerifier::new("sekreta");
        let identity = require_admin(&bearer("sekreta"), &verifier).expect("must authorize");
        assert_eq!(identity.subject, "admin");
    }

    #[test]
    fn rejects_wrong_token() {
        let verifier = StaticTokenVerifier::new("sekreta");
        assert_eq!(
            require_admin(&bearer("other"), &verifier),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn rejects_missing_and_malformed_header() {
        let verifier = StaticTokenVerifier::new("sekreta");
        assert_eq!(
            require_admin(&HeaderMap::new(), &verifier),
            Err(StatusCode::UNAUTHORIZED)
        );

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic sekreta"));
        assert_eq!(
            require_admin(&headers, &verifier),
            Err(StatusCode::UNAUTHORIZED)
        );

        assert_eq!(
            require_admin(&bearer(""), &verifier),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn deny_all_rejects_everything() {
        assert_eq!(
            require_admin(&bearer("anything"), &DenyAllVerifier),
            Err(StatusCode::UNAUTHORIZED)
        );
    }
}
