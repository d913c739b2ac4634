// SPDX-License-Identifier: AGPL-3.0-or-later

//! Admin authentication.
//!
//! Admin endpoints (key issuance, adjustments, ledger inspection) are
//! guarded by a single static bearer token from `ADMIN_TOKEN`. Operator
//! identity management lives upstream; only the capability check remains
//! here. Tokens are compared via SHA-256 digests so the comparison takes
//! constant time regardless of where the candidate diverges.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::AppState;

/// Verifier for the static admin bearer token.
pub struct AdminTokenVerifier {
    token_digest: [u8; 32],
}

impl AdminTokenVerifier {
    pub fn new(token: &str) -> Self {
        Self {
            token_digest: Sha256::digest(token.as_bytes()).into(),
        }
    }

    pub fn verify(&self, candidate: &str) -> bool {
        let candidate_digest: [u8; 32] = Sha256::digest(candidate.as_bytes()).into();
        candidate_digest == self.token_digest
    }
}

/// Extractor requiring a valid admin bearer token.
///
/// ```rust,ignore
/// async fn issue_key(AdminOnly(actor): AdminOnly, ...) -> ... { }
/// ```
///
/// The wrapped string is the actor label recorded in logs ("admin" for
/// the static token; per-operator identities are upstream's concern).
pub struct AdminOnly(pub String);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(verifier) = state.admin.as_ref() else {
            return Err(ApiError::service_unavailable(
                "admin API disabled: ADMIN_TOKEN is not configured",
            ));
        };

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::unauthorized("Authorization header is required"))?
            .to_str()
            .map_err(|_| ApiError::unauthorized("invalid Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("expected 'Bearer <token>'"))?;

        if !verifier.verify(token) {
            return Err(ApiError::forbidden("invalid admin token"));
        }

        Ok(AdminOnly("admin".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_accepts_only_the_exact_token() {
        let verifier = AdminTokenVerifier::new("s3cret-token");
        assert!(verifier.verify("s3cret-token"));
        assert!(!verifier.verify("s3cret-toke"));
        assert!(!verifier.verify("s3cret-token "));
        assert!(!verifier.verify(""));
    }
}
