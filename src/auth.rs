// ============================================================================
// BEARER TOKEN VERIFICATION
// ============================================================================
//
// The identity provider is external. Whatever sits in front of it hands us an
// HS256-signed JWT whose `sub` is the verified identity subject; everything
// past this module only ever sees a `VerifiedIdentity`.
//
// ============================================================================

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::model::ProfileHints;

/// JWT payload. `email` / `name` are optional profile hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Output of a successful verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub hints: ProfileHints,
}

pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> CoreResult<VerifiedIdentity>;
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, issuer: Option<&str>, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> CoreResult<VerifiedIdentity> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            warn!("JWT verification failed: {}", e);
            CoreError::Unauthenticated(format!("invalid token: {}", e))
        })?;
        let claims = data.claims;
        Ok(VerifiedIdentity {
            subject: claims.sub,
            hints: ProfileHints {
                display_name: claims.name,
                email: claims.email,
            },
        })
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> CoreResult<&str> {
    let header = headers
        .get("Authorization")
        .ok_or_else(|| CoreError::Unauthenticated("missing Authorization header".into()))?
        .to_str()
        .map_err(|_| CoreError::Unauthenticated("invalid Authorization header".into()))?;

    match header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(CoreError::Unauthenticated("invalid Bearer token format".into())),
    }
}

/// Header extraction plus verification.
pub fn authenticate(verifier: &dyn IdentityVerifier, headers: &HeaderMap) -> CoreResult<VerifiedIdentity> {
    let token = bearer_token(headers)?;
    verifier.verify(token)
}
