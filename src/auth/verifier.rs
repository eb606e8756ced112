//! ID-token verification — signature, claims, and nonce binding.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Reject any algorithm outside the configured allow-list. The header's
//!    `alg` selects nothing on its own — it must already be allow-listed,
//!    which closes the classic algorithm-confusion hole. (`alg: none` never
//!    gets this far: it fails header parsing.)
//! 3. Look up the `kid` in the cached key set; on a miss, force exactly one
//!    refresh and retry the lookup once.
//! 4. Verify the signature plus `exp`/`nbf` (with configured leeway) and an
//!    exact `iss` match.
//! 5. Check `aud` manually (single string or array forms).
//! 6. Compare the `nonce` claim against the caller's expected value in
//!    constant time.
//! 7. Require a non-empty `sub` and present `exp`/`iat` claims.
//!
//! The expected nonce is a per-login value the caller generated and bound to
//! the client request that obtained the ID token. This verifier only
//! compares; it cannot guarantee nonce freshness on its own.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{
    Algorithm, DecodingKey, TokenData, Validation,
    errors::ErrorKind,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::error::AuthError;
use super::keys::KeyCache;

/// Claims extracted from a fully verified ID token. Ephemeral — consumed by
/// the sign-in flow and never persisted as-is.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    /// Stable opaque subject identifier issued by the provider.
    pub subject: String,
    /// Audience the token was issued for.
    pub audience: String,
    /// Issuer URL.
    pub issuer: String,
    /// Issued-at (Unix epoch seconds).
    pub issued_at: u64,
    /// Expiry (Unix epoch seconds).
    pub expiry: u64,
    /// The verified nonce.
    pub nonce: String,
    /// Email claim, when the provider shares it.
    pub email: Option<String>,
}

/// Raw claim set deserialized during verification.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    iss: String,
    sub: String,
    /// May be a single string or an array; validated manually.
    #[serde(default)]
    aud: serde_json::Value,
    /// Optional at the serde layer so absence surfaces as `ClaimInvalid`
    /// rather than a deserialization failure.
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    iat: Option<u64>,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Verifies presented ID tokens against the cached provider key set.
pub struct TokenVerifier {
    keys: Arc<KeyCache>,
    issuer: String,
    audience: String,
    allowed_algorithms: Vec<Algorithm>,
    leeway_secs: u64,
}

impl TokenVerifier {
    /// Create a verifier over the given key cache.
    #[must_use]
    pub fn new(
        keys: Arc<KeyCache>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        allowed_algorithms: Vec<Algorithm>,
        clock_skew: Duration,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            audience: audience.into(),
            allowed_algorithms,
            leeway_secs: clock_skew.as_secs(),
        }
    }

    /// Verify `token` and its nonce binding, returning the verified claims.
    ///
    /// # Errors
    ///
    /// Every failure kind is tagged: `MalformedToken`, `UnknownSigningKey`,
    /// `SignatureInvalid`, `ClaimInvalid`, `NonceMismatch`, or
    /// `UpstreamUnavailable` when the key set cannot be obtained at all.
    pub async fn verify(
        &self,
        token: &str,
        expected_nonce: &str,
    ) -> Result<VerifiedClaims, AuthError> {
        let header =
            jsonwebtoken::decode_header(token).map_err(|_| AuthError::MalformedToken)?;
        let kid = header.kid.ok_or(AuthError::MalformedToken)?;

        if !self.allowed_algorithms.contains(&header.alg) {
            debug!(alg = ?header.alg, "Token algorithm not in allow-list");
            return Err(AuthError::SignatureInvalid);
        }

        let decoding_key = self.find_decoding_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway_secs;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        // Audience is checked manually below to support both the single-string
        // and array forms.
        validation.validate_aud = false;

        let token_data: TokenData<IdTokenClaims> =
            jsonwebtoken::decode(token, &decoding_key, &validation)
                .map_err(|e| map_decode_error(&e))?;
        let claims = token_data.claims;

        check_audience(&claims.aud, &self.audience)?;

        // Constant-time comparison; an absent nonce claim is a mismatch.
        let presented = claims.nonce.as_deref().unwrap_or("");
        let matches: bool = presented
            .as_bytes()
            .ct_eq(expected_nonce.as_bytes())
            .into();
        if presented.is_empty() || !matches {
            return Err(AuthError::NonceMismatch);
        }

        if claims.sub.is_empty() {
            return Err(AuthError::ClaimInvalid("sub"));
        }

        let expiry = claims.exp.ok_or(AuthError::ClaimInvalid("exp"))?;
        let issued_at = claims.iat.ok_or(AuthError::ClaimInvalid("iat"))?;

        Ok(VerifiedClaims {
            subject: claims.sub,
            audience: self.audience.clone(),
            issuer: claims.iss,
            issued_at,
            expiry,
            nonce: presented.to_string(),
            email: claims.email,
        })
    }

    /// Find a decoding key by `kid`, forcing one key-set refresh on a miss.
    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        let jwks = self.keys.get().await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        // Unknown kid: the provider may have rotated. Refresh once and retry.
        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.keys.refresh().await?;
        find_key_in_jwks(&jwks, kid)
            .ok_or_else(|| AuthError::UnknownSigningKey(kid.to_string()))
    }
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        let jwk_kid = jwk.common.key_id.as_deref().unwrap_or("");
        if jwk_kid != kid {
            continue;
        }

        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => {
                DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok()
            }
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
            }
            AlgorithmParameters::OctetKey(params) => {
                let secret = base64::Engine::decode(
                    &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                    &params.value,
                )
                .ok()?;
                Some(DecodingKey::from_secret(&secret))
            }
            AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}

/// Validate that the token's `aud` claim matches the expected audience,
/// accepting both the single-string and array forms.
fn check_audience(aud_claim: &serde_json::Value, expected: &str) -> Result<(), AuthError> {
    let matches = match aud_claim {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Array(arr) => {
            arr.iter().any(|v| v.as_str() == Some(expected))
        }
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(AuthError::ClaimInvalid("aud"))
    }
}

/// Map `jsonwebtoken` decode failures onto the tagged taxonomy.
fn map_decode_error(e: &jsonwebtoken::errors::Error) -> AuthError {
    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::ClaimInvalid("exp"),
        ErrorKind::ImmatureSignature => AuthError::ClaimInvalid("nbf"),
        ErrorKind::InvalidIssuer => AuthError::ClaimInvalid("iss"),
        ErrorKind::InvalidAudience => AuthError::ClaimInvalid("aud"),
        // Name the claim the library reported missing, not a fixed guess.
        ErrorKind::MissingRequiredClaim(claim) => AuthError::ClaimInvalid(match claim.as_str() {
            "exp" => "exp",
            "nbf" => "nbf",
            "iat" => "iat",
            "iss" => "iss",
            "aud" => "aud",
            "sub" => "sub",
            _ => "required claim",
        }),
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthError::MalformedToken,
        _ => AuthError::SignatureInvalid,
    }
}
