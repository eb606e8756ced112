//! Error taxonomy for the verification-and-session pipeline.
//!
//! Every operation returns a tagged kind so call sites handle each failure
//! explicitly. At the HTTP boundary the verification-stage kinds collapse to
//! one generic unauthorized response — [`AuthError::is_retryable`] is the
//! only distinction a client may observe.

use thiserror::Error;

/// Failure kinds for token verification, user upsert, and session handling.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The presented ID token could not be parsed at all.
    #[error("Malformed identity token")]
    MalformedToken,

    /// No signing key matches the token's `kid`, even after one forced
    /// key-set refresh.
    #[error("Unknown signing key: {0}")]
    UnknownSigningKey(String),

    /// Signature verification failed, or the declared algorithm is not in
    /// the configured allow-list.
    #[error("Identity token signature invalid")]
    SignatureInvalid,

    /// Issuer, audience, temporal claims, or required claims did not check out.
    #[error("Identity token claim invalid: {0}")]
    ClaimInvalid(&'static str),

    /// The token's nonce does not match the expected per-login value.
    #[error("Nonce mismatch")]
    NonceMismatch,

    /// The identity provider (or delegated platform) could not be reached
    /// and no cached state could satisfy the request.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The user store could not be reached.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The presented session credential has expired.
    #[error("Session credential expired")]
    CredentialExpired,

    /// The presented session credential is malformed or carries a bad signature.
    #[error("Session credential invalid")]
    CredentialInvalid,

    /// No session credential was presented.
    #[error("Missing session credential")]
    MissingCredential,
}

impl AuthError {
    /// `true` for failures a client may retry later (server-side
    /// unavailability); everything else is an authentication failure and
    /// collapses to a generic unauthorized response.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_) | Self::StorageUnavailable(_)
        )
    }

    /// Stable variant name for audit events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedToken => "MalformedToken",
            Self::UnknownSigningKey(_) => "UnknownSigningKey",
            Self::SignatureInvalid => "SignatureInvalid",
            Self::ClaimInvalid(_) => "ClaimInvalid",
            Self::NonceMismatch => "NonceMismatch",
            Self::UpstreamUnavailable(_) => "UpstreamUnavailable",
            Self::StorageUnavailable(_) => "StorageUnavailable",
            Self::CredentialExpired => "CredentialExpired",
            Self::CredentialInvalid => "CredentialInvalid",
            Self::MissingCredential => "MissingCredential",
        }
    }
}
