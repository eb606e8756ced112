//! Sign-in pipeline — ID-token verification to session issuance.
//!
//! The flow, per inbound sign-in request:
//!
//! ```text
//! POST /auth/signin {identity_token, nonce}
//!   -> TokenVerifier (uses KeyCache)        -- signature, claims, nonce
//!   -> UserDirectory::find_or_create        -- upsert by stable subject
//!   -> SessionStrategy::issue               -- mint session credential
//!   -> SignInGrant
//! ```
//!
//! Subsequent requests only touch `SessionStrategy::authenticate`.
//!
//! [`AuthService`] owns the whole dependency graph; tests assemble it from
//! fakes (key provider, in-memory directory) and drive it directly.

pub mod audit;
pub mod directory;
pub mod error;
pub mod handler;
pub mod keys;
pub mod session;
pub mod verifier;

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

pub use audit::AuditEvent;
pub use directory::{InMemoryUserDirectory, User, UserDirectory};
pub use error::AuthError;
pub use keys::{HttpKeyProvider, KeyCache, KeyProvider};
pub use session::{
    DelegatedSessions, LocalHmacSessions, SessionClaims, SessionCredential, SessionStrategy,
};
pub use verifier::{TokenVerifier, VerifiedClaims};

/// Result of a successful sign-in.
#[derive(Debug, Clone)]
pub struct SignInGrant {
    /// The verified external subject identifier.
    pub subject: String,
    /// Local user id for the upserted record.
    pub user_id: Uuid,
    /// The minted session credential.
    pub credential: SessionCredential,
}

/// The authentication service — coordinator for the sign-in pipeline.
pub struct AuthService {
    verifier: TokenVerifier,
    directory: Arc<dyn UserDirectory>,
    sessions: Arc<dyn SessionStrategy>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService").finish_non_exhaustive()
    }
}

impl AuthService {
    /// Assemble the service from its parts.
    #[must_use]
    pub fn new(
        verifier: TokenVerifier,
        directory: Arc<dyn UserDirectory>,
        sessions: Arc<dyn SessionStrategy>,
    ) -> Self {
        Self {
            verifier,
            directory,
            sessions,
        }
    }

    /// Verify an ID token, upsert the user, and issue a session credential.
    ///
    /// # Errors
    ///
    /// Propagates every tagged failure kind from the pipeline stages; the
    /// HTTP boundary decides how much of that a client gets to see.
    pub async fn sign_in(&self, identity_token: &str, nonce: &str) -> Result<SignInGrant, AuthError> {
        let claims = match self.verifier.verify(identity_token, nonce).await {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "ID token verification failed");
                audit::emit(&AuditEvent::signin_denied(e.kind()));
                return Err(e);
            }
        };

        let user = match self.directory.find_or_create(&claims.subject).await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "User upsert failed");
                audit::emit(&AuditEvent::signin_denied(e.kind()));
                return Err(e);
            }
        };
        debug!(subject = %user.subject, user_id = %user.id, "Subject mapped to local user");

        let credential = match self.sessions.issue(&user).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "Session issuance failed");
                audit::emit(&AuditEvent::signin_denied(e.kind()));
                return Err(e);
            }
        };

        audit::emit(&AuditEvent::signin_granted(&user.subject, user.id));
        Ok(SignInGrant {
            subject: user.subject,
            user_id: user.id,
            credential,
        })
    }

    /// Authenticate a presented session credential.
    pub async fn authenticate(&self, credential: &str) -> Result<SessionClaims, AuthError> {
        match self.sessions.authenticate(credential).await {
            Ok(claims) => {
                audit::emit(&AuditEvent::session_accepted(&claims.sub));
                Ok(claims)
            }
            Err(e) => {
                audit::emit(&AuditEvent::session_denied(e.kind()));
                Err(e)
            }
        }
    }
}
