//! Session credentials — minting and validation strategies.
//!
//! One [`SessionStrategy`] trait, two implementations selected by
//! configuration:
//!
//! - [`LocalHmacSessions`] mints stateless HS256 JWTs with a server-held
//!   secret. A single fixed algorithm and secret — no negotiation, so a
//!   credential signed any other way is rejected outright.
//! - [`DelegatedSessions`] hands minting and validation to an external
//!   identity platform over HTTPS (the Firebase custom-token shape of the
//!   original flow, generalized to issue/verify endpoints).
//!
//! Sessions embed the external subject identifier, `iat`, and `exp` — and
//! nothing else. No server-side session state, no revocation list: the
//! lifecycle is entirely cryptographic.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::directory::User;
use super::error::AuthError;
use crate::config::DelegatedConfig;

/// A freshly minted session credential.
#[derive(Debug, Clone, Serialize)]
pub struct SessionCredential {
    /// The opaque signed token handed to the client.
    pub token: String,
    /// Seconds until expiry.
    pub expires_in: u64,
}

/// Claims bound to a validated session credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// External subject identifier of the authenticated user.
    pub sub: String,
    /// Issued-at (Unix epoch seconds).
    pub iat: u64,
    /// Expires-at (Unix epoch seconds).
    pub exp: u64,
}

/// Trait abstracting session minting and validation.
#[async_trait::async_trait]
pub trait SessionStrategy: Send + Sync + 'static {
    /// Mint a time-boxed credential bound to `user`.
    async fn issue(&self, user: &User) -> Result<SessionCredential, AuthError>;

    /// Recover and authenticate the claims bound to `credential`.
    ///
    /// Fails with `MissingCredential`, `CredentialInvalid`, or
    /// `CredentialExpired`.
    async fn authenticate(&self, credential: &str) -> Result<SessionClaims, AuthError>;
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

// ── Local strategy ────────────────────────────────────────────────────────

/// Stateless HS256 session JWTs signed with a server-held secret.
pub struct LocalHmacSessions {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
    leeway_secs: u64,
}

impl LocalHmacSessions {
    /// Create the strategy from an externally configured secret.
    ///
    /// The secret must be non-empty; config validation enforces that before
    /// this is reached.
    #[must_use]
    pub fn new(secret: &[u8], ttl: Duration, clock_skew: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_secs: ttl.as_secs(),
            leeway_secs: clock_skew.as_secs(),
        }
    }

    /// Sign a claim set with explicit validity bounds. Split out so tests
    /// can control time without waiting out a real TTL.
    fn mint(&self, subject: &str, iat: u64, exp: u64) -> Result<SessionCredential, AuthError> {
        let claims = SessionClaims {
            sub: subject.to_string(),
            iat,
            exp,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::UpstreamUnavailable(format!("session signing failed: {e}")))?;
        Ok(SessionCredential {
            token,
            expires_in: exp.saturating_sub(iat),
        })
    }
}

#[async_trait::async_trait]
impl SessionStrategy for LocalHmacSessions {
    async fn issue(&self, user: &User) -> Result<SessionCredential, AuthError> {
        let now = unix_now();
        debug!(subject = %user.subject, ttl = self.ttl_secs, "Issuing local session");
        self.mint(&user.subject, now, now + self.ttl_secs)
    }

    async fn authenticate(&self, credential: &str) -> Result<SessionClaims, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        // Fixed algorithm: anything but HS256 under our secret fails here.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_secs;
        validation.validate_aud = false;

        let data = jsonwebtoken::decode::<SessionClaims>(credential, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::CredentialExpired,
                _ => AuthError::CredentialInvalid,
            })?;

        Ok(data.claims)
    }
}

// ── Delegated strategy ────────────────────────────────────────────────────

#[derive(Serialize)]
struct DelegatedIssueRequest<'a> {
    subject: &'a str,
    ttl: u64,
}

#[derive(Deserialize)]
struct DelegatedIssueResponse {
    token: String,
    expires_in: u64,
}

#[derive(Serialize)]
struct DelegatedVerifyRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct DelegatedVerifyResponse {
    subject: String,
    issued_at: u64,
    expires_at: u64,
}

/// Sessions minted and validated by an external identity platform.
pub struct DelegatedSessions {
    http: reqwest::Client,
    issue_url: String,
    verify_url: String,
    api_token: Option<String>,
    ttl_secs: u64,
}

impl DelegatedSessions {
    /// Create the strategy from the configured platform endpoints.
    ///
    /// Config validation enforces `https://` schemes on the endpoints before
    /// this is reached.
    #[must_use]
    pub fn new(config: &DelegatedConfig, ttl: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .unwrap_or_default(),
            issue_url: config.issue_url.clone(),
            verify_url: config.verify_url.clone(),
            api_token: config.resolve_api_token(),
            ttl_secs: ttl.as_secs(),
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl SessionStrategy for DelegatedSessions {
    async fn issue(&self, user: &User) -> Result<SessionCredential, AuthError> {
        debug!(subject = %user.subject, "Requesting delegated session");
        let response = self
            .authorized(self.http.post(&self.issue_url))
            .json(&DelegatedIssueRequest {
                subject: &user.subject,
                ttl: self.ttl_secs,
            })
            .send()
            .await
            .map_err(|e| AuthError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::UpstreamUnavailable(format!(
                "platform returned {}",
                response.status()
            )));
        }

        let body: DelegatedIssueResponse = response
            .json()
            .await
            .map_err(|e| AuthError::UpstreamUnavailable(e.to_string()))?;

        Ok(SessionCredential {
            token: body.token,
            expires_in: body.expires_in,
        })
    }

    async fn authenticate(&self, credential: &str) -> Result<SessionClaims, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let response = self
            .authorized(self.http.post(&self.verify_url))
            .json(&DelegatedVerifyRequest { token: credential })
            .send()
            .await
            .map_err(|e| AuthError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AuthError::CredentialInvalid);
        }
        if !status.is_success() {
            return Err(AuthError::UpstreamUnavailable(format!(
                "platform returned {status}"
            )));
        }

        let body: DelegatedVerifyResponse = response
            .json()
            .await
            .map_err(|e| AuthError::UpstreamUnavailable(e.to_string()))?;

        if body.expires_at <= unix_now() {
            return Err(AuthError::CredentialExpired);
        }

        Ok(SessionClaims {
            sub: body.subject,
            iat: body.issued_at,
            exp: body.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn make_user(subject: &str) -> User {
        User {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
        }
    }

    fn make_sessions() -> LocalHmacSessions {
        LocalHmacSessions::new(
            b"unit-test-session-secret",
            Duration::from_secs(7 * 24 * 3600),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn issue_then_authenticate_round_trips() {
        // GIVEN: a freshly issued session for a user
        let sessions = make_sessions();
        let user = make_user("sub-42");
        let credential = sessions.issue(&user).await.unwrap();

        // WHEN: immediately authenticated
        let claims = sessions.authenticate(&credential.token).await.unwrap();

        // THEN: the claims identify the same subject with the configured TTL
        assert_eq!(claims.sub, "sub-42");
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 3600);
        assert_eq!(credential.expires_in, 7 * 24 * 3600);
    }

    #[tokio::test]
    async fn expired_credential_is_rejected() {
        // GIVEN: a credential whose validity window is already in the past
        let sessions = make_sessions();
        let now = unix_now();
        let credential = sessions.mint("sub-42", now - 7200, now - 3600).unwrap();

        // WHEN/THEN
        let err = sessions.authenticate(&credential.token).await.unwrap_err();
        assert!(matches!(err, AuthError::CredentialExpired));
    }

    #[tokio::test]
    async fn tampered_signature_is_invalid() {
        // GIVEN: a valid credential with one signature byte flipped
        let sessions = make_sessions();
        let credential = sessions.issue(&make_user("sub-42")).await.unwrap();
        let token = credential.token;
        let flipped = if token.ends_with('A') { "B" } else { "A" };
        let tampered = format!("{}{}", &token[..token.len() - 1], flipped);

        // WHEN/THEN
        let err = sessions.authenticate(&tampered).await.unwrap_err();
        assert!(matches!(err, AuthError::CredentialInvalid));
    }

    #[tokio::test]
    async fn credential_from_another_secret_is_invalid() {
        // GIVEN: a credential minted under a different secret
        let sessions = make_sessions();
        let other = LocalHmacSessions::new(
            b"some-other-secret",
            Duration::from_secs(3600),
            Duration::ZERO,
        );
        let credential = other.issue(&make_user("sub-42")).await.unwrap();

        // WHEN/THEN: the secret in effect at validation time decides
        let err = sessions.authenticate(&credential.token).await.unwrap_err();
        assert!(matches!(err, AuthError::CredentialInvalid));
    }

    #[tokio::test]
    async fn non_hs256_credential_is_invalid() {
        // GIVEN: a token signed HS384 with the same secret bytes
        let sessions = make_sessions();
        let claims = SessionClaims {
            sub: "sub-42".to_string(),
            iat: unix_now(),
            exp: unix_now() + 3600,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(b"unit-test-session-secret"),
        )
        .unwrap();

        // WHEN/THEN: no algorithm negotiation for session tokens
        let err = sessions.authenticate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::CredentialInvalid));
    }

    #[tokio::test]
    async fn empty_credential_is_missing() {
        let sessions = make_sessions();
        let err = sessions.authenticate("").await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredential));
    }

    #[tokio::test]
    async fn garbage_credential_is_invalid() {
        let sessions = make_sessions();
        let err = sessions.authenticate("not.a.jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::CredentialInvalid));
    }

    // ── Delegated strategy, against an in-process platform stub ──────────

    use axum::{Json, Router, http::StatusCode, routing::post};

    /// Serve `app` on an ephemeral loopback port, returning the base URL.
    async fn spawn_platform(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn make_delegated(base: &str) -> DelegatedSessions {
        DelegatedSessions::new(
            &DelegatedConfig {
                issue_url: format!("{base}/issue"),
                verify_url: format!("{base}/verify"),
                api_token: None,
                timeout: Duration::from_secs(2),
            },
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn delegated_issue_sends_subject_and_ttl() {
        // GIVEN: a platform that echoes the requested subject into the token
        let app = Router::new().route(
            "/issue",
            post(|Json(body): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "token": format!("tok-for-{}", body["subject"].as_str().unwrap()),
                    "expires_in": body["ttl"],
                }))
            }),
        );
        let sessions = make_delegated(&spawn_platform(app).await);

        // WHEN
        let credential = sessions.issue(&make_user("sub-42")).await.unwrap();

        // THEN: the wire request carried our subject and configured TTL
        assert_eq!(credential.token, "tok-for-sub-42");
        assert_eq!(credential.expires_in, 3600);
    }

    #[tokio::test]
    async fn delegated_verify_accepts_live_credential() {
        // GIVEN: a platform that vouches for the presented token
        let now = unix_now();
        let app = Router::new().route(
            "/verify",
            post(move |Json(_body): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "subject": "sub-42",
                    "issued_at": now,
                    "expires_at": now + 3600,
                }))
            }),
        );
        let sessions = make_delegated(&spawn_platform(app).await);

        // WHEN
        let claims = sessions.authenticate("platform-token").await.unwrap();

        // THEN
        assert_eq!(claims.sub, "sub-42");
        assert_eq!(claims.exp, now + 3600);
    }

    #[tokio::test]
    async fn delegated_platform_rejection_is_credential_invalid() {
        // GIVEN: a platform that refuses the credential
        let app = Router::new().route(
            "/verify",
            post(|| async { StatusCode::UNAUTHORIZED }),
        );
        let sessions = make_delegated(&spawn_platform(app).await);

        // WHEN/THEN: a 4xx means the credential itself is bad
        let err = sessions.authenticate("bad-token").await.unwrap_err();
        assert!(matches!(err, AuthError::CredentialInvalid));
    }

    #[tokio::test]
    async fn delegated_expired_credential_is_rejected() {
        // GIVEN: a platform that reports a validity window already closed
        let now = unix_now();
        let app = Router::new().route(
            "/verify",
            post(move || async move {
                Json(serde_json::json!({
                    "subject": "sub-42",
                    "issued_at": now - 7200,
                    "expires_at": now - 3600,
                }))
            }),
        );
        let sessions = make_delegated(&spawn_platform(app).await);

        // WHEN/THEN
        let err = sessions.authenticate("stale-token").await.unwrap_err();
        assert!(matches!(err, AuthError::CredentialExpired));
    }

    #[tokio::test]
    async fn delegated_platform_error_is_upstream_unavailable() {
        // GIVEN: a platform melting down on issue
        let app = Router::new().route(
            "/issue",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let sessions = make_delegated(&spawn_platform(app).await);

        // WHEN/THEN: a 5xx is retryable unavailability, not a rejection
        let err = sessions.issue(&make_user("sub-42")).await.unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable(_)));
    }
}
