//! HTTP handlers for the sign-in endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/auth/signin` | Exchange a provider ID token + nonce for a session credential |
//! | `GET` | `/auth/session` | Validate a session credential and return its bound claims |
//!
//! # Error shape
//!
//! Every verification-stage failure collapses to one generic `401` body —
//! a client can never distinguish a bad signature from a bad nonce (oracle
//! resistance). Upstream/storage unavailability is the one distinct case:
//! it maps to `503` because "retry later" is not a security-sensitive hint.
//! The specific failure kind is only ever visible in the audit log.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AuthError, AuthService};

// ── Request / Response types ───────────────────────────────────────────────

/// Sign-in request body.
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    /// The provider-issued ID token (JWT).
    #[serde(alias = "identityToken")]
    pub identity_token: String,
    /// The per-login nonce the client bound to its authorization request.
    pub nonce: String,
}

/// Sign-in response body.
#[derive(Debug, Serialize)]
pub struct SignInResponse {
    /// Always `true` on this path.
    pub success: bool,
    /// The verified external subject identifier.
    pub subject: String,
    /// Local user id.
    pub user_id: String,
    /// The issued session credential.
    pub session_token: String,
    /// Always `"Bearer"`.
    pub token_type: String,
    /// Seconds until the credential expires.
    pub expires_in: u64,
}

/// Session introspection response body.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// External subject identifier bound to the credential.
    pub subject: String,
    /// Issued-at (Unix epoch seconds).
    pub issued_at: u64,
    /// Expires-at (Unix epoch seconds).
    pub expires_at: u64,
}

// ── Route builder ─────────────────────────────────────────────────────────

/// Build the authentication routes.
///
/// The sign-in endpoint is necessarily unauthenticated — it IS the
/// authentication step.
pub fn auth_routes(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/auth/signin", post(sign_in))
        .route("/auth/session", get(session_info))
        .with_state(service)
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /auth/signin` — verify an ID token and issue a session credential.
async fn sign_in(
    State(service): State<Arc<AuthService>>,
    Json(body): Json<SignInRequest>,
) -> impl IntoResponse {
    if body.identity_token.is_empty() || body.nonce.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "identity_token and nonce are required",
        );
    }

    match service.sign_in(&body.identity_token, &body.nonce).await {
        Ok(grant) => (
            StatusCode::OK,
            Json(SignInResponse {
                success: true,
                subject: grant.subject,
                user_id: grant.user_id.to_string(),
                session_token: grant.credential.token,
                token_type: "Bearer".to_string(),
                expires_in: grant.credential.expires_in,
            }),
        )
            .into_response(),
        Err(e) => auth_error_response(&e),
    }
}

/// `GET /auth/session` — validate the bearer credential and return its claims.
async fn session_info(
    State(service): State<Arc<AuthService>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(credential) = extract_bearer(&headers) else {
        return auth_error_response(&AuthError::MissingCredential);
    };

    match service.authenticate(credential).await {
        Ok(claims) => (
            StatusCode::OK,
            Json(SessionResponse {
                subject: claims.sub,
                issued_at: claims.iat,
                expires_at: claims.exp,
            }),
        )
            .into_response(),
        Err(e) => auth_error_response(&e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

/// Extract the token from an `Authorization: Bearer <token>` header.
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Map a pipeline failure to its boundary response.
///
/// Unavailability is retryable and gets a `503`; everything else collapses
/// to one generic `401` that leaks nothing about which check failed.
fn auth_error_response(error: &AuthError) -> axum::response::Response {
    if error.is_retryable() {
        error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "temporarily_unavailable",
            "Service temporarily unavailable, retry later",
        )
    } else {
        error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Authentication failed",
        )
    }
}

/// Create a JSON error response.
fn error_response(status: StatusCode, error: &str, message: &str) -> axum::response::Response {
    (status, Json(json!({"error": error, "message": message}))).into_response()
}
