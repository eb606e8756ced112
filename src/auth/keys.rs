//! Provider signing keys — fetching and process-wide caching.
//!
//! The identity provider rotates its signing keys; tokens reference a key by
//! `kid`. [`KeyCache`] owns the one piece of shared mutable state in the
//! pipeline: the current key set, replaced wholesale on every refresh
//! (last-writer-wins, safe under concurrent readers).
//!
//! # Availability
//!
//! `UpstreamUnavailable` is raised only when the provider cannot be reached
//! *and* no cached key set exists. Once a key set has been fetched, a failed
//! refresh serves the stale set with a warning — trusting a rotated-out key
//! briefly beats locking every user out while the provider is down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::error::AuthError;

/// Source of the provider's public signing keys.
///
/// Implementations must be `Send + Sync` because the cache is shared across
/// async tasks. Tests substitute a fake provider to control rotation.
#[async_trait::async_trait]
pub trait KeyProvider: Send + Sync + 'static {
    /// Fetch the full current key set from the provider.
    async fn fetch_keys(&self) -> Result<JwkSet, AuthError>;
}

/// Fetches JWKS over HTTPS with a bounded timeout.
pub struct HttpKeyProvider {
    http: reqwest::Client,
    jwks_uri: String,
}

impl HttpKeyProvider {
    /// Create a provider client for the given JWKS endpoint.
    #[must_use]
    pub fn new(jwks_uri: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .https_only(true)
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            jwks_uri: jwks_uri.into(),
        }
    }
}

#[async_trait::async_trait]
impl KeyProvider for HttpKeyProvider {
    async fn fetch_keys(&self) -> Result<JwkSet, AuthError> {
        debug!(uri = %self.jwks_uri, "Fetching JWKS");
        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| AuthError::UpstreamUnavailable(e.to_string()))?;

        let response = response
            .error_for_status()
            .map_err(|e| AuthError::UpstreamUnavailable(e.to_string()))?;

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| AuthError::UpstreamUnavailable(e.to_string()))
    }
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Process-wide cache of the provider's key set.
///
/// Lazily initialized on first use; refreshed when older than the TTL or
/// when the verifier forces a refresh after an unknown-`kid` lookup.
pub struct KeyCache {
    provider: Arc<dyn KeyProvider>,
    current: RwLock<Option<CachedKeys>>,
    ttl: Duration,
}

impl KeyCache {
    /// Create an empty cache over the given provider.
    #[must_use]
    pub fn new(provider: Arc<dyn KeyProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            current: RwLock::new(None),
            ttl,
        }
    }

    /// Return the cached key set, fetching from the provider on first use
    /// or when the cached set is older than the TTL.
    pub async fn get(&self) -> Result<JwkSet, AuthError> {
        {
            let guard = self.current.read();
            if let Some(ref cached) = *guard {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.keys.clone());
                }
            }
        }
        self.refresh().await
    }

    /// Force a fetch from the provider, replacing the cached set wholesale.
    ///
    /// Falls back to the last-known set (with a warning) if the provider is
    /// unreachable; fails with `UpstreamUnavailable` only when nothing has
    /// ever been cached.
    pub async fn refresh(&self) -> Result<JwkSet, AuthError> {
        match self.provider.fetch_keys().await {
            Ok(keys) => {
                debug!(key_count = keys.keys.len(), "Refreshed provider key set");
                *self.current.write() = Some(CachedKeys {
                    keys: keys.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(keys)
            }
            Err(e) => {
                let guard = self.current.read();
                if let Some(ref cached) = *guard {
                    warn!(error = %e, "Key refresh failed, serving stale key set");
                    Ok(cached.keys.clone())
                } else {
                    Err(e)
                }
            }
        }
    }
}
