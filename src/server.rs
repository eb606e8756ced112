//! HTTP server — wires the configured pipeline and serves it.

use std::str::FromStr;
use std::sync::Arc;

use axum::{Json, Router, routing::get};
use jsonwebtoken::Algorithm;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::auth::{
    AuthService, DelegatedSessions, HttpKeyProvider, InMemoryUserDirectory, KeyCache,
    LocalHmacSessions, SessionStrategy, TokenVerifier, handler::auth_routes,
};
use crate::config::{Config, SessionStrategyKind};
use crate::{Error, Result};

/// Sign-in gateway server
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a server from validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Assemble the authentication service from the configuration.
    ///
    /// The explicit dependency graph (provider -> cache -> verifier,
    /// directory, session strategy) is what makes every piece swappable in
    /// tests.
    pub fn build_service(&self) -> Result<Arc<AuthService>> {
        let provider = Arc::new(HttpKeyProvider::new(
            self.config.provider.resolved_jwks_uri(),
            self.config.provider.fetch_timeout,
        ));
        let keys = Arc::new(KeyCache::new(provider, self.config.provider.jwks_ttl));

        let algorithms = self
            .config
            .provider
            .allowed_algorithms
            .iter()
            .map(|name| {
                Algorithm::from_str(name)
                    .map_err(|_| Error::Config(format!("Unknown algorithm: {name}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let verifier = TokenVerifier::new(
            keys,
            self.config.provider.issuer.clone(),
            self.config.provider.audience.clone(),
            algorithms,
            self.config.provider.clock_skew,
        );

        let directory = Arc::new(InMemoryUserDirectory::new());

        let sessions: Arc<dyn SessionStrategy> = match self.config.session.strategy {
            SessionStrategyKind::Local => {
                let secret = self
                    .config
                    .session
                    .resolve_secret()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| Error::Config("session.secret is not set".to_string()))?;
                Arc::new(LocalHmacSessions::new(
                    secret.as_bytes(),
                    self.config.session.ttl,
                    self.config.provider.clock_skew,
                ))
            }
            SessionStrategyKind::Delegated => {
                let delegated = self
                    .config
                    .session
                    .delegated
                    .as_ref()
                    .ok_or_else(|| Error::Config("session.delegated is not set".to_string()))?;
                if delegated.api_token.is_some() && delegated.resolve_api_token().is_none() {
                    warn!("Delegated platform api_token references an unset variable");
                }
                Arc::new(DelegatedSessions::new(delegated, self.config.session.ttl))
            }
        };

        Ok(Arc::new(AuthService::new(verifier, directory, sessions)))
    }

    /// Run the server until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let service = self.build_service()?;

        let app = Router::new()
            .merge(auth_routes(service))
            .route("/health", get(health))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(self.config.server.request_timeout));

        let listener =
            bind_listener(&self.config.server.host, self.config.server.port).await?;

        info!(
            host = %self.config.server.host,
            port = self.config.server.port,
            issuer = %self.config.provider.issuer,
            strategy = ?self.config.session.strategy,
            "Sign-in gateway listening"
        );
        info!("  POST /auth/signin   (ID token + nonce -> session credential)");
        info!("  GET  /auth/session  (session credential -> bound claims)");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Server shutdown complete");
        Ok(())
    }
}

/// Bind the listener. Accepts hostnames (e.g. `localhost`) as well as
/// literal IPs; resolution goes through the system resolver.
async fn bind_listener(host: &str, port: u16) -> Result<TcpListener> {
    Ok(TcpListener::bind((host, port)).await?)
}

/// `GET /health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, SessionConfig};

    fn valid_config() -> Config {
        Config {
            provider: ProviderConfig {
                audience: "com.example.app".to_string(),
                ..Default::default()
            },
            session: SessionConfig {
                secret: Some("test-secret".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn server_builds_service_from_valid_config() {
        let server = Server::new(valid_config()).unwrap();
        assert!(server.build_service().is_ok());
    }

    #[test]
    fn server_rejects_invalid_config() {
        // Empty audience fails validation before anything is wired.
        let config = Config::default();
        assert!(Server::new(config).is_err());
    }

    #[tokio::test]
    async fn hostname_bind_target_is_accepted() {
        // GIVEN/WHEN: a hostname rather than a literal IP, ephemeral port
        let listener = bind_listener("localhost", 0).await.unwrap();

        // THEN: it resolved and bound on loopback
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }

    #[test]
    fn unknown_algorithm_is_a_config_error() {
        let mut config = valid_config();
        config.provider.allowed_algorithms = vec!["XX999".to_string()];
        let server = Server::new(config).unwrap();
        let err = server.build_service().unwrap_err();
        assert!(err.to_string().contains("Unknown algorithm"));
    }
}
