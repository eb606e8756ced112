//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `env:VAR` resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Identity provider configuration
    pub provider: ProviderConfig,
    /// Session issuance configuration
    pub session: SessionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Identity provider configuration — who signs the ID tokens we accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Expected `iss` claim. Must match the token exactly.
    pub issuer: String,
    /// Expected `aud` claim (the client identifier registered with the provider).
    pub audience: String,
    /// JWKS endpoint. When unset, derived from the issuer
    /// (`{issuer}/auth/keys` for Apple, `/.well-known/jwks.json` otherwise).
    #[serde(default)]
    pub jwks_uri: Option<String>,
    /// How long a fetched key set stays fresh before a time-based refresh.
    #[serde(with = "humantime_serde")]
    pub jwks_ttl: Duration,
    /// Clock-skew tolerance applied to `exp`/`nbf` checks.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    /// Timeout for JWKS fetches.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Signature algorithms accepted for ID tokens. `none` is always rejected;
    /// the token's own header never widens this list.
    pub allowed_algorithms: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            issuer: "https://appleid.apple.com".to_string(),
            audience: String::new(),
            jwks_uri: None,
            jwks_ttl: Duration::from_secs(24 * 3600),
            clock_skew: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(10),
            allowed_algorithms: vec!["RS256".to_string(), "ES256".to_string()],
        }
    }
}

impl ProviderConfig {
    /// The JWKS endpoint to fetch signing keys from.
    #[must_use]
    pub fn resolved_jwks_uri(&self) -> String {
        if let Some(ref uri) = self.jwks_uri {
            return uri.clone();
        }
        let base = self.issuer.trim_end_matches('/');
        // Apple does not serve the standard discovery path.
        if base == "https://appleid.apple.com" {
            format!("{base}/auth/keys")
        } else {
            format!("{base}/.well-known/jwks.json")
        }
    }
}

/// Which session strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStrategyKind {
    /// Mint and validate HS256 session JWTs locally.
    #[default]
    Local,
    /// Delegate minting and validation to an external identity platform.
    Delegated,
}

/// Session issuance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Strategy selection (`local` or `delegated`).
    pub strategy: SessionStrategyKind,
    /// Signing secret for the local strategy.
    /// Supports `env:VAR_NAME` indirection; never commit a literal secret.
    #[serde(default)]
    pub secret: Option<String>,
    /// Session lifetime.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// External platform endpoints for the delegated strategy.
    #[serde(default)]
    pub delegated: Option<DelegatedConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            strategy: SessionStrategyKind::Local,
            secret: None,
            ttl: Duration::from_secs(7 * 24 * 3600),
            delegated: None,
        }
    }
}

impl SessionConfig {
    /// Resolve the session secret (expand `env:VAR` indirection).
    ///
    /// Returns `None` when unset or when the referenced variable is absent.
    #[must_use]
    pub fn resolve_secret(&self) -> Option<String> {
        self.secret.as_ref().and_then(|s| resolve_env_value(s))
    }
}

/// External identity platform endpoints for delegated session issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatedConfig {
    /// Endpoint that mints a session credential for a verified subject.
    pub issue_url: String,
    /// Endpoint that validates a presented credential.
    pub verify_url: String,
    /// Bearer token for the platform API (supports `env:VAR_NAME`).
    #[serde(default)]
    pub api_token: Option<String>,
    /// Timeout for platform calls.
    #[serde(with = "humantime_serde", default = "default_delegated_timeout")]
    pub timeout: Duration,
}

fn default_delegated_timeout() -> Duration {
    Duration::from_secs(10)
}

impl DelegatedConfig {
    /// Resolve the platform API token (expand `env:VAR` indirection).
    #[must_use]
    pub fn resolve_api_token(&self) -> Option<String> {
        self.api_token.as_ref().and_then(|t| resolve_env_value(t))
    }
}

/// Expand `env:VAR_NAME` into the variable's value; pass literals through.
fn resolve_env_value(value: &str) -> Option<String> {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).ok()
    } else {
        Some(value.to_string())
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (SIGNIN_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("SIGNIN_GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before secret resolution)
        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Validate the loaded configuration before wiring the service.
    ///
    /// # Errors
    ///
    /// Returns a config error for a malformed issuer, an empty audience, a
    /// missing/empty session secret (local strategy), or missing delegated
    /// endpoints (delegated strategy).
    pub fn validate(&self) -> Result<()> {
        let issuer = Url::parse(&self.provider.issuer)
            .map_err(|e| Error::Config(format!("Invalid provider issuer: {e}")))?;
        if issuer.scheme() != "https" {
            return Err(Error::Config(
                "Provider issuer must be an https:// URL".to_string(),
            ));
        }

        if self.provider.audience.is_empty() {
            return Err(Error::Config(
                "provider.audience must be set to your registered client identifier".to_string(),
            ));
        }

        if self.provider.allowed_algorithms.is_empty() {
            return Err(Error::Config(
                "provider.allowed_algorithms must not be empty".to_string(),
            ));
        }

        match self.session.strategy {
            SessionStrategyKind::Local => {
                let secret = self.session.resolve_secret().unwrap_or_default();
                if secret.is_empty() {
                    return Err(Error::Config(
                        "session.secret is required for the local strategy \
                         (use env:VAR indirection, never a literal in checked-in config)"
                            .to_string(),
                    ));
                }
            }
            SessionStrategyKind::Delegated => {
                let Some(ref delegated) = self.session.delegated else {
                    return Err(Error::Config(
                        "session.delegated endpoints are required for the delegated strategy"
                            .to_string(),
                    ));
                };
                for (name, value) in [
                    ("issue_url", &delegated.issue_url),
                    ("verify_url", &delegated.verify_url),
                ] {
                    let url = Url::parse(value).map_err(|e| {
                        Error::Config(format!("Invalid delegated {name}: {e}"))
                    })?;
                    if url.scheme() != "https" {
                        return Err(Error::Config(format!(
                            "Delegated {name} must be an https:// URL"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "24h", "7d")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom)
        } else if let Some(days) = s.strip_suffix('d') {
            days.parse::<u64>()
                .map(|d| Duration::from_secs(d * 24 * 3600))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_target_apple_sign_in() {
        let config = Config::default();
        assert_eq!(config.provider.issuer, "https://appleid.apple.com");
        assert_eq!(
            config.provider.resolved_jwks_uri(),
            "https://appleid.apple.com/auth/keys"
        );
        assert_eq!(config.session.strategy, SessionStrategyKind::Local);
        assert_eq!(config.session.ttl, Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn jwks_uri_derivation_uses_well_known_for_other_issuers() {
        let provider = ProviderConfig {
            issuer: "https://accounts.google.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            provider.resolved_jwks_uri(),
            "https://accounts.google.com/.well-known/jwks.json"
        );
    }

    #[test]
    fn explicit_jwks_uri_wins_over_derivation() {
        let provider = ProviderConfig {
            jwks_uri: Some("https://example.com/keys".to_string()),
            ..Default::default()
        };
        assert_eq!(provider.resolved_jwks_uri(), "https://example.com/keys");
    }

    #[test]
    fn config_deserializes_from_yaml() {
        let yaml = r#"
server:
  host: "0.0.0.0"
  port: 8443
provider:
  issuer: "https://appleid.apple.com"
  audience: "com.example.app"
  jwks_ttl: 24h
  clock_skew: 30s
session:
  strategy: local
  secret: env:SESSION_SECRET
  ttl: 7d
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.provider.audience, "com.example.app");
        assert_eq!(config.provider.jwks_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(config.provider.clock_skew, Duration::from_secs(30));
        assert_eq!(config.session.ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.session.secret.as_deref(), Some("env:SESSION_SECRET"));
    }

    #[test]
    fn delegated_strategy_deserializes() {
        let yaml = r#"
provider:
  audience: "com.example.app"
session:
  strategy: delegated
  delegated:
    issue_url: "https://platform.example/v1/tokens"
    verify_url: "https://platform.example/v1/tokens:verify"
    api_token: env:PLATFORM_TOKEN
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.session.strategy, SessionStrategyKind::Delegated);
        let delegated = config.session.delegated.unwrap();
        assert_eq!(delegated.issue_url, "https://platform.example/v1/tokens");
        assert_eq!(delegated.timeout, Duration::from_secs(10));
    }

    #[test]
    fn validate_rejects_empty_audience() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("audience"));
    }

    #[test]
    fn validate_rejects_missing_local_secret() {
        let config = Config {
            provider: ProviderConfig {
                audience: "com.example.app".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("session.secret"));
    }

    #[test]
    fn validate_rejects_non_https_issuer() {
        let config = Config {
            provider: ProviderConfig {
                issuer: "http://appleid.apple.com".to_string(),
                audience: "com.example.app".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn validate_accepts_literal_secret() {
        let config = Config {
            provider: ProviderConfig {
                audience: "com.example.app".to_string(),
                ..Default::default()
            },
            session: SessionConfig {
                secret: Some("test-secret-for-validation".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_http_delegated_endpoint() {
        let config = Config {
            provider: ProviderConfig {
                audience: "com.example.app".to_string(),
                ..Default::default()
            },
            session: SessionConfig {
                strategy: SessionStrategyKind::Delegated,
                delegated: Some(DelegatedConfig {
                    issue_url: "http://platform.example/v1/tokens".to_string(),
                    verify_url: "https://platform.example/v1/tokens:verify".to_string(),
                    api_token: None,
                    timeout: Duration::from_secs(10),
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn validate_rejects_delegated_without_endpoints() {
        let config = Config {
            provider: ProviderConfig {
                audience: "com.example.app".to_string(),
                ..Default::default()
            },
            session: SessionConfig {
                strategy: SessionStrategyKind::Delegated,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("delegated"));
    }

    #[test]
    fn env_secret_resolves_via_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "SIGNIN_GW_TEST_SECRET=from_env_file").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            session: SessionConfig {
                secret: Some("env:SIGNIN_GW_TEST_SECRET".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        config.load_env_files();

        // Note: env::set_var is unsafe in edition 2024 and the lib forbids
        // unsafe, so the variable is injected through dotenvy. The test key
        // uses a unique SIGNIN_GW_TEST_ prefix so it won't conflict.
        assert_eq!(
            config.session.resolve_secret().as_deref(),
            Some("from_env_file")
        );
    }

    #[test]
    fn unset_env_secret_resolves_to_none() {
        let session = SessionConfig {
            secret: Some("env:SIGNIN_GW_DOES_NOT_EXIST".to_string()),
            ..Default::default()
        };
        assert!(session.resolve_secret().is_none());
    }
}
