//! Sign-in Gateway Library
//!
//! Verifies identity-provider ID tokens and exchanges them for local session
//! credentials.
//!
//! # Features
//!
//! - **ID Token Verification**: JWKS-backed signature checks with a strict
//!   algorithm allow-list, issuer/audience pinning, and nonce binding
//! - **Key Caching**: TTL-based JWKS cache with one forced refresh on an
//!   unknown `kid` (tolerates provider key rotation)
//! - **User Directory**: Race-safe subject-to-user upsert
//! - **Session Strategies**: Local HS256 minting or delegation to an
//!   external identity platform
//! - **Audit Trail**: Structured grant/deny events for every decision
//!
//! The HTTP boundary never explains a rejection: every verification failure
//! is one generic `401`, with the specific reason visible only in the audit
//! log.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
