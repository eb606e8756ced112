//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Sign-in Gateway - ID token verification and session issuance
#[derive(Parser, Debug)]
#[command(name = "signin-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SIGNIN_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "SIGNIN_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "SIGNIN_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SIGNIN_GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SIGNIN_GATEWAY_LOG_FORMAT")]
    pub log_format: Option<String>,
}
