//! Auth Kernel Library
//!
//! Authorization kernel for multi-tenant client applications.
//!
//! # Features
//!
//! - **Signing key lifecycle**: RSA key loaded from disk or generated once,
//!   persisted atomically, shared read-only
//! - **Client credentials**: salted secret digests, constant-time comparison,
//!   uniform failures
//! - **Session tokens**: RS256 JWTs bound to a server-side session that logout
//!   revokes immediately
//! - **Gates**: client and token checks composed in front of handlers
//! - **Audit**: every login, issuance, refresh and revocation as a structured
//!   log event

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod server;

#[cfg(test)]
mod testutil;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::Config(format!("Invalid log level '{level}': {e}")))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
