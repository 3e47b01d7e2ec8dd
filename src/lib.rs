//! Gatekeeper
//!
//! A policy-driven authorization service. A relying party posts a request to
//! `/allowed` asking whether an authenticated user may perform an action on
//! a resource under an environmental context; Gatekeeper answers with a
//! boolean and the resolved principal set.
//!
//! # Pipeline
//!
//! 1. The `Origin` header names the calling service.
//! 2. When the service declares an identity provider, the bearer token is
//!    validated against it (OpenID Connect discovery, cached JWKS) and the
//!    principals are derived from the token claims; otherwise the caller
//!    posts its principals directly.
//! 3. Principals are expanded with the service's tags and the requested
//!    roles.
//! 4. The service's ordered policies are evaluated with deny-wins
//!    semantics; each decision is written to the audit stream.
//!
//! Policies files are YAML, loaded from disk or GitHub, and reloadable at
//! runtime through `/__reload__` with all-or-nothing swap semantics.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod authn;
pub mod cli;
pub mod config;
pub mod error;
pub mod loader;
pub mod policy;
pub mod registry;
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
