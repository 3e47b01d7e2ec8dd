//! Request authentication against OpenID Connect providers.
//!
//! One [`OpenIdAuthenticator`] exists per identity provider URL, shared by
//! every service that declares the same issuer and kept for the life of the
//! process: its discovery/JWKS/userinfo caches must survive configuration
//! reloads. The [`AuthenticatorRegistry`] owns that per-issuer map.

mod cache;
mod claims;
mod oidc;

pub use cache::TtlCache;
pub use oidc::OpenIdAuthenticator;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{Error, Result};

/// How long remote material (discovery document, JWKS, userinfo) is cached.
pub const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Timeout for every outbound fetch to the identity provider.
pub(crate) const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// The attributes extracted from the identity provider about one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Stable subject identifier (`sub` claim).
    pub id: String,
    /// Primary email address; may be empty when the token carries none.
    pub email: String,
    /// Group memberships.
    pub groups: Vec<String>,
}

/// Error variants for authentication failures.
///
/// All of them surface to the relying party as `401 Unauthorized` with the
/// display string as message.
#[derive(Debug, Error)]
pub enum AuthnError {
    /// No `Authorization: Bearer` header on the request.
    #[error("token not found")]
    MissingToken,

    /// JWT decoding, signature or claim validation failed.
    #[error("invalid JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The token header algorithm is not the one configured for the issuer.
    #[error("invalid algorithm: expected {expected:?}, got {actual:?}")]
    AlgorithmMismatch {
        /// Algorithm configured for the issuer.
        expected: jsonwebtoken::Algorithm,
        /// Algorithm announced by the token header.
        actual: jsonwebtoken::Algorithm,
    },

    /// The JWT header carries no `kid` field.
    #[error("no key id in token header")]
    MissingKeyId,

    /// The `kid` from the token header is not in the issuer's JWKS.
    #[error("no JWT key with id {0:?}")]
    UnknownKeyId(String),

    /// Network-level failure while fetching from the identity provider.
    #[error("fetch error: {0}")]
    Http(#[from] reqwest::Error),

    /// The identity provider answered with a non-success status.
    #[error("server response error from {uri} ({status})")]
    Status {
        /// The URI that was fetched.
        uri: String,
        /// The HTTP status received.
        status: reqwest::StatusCode,
    },

    /// The identity provider answered with a non-JSON content type.
    #[error("{uri} has not a JSON content-type")]
    NotJson {
        /// The URI that was fetched.
        uri: String,
    },

    /// The discovery document is missing required attributes.
    #[error("{0}")]
    Discovery(String),

    /// A cached or fetched document failed to parse.
    #[error("{0}")]
    Parse(String),

    /// The token payload or userinfo document lacks usable claims.
    #[error("failed to extract user info: {0}")]
    Extract(String),
}

/// Process-lived map of issuer URL to authenticator.
///
/// Authenticators are created lazily on first use of an issuer and never
/// destroyed, so their caches keep warming across configuration reloads.
#[derive(Default)]
pub struct AuthenticatorRegistry {
    authenticators: DashMap<String, Arc<OpenIdAuthenticator>>,
}

impl AuthenticatorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the authenticator for `issuer`, creating it on first use.
    ///
    /// # Errors
    ///
    /// A *new* issuer must be a valid URL with the `https://` scheme;
    /// already-registered issuers were validated when first seen.
    pub fn get_or_create(&self, issuer: &str) -> Result<Arc<OpenIdAuthenticator>> {
        if let Some(existing) = self.authenticators.get(issuer) {
            return Ok(Arc::clone(existing.value()));
        }

        let url = Url::parse(issuer)
            .map_err(|e| Error::Config(format!("invalid identity provider {issuer:?}: {e}")))?;
        if url.scheme() != "https" {
            return Err(Error::InsecureIssuer(issuer.to_string()));
        }

        let entry = self
            .authenticators
            .entry(issuer.to_string())
            .or_insert_with(|| Arc::new(OpenIdAuthenticator::new(issuer)));
        Ok(Arc::clone(entry.value()))
    }

    /// Register a prebuilt authenticator, bypassing scheme validation.
    /// Test seam for plain-http mock identity providers.
    #[cfg(test)]
    pub(crate) fn insert(&self, issuer: &str, authenticator: Arc<OpenIdAuthenticator>) {
        self.authenticators.insert(issuer.to_string(), authenticator);
    }

    /// Number of known issuers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.authenticators.len()
    }

    /// Whether no issuer has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }

    /// Run the expired-entry sweep on every authenticator cache.
    pub fn evict_expired(&self) {
        for entry in &self.authenticators {
            entry.value().evict_expired();
        }
    }
}
