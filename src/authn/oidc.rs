//! OpenID Connect bearer token validation.
//!
//! # Validation flow
//!
//! 1. Read the `Authorization` header; require a `Bearer ` prefix
//!    (case-insensitive).
//! 2. A token without any `.` may be an opaque access token: try the
//!    userinfo endpoint from the cached discovery document. On failure,
//!    fall through to the ID-token path.
//! 3. Decode the JWT header; require the configured signature algorithm
//!    (RS256 unless overridden) and a `kid` present in the issuer's JWKS.
//! 4. Verify the signature and the `iss`, `aud`, `exp` and `nbf` claims —
//!    the audience must contain the relying party's service identifier;
//!    60 seconds of clock skew are tolerated.
//! 5. Extract the claims into a [`UserInfo`].
//!
//! Discovery documents, JWKS and userinfo responses are cached as raw bytes
//! for [`CACHE_TTL`](super::CACHE_TTL) and parsed again on every use. A
//! failed refresh of discovery or JWKS falls back on the previous (possibly
//! expired) bytes; failures themselves are never cached.

use axum::http::{HeaderMap, header};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::cache::TtlCache;
use super::claims::ClaimExtractor;
use super::{AuthnError, CACHE_TTL, FETCH_TIMEOUT, UserInfo};

/// Clock skew tolerated when validating `exp` and `nbf`, in seconds.
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// The OpenID provider metadata we need from the discovery document.
#[derive(Debug, Deserialize)]
struct OpenIdConfiguration {
    #[serde(default)]
    jwks_uri: String,
    #[serde(default)]
    userinfo_endpoint: String,
}

/// Per-issuer OpenID Connect authenticator.
///
/// Create one per identity provider URL (the
/// [`AuthenticatorRegistry`](super::AuthenticatorRegistry) does this and
/// enforces the `https://` scheme) and share it across services: the
/// instance owns the caches that make repeated validations cheap.
#[derive(Debug)]
pub struct OpenIdAuthenticator {
    issuer: String,
    algorithm: Algorithm,
    extractor: ClaimExtractor,
    cache: TtlCache,
    http: reqwest::Client,
}

impl OpenIdAuthenticator {
    /// Authenticator for `issuer` with the default RS256 signature algorithm.
    #[must_use]
    pub fn new(issuer: &str) -> Self {
        Self::with_algorithm(issuer, Algorithm::RS256)
    }

    /// Authenticator for `issuer` expecting the given signature algorithm.
    #[must_use]
    pub fn with_algorithm(issuer: &str, algorithm: Algorithm) -> Self {
        Self {
            issuer: issuer.to_string(),
            algorithm,
            extractor: ClaimExtractor::for_issuer(issuer),
            cache: TtlCache::new(CACHE_TTL),
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// The issuer URL this authenticator validates against.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Fetch and parse the discovery document, proving the issuer is
    /// dereferenceable. Called at configuration load time.
    pub async fn discover(&self) -> Result<(), AuthnError> {
        self.configuration().await.map(|_| ())
    }

    /// Authenticate a request and return the user it identifies.
    ///
    /// `audience` is the relying party's service identifier (the `Origin`
    /// header of the request being authorized); ID tokens must list it in
    /// their `aud` claim.
    pub async fn validate_request(
        &self,
        headers: &HeaderMap,
        audience: &str,
    ) -> Result<UserInfo, AuthnError> {
        let token = bearer_token(headers)?;

        if !token.contains('.') {
            // No dots, could be an opaque access token: try the userinfo
            // endpoint before treating it as a (necessarily invalid) JWT.
            match self.fetch_user_info(&token).await {
                Ok(user) => return Ok(user),
                Err(e) => debug!(issuer = %self.issuer, error = %e, "userinfo lookup failed, trying JWT path"),
            }
        }

        self.validate_jwt(&token, audience).await
    }

    /// Fetch the user profile for an opaque access token.
    ///
    /// The response is cached with the access token as key, so repeated
    /// requests with the same token cost one remote call per TTL window.
    pub async fn fetch_user_info(&self, access_token: &str) -> Result<UserInfo, AuthnError> {
        let key = format!("userinfo:{access_token}");
        if let Some(data) = self.cache.fresh(&key) {
            return self.extractor.extract(&data);
        }

        let config = self.configuration().await?;
        if config.userinfo_endpoint.is_empty() {
            return Err(AuthnError::Discovery(
                "no userinfo_endpoint attribute in OpenID configuration".to_string(),
            ));
        }

        let data = self
            .cache
            .fetch_through(&key, false, || {
                download_json(&self.http, &config.userinfo_endpoint, Some(access_token))
            })
            .await?;
        self.extractor.extract(&data)
    }

    /// Validate a signed ID token and extract its claims.
    pub async fn validate_jwt(&self, token: &str, audience: &str) -> Result<UserInfo, AuthnError> {
        let header = jsonwebtoken::decode_header(token)?;
        if header.alg != self.algorithm {
            return Err(AuthnError::AlgorithmMismatch {
                expected: self.algorithm,
                actual: header.alg,
            });
        }
        let kid = header.kid.ok_or(AuthnError::MissingKeyId)?;

        let jwks = self.jwks().await?;
        let key = jwks
            .keys
            .iter()
            .find(|jwk| jwk.common.key_id.as_deref() == Some(kid.as_str()))
            .and_then(decoding_key)
            .ok_or_else(|| AuthnError::UnknownKeyId(kid.clone()))?;

        let mut validation = Validation::new(self.algorithm);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.validate_nbf = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let data = jsonwebtoken::decode::<serde_json::Value>(token, &key, &validation)?;
        let payload =
            serde_json::to_vec(&data.claims).map_err(|e| AuthnError::Parse(e.to_string()))?;
        self.extractor.extract(&payload)
    }

    /// Sweep cache entries that are too old even for stale fallback.
    pub fn evict_expired(&self) {
        // Keep recently-expired entries around: they back the
        // stale-on-fetch-failure path for discovery and JWKS.
        self.cache.evict_expired(CACHE_TTL);
    }

    async fn configuration(&self) -> Result<OpenIdConfiguration, AuthnError> {
        let key = format!("config:{}", self.issuer);
        let uri = format!(
            "{}/.well-known/openid-configuration",
            self.issuer.trim_end_matches('/')
        );
        let data = self
            .cache
            .fetch_through(&key, true, || download_json(&self.http, &uri, None))
            .await?;

        let config: OpenIdConfiguration = serde_json::from_slice(&data)
            .map_err(|e| AuthnError::Parse(format!("failed to parse OpenID configuration: {e}")))?;
        if config.jwks_uri.is_empty() {
            return Err(AuthnError::Discovery(
                "no jwks_uri attribute in OpenID configuration".to_string(),
            ));
        }
        Ok(config)
    }

    async fn jwks(&self) -> Result<JwkSet, AuthnError> {
        let key = format!("jwks:{}", self.issuer);
        let data = match self.cache.fresh(&key) {
            Some(data) => data,
            None => {
                let config = self.configuration().await?;
                self.cache
                    .fetch_through(&key, true, || {
                        download_json(&self.http, &config.jwks_uri, None)
                    })
                    .await?
            }
        };

        let jwks: JwkSet = serde_json::from_slice(&data)
            .map_err(|e| AuthnError::Parse(format!("failed to parse JWKS: {e}")))?;
        if jwks.keys.is_empty() {
            return Err(AuthnError::Discovery("no JWKS found".to_string()));
        }
        Ok(jwks)
    }
}

/// Read the bearer token out of the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Result<String, AuthnError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if value.len() > 7 && value[..7].eq_ignore_ascii_case("bearer ") {
        Ok(value[7..].to_string())
    } else {
        Err(AuthnError::MissingToken)
    }
}

/// Convert a JWK into a verification key.
///
/// Octet (symmetric) keys are supported besides RSA and EC so that the
/// whole verification path can run against HMAC-signed tokens.
fn decoding_key(jwk: &Jwk) -> Option<DecodingKey> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKey(oct) => {
            let secret = URL_SAFE_NO_PAD.decode(&oct.value).ok()?;
            Some(DecodingKey::from_secret(&secret))
        }
        AlgorithmParameters::OctetKeyPair(_) => None,
    }
}

async fn download_json(
    http: &reqwest::Client,
    uri: &str,
    bearer: Option<&str>,
) -> Result<Bytes, AuthnError> {
    debug!(uri = %uri, "fetch JSON");
    let mut request = http.get(uri).header(header::ACCEPT, "application/json");
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    if response.status() != StatusCode::OK {
        return Err(AuthnError::Status {
            uri: uri.to_string(),
            status: response.status(),
        });
    }
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("application/json") {
        return Err(AuthnError::NotJson {
            uri: uri.to_string(),
        });
    }
    Ok(response.bytes().await?)
}
