//! Claim extraction from JWT payloads and userinfo documents.

use serde::Deserialize;

use super::{AuthnError, UserInfo};

/// Turns raw claim JSON into a [`UserInfo`].
///
/// The generic extractor reads the standard `sub` / `email` / `groups`
/// claims. Mozilla's Auth0 tenant namespaces emails and groups under
/// `https://sso.mozilla.com/claim/…`, so issuers on that tenant get a
/// dedicated extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimExtractor {
    /// Standard OIDC claims.
    Generic,
    /// Mozilla SSO namespaced claims.
    Mozilla,
}

#[derive(Deserialize)]
struct GenericClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
}

#[derive(Deserialize)]
struct MozillaClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, rename = "https://sso.mozilla.com/claim/emails")]
    emails: Vec<String>,
    #[serde(default, rename = "https://sso.mozilla.com/claim/groups")]
    groups: Vec<String>,
}

impl ClaimExtractor {
    /// Pick the extractor for an issuer URL.
    pub(crate) fn for_issuer(issuer: &str) -> Self {
        if issuer.contains("mozilla.auth0.com") {
            Self::Mozilla
        } else {
            Self::Generic
        }
    }

    /// Extract a [`UserInfo`] from raw claim JSON bytes.
    pub(crate) fn extract(self, data: &[u8]) -> Result<UserInfo, AuthnError> {
        match self {
            Self::Generic => {
                let claims: GenericClaims = parse(data)?;
                Ok(UserInfo {
                    id: claims.sub,
                    email: claims.email.unwrap_or_default(),
                    groups: claims.groups,
                })
            }
            Self::Mozilla => {
                let claims: MozillaClaims = parse(data)?;
                // The JWT may have been requested without the `email` scope;
                // fall back on the first namespaced email.
                let email = claims
                    .email
                    .filter(|email| !email.is_empty())
                    .or_else(|| claims.emails.into_iter().next())
                    .unwrap_or_default();
                Ok(UserInfo {
                    id: claims.sub,
                    email,
                    groups: claims.groups,
                })
            }
        }
    }
}

fn parse<'de, T: Deserialize<'de>>(data: &'de [u8]) -> Result<T, AuthnError> {
    serde_json::from_slice(data).map_err(|e| AuthnError::Extract(e.to_string()))
}
