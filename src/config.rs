//! Service configuration model
//!
//! A policies file declares one service: its identity provider, its named
//! tags and its ordered list of policies. Files are YAML:
//!
//! ```yaml
//! service: https://api.example.com
//! identityProvider: https://auth.mozilla.auth0.com/
//! tags:
//!   admins:
//!     - userid:maria
//! policies:
//!   - id: blocklist-editors
//!     description: Allow editors to update the blocklist
//!     principals: ["group:editors", "tag:admins"]
//!     actions: ["update"]
//!     resources: ["<.*>"]
//!     effect: allow
//! ```
//!
//! Patterns wrapped in `<…>` are regexes; anything else matches literally.
//! Parsing stays purely structural here; regex compilation and condition
//! instantiation happen when the [`crate::registry::ServiceRegistry`] loads
//! the configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::policy::Effect;
use crate::{Error, Result};

/// Tags map a local tag name to the set of principals carrying it.
pub type Tags = BTreeMap<String, Vec<String>>;

/// One service declaration, as read from a policies file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service identifier, matched against the `Origin` request header.
    pub service: String,
    /// OpenID Connect issuer URL. Empty or omitted disables authentication
    /// for this service: callers must then post their principals themselves.
    #[serde(rename = "identityProvider", deserialize_with = "string_or_null")]
    pub identity_provider: String,
    /// Named sets of principals, expanded into `tag:<name>` at request time.
    pub tags: Tags,
    /// Ordered policies. Order is preserved through evaluation and audit.
    pub policies: Vec<PolicyConfig>,
    /// Where this configuration was loaded from. Stamped by the loader,
    /// used in error and lint messages only.
    #[serde(skip)]
    pub source: String,
}

/// One policy, as read from a policies file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Unique (per service), non-empty identifier.
    pub id: String,
    /// Free-text description.
    pub description: String,
    /// Patterns matched against each candidate subject. OR-joined.
    pub principals: Vec<String>,
    /// Patterns matched against the request action. OR-joined.
    pub actions: Vec<String>,
    /// Patterns matched against the request resource. OR-joined.
    pub resources: Vec<String>,
    /// Whether a match grants or refuses access.
    pub effect: Effect,
    /// Conditions keyed by the context field they inspect.
    pub conditions: BTreeMap<String, ConditionConfig>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            description: String::new(),
            principals: Vec::new(),
            actions: Vec::new(),
            resources: Vec::new(),
            effect: Effect::Deny,
            conditions: BTreeMap::new(),
        }
    }
}

/// A condition as declared in a policies file: a type tag plus free-form
/// options, resolved through the [`crate::policy::ConditionRegistry`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Registered condition type name (e.g. `StringEqualCondition`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific options.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Accept a bare `identityProvider:` key (YAML null) as the empty string.
fn string_or_null<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

/// Parse one policies file content.
pub fn parse_service_config(content: &str, source: &str) -> Result<ServiceConfig> {
    if content.trim().is_empty() {
        return Err(Error::Config(format!("empty file {source:?}")));
    }
    let mut config: ServiceConfig = serde_yaml::from_str(content)?;
    config.source = source.to_string();
    Ok(config)
}

/// Inspect service configurations and warn (or fail) on suspicious content.
///
/// An empty `service` is an error; everything else only logs. The warnings
/// nudge policy authors away from coupling policies to a specific HTTP API
/// surface.
pub fn lint_configs(configs: &[ServiceConfig]) -> Result<()> {
    for config in configs {
        if config.service.is_empty() {
            return Err(Error::Config(format!("empty service in {:?}", config.source)));
        }

        if config.policies.is_empty() {
            warn!(source = %config.source, "No policies found");
        } else {
            info!(service = %config.service, policies = config.policies.len(), tags = config.tags.len(), "Found service");
        }

        for policy in &config.policies {
            for action in &policy.actions {
                if matches!(action.to_lowercase().as_str(), "get" | "put" | "post" | "delete") {
                    warn!(policy = %policy.id, source = %config.source, "Avoid coupling of actions with HTTP verbs");
                }
            }
            for resource in &policy.resources {
                if resource.starts_with('/') {
                    warn!(policy = %policy.id, source = %config.source, "Avoid coupling of resources with API URIs");
                }
            }
        }
    }
    Ok(())
}
