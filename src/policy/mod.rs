//! Policy model and matching engine.
//!
//! A policy matches a candidate subject, an action and a resource through
//! OR-joined pattern lists, then checks its conditions against the request
//! context. Patterns written `<…>` are regexes; anything else matches
//! literally. All patterns are compiled once at load time into anchored
//! regexes, so matching at request time is allocation-free.

mod condition;
mod set;

pub use condition::{Condition, ConditionBuilder, ConditionRegistry};
pub use set::{Evaluation, PolicySet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::PolicyConfig;
use crate::{Error, Result};

/// Environmental context of an authorization request.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// The authorization request, as posted by the relying party.
///
/// Every field may be omitted from the JSON body; principals in particular
/// are forbidden in the body when authentication is enabled for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    /// Strings that identify the user (`userid:`, `email:`, `group:`, ...).
    pub principals: Vec<String>,
    /// The resource that access is requested to.
    pub resource: String,
    /// The action that is requested on the resource.
    pub action: String,
    /// The request's environmental context.
    pub context: Context,
}

impl Request {
    /// Read the roles from the request context as `role:<name>` principals.
    ///
    /// Only string elements of a `roles` sequence are considered; anything
    /// else in there is ignored.
    #[must_use]
    pub fn roles(&self) -> Vec<String> {
        let Some(serde_json::Value::Array(roles)) = self.context.get("roles") else {
            return Vec::new();
        };
        roles
            .iter()
            .filter_map(|role| role.as_str())
            .map(|role| format!("role:{role}"))
            .collect()
    }
}

/// Whether a matching policy grants or refuses access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// A match grants access, unless a deny policy also matches.
    Allow,
    /// A match refuses access, regardless of matching allow policies.
    Deny,
}

/// Compile one pattern to an anchored regex.
///
/// `<inner>` keeps `inner` as a regex; a bare string is escaped so that it
/// matches exactly and only itself.
pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex> {
    let anchored = match pattern
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
    {
        Some(inner) => format!("^(?:{inner})$"),
        None => format!("^{}$", regex::escape(pattern)),
    };
    Regex::new(&anchored).map_err(|source| Error::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| compile_pattern(p)).collect()
}

/// A policy with its patterns compiled and its conditions instantiated.
///
/// Immutable once built; freely shared across request-handling threads.
#[derive(Debug)]
pub struct CompiledPolicy {
    /// Policy identifier, unique within its service.
    pub id: String,
    /// Free-text description from the policies file.
    pub description: String,
    /// Whether a match grants or refuses access.
    pub effect: Effect,
    principals: Vec<Regex>,
    actions: Vec<Regex>,
    resources: Vec<Regex>,
    conditions: Vec<(String, Condition)>,
}

impl CompiledPolicy {
    /// Compile a policy read from a configuration file.
    ///
    /// # Errors
    ///
    /// Fails on an empty id, an invalid pattern, or a condition type the
    /// registry does not know.
    pub fn compile(config: &PolicyConfig, registry: &ConditionRegistry) -> Result<Self> {
        if config.id.is_empty() {
            return Err(Error::Config("policy with empty id".to_string()));
        }
        let conditions = config
            .conditions
            .iter()
            .map(|(key, condition)| {
                Ok((
                    key.clone(),
                    registry.build(&condition.kind, &condition.options)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id: config.id.clone(),
            description: config.description.clone(),
            effect: config.effect,
            principals: compile_patterns(&config.principals)?,
            actions: compile_patterns(&config.actions)?,
            resources: compile_patterns(&config.resources)?,
            conditions,
        })
    }

    /// Whether this policy applies to the candidate subject and request.
    ///
    /// A policy matches when some principal pattern matches the subject,
    /// some action pattern matches the action, some resource pattern matches
    /// the resource, and every condition is fulfilled by the context. Empty
    /// pattern lists never match.
    #[must_use]
    pub fn matches(&self, subject: &str, action: &str, resource: &str, context: &Context) -> bool {
        if !self.principals.iter().any(|p| p.is_match(subject)) {
            return false;
        }
        if !self.actions.iter().any(|a| a.is_match(action)) {
            return false;
        }
        if !self.resources.iter().any(|r| r.is_match(resource)) {
            return false;
        }
        self.conditions
            .iter()
            .all(|(key, condition)| condition.fulfills(context.get(key), subject))
    }
}
