//! Condition library — pluggable predicates over the request context.
//!
//! Each condition inspects the context value stored under its key and the
//! candidate subject currently being evaluated. Conditions fail closed: an
//! absent key or a value of the wrong shape never fulfills.
//!
//! The set of condition behaviors is a closed enum so evaluation is an
//! exhaustive match, but loading goes through an open [`ConditionRegistry`]
//! keyed by the type tag written in policies files, so deployments can
//! register additional builders. An unknown tag fails the whole reload.

use std::collections::HashMap;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// A compiled condition, ready to evaluate.
#[derive(Debug, Clone)]
pub enum Condition {
    /// True when the context value equals a fixed string, case-sensitively.
    StringEqual {
        /// Expected value.
        equals: String,
    },
    /// True when the context value fully matches an anchored regex.
    StringMatch {
        /// Compiled, anchored pattern.
        matches: Regex,
    },
    /// True when the context value is an IP address inside a CIDR block.
    Cidr {
        /// The block to test membership against.
        cidr: IpNetwork,
    },
    /// True when the context value equals a boolean literal.
    Boolean {
        /// Expected value.
        boolean: bool,
    },
    /// True when the context value is the current candidate subject, or a
    /// sequence containing it. Combined with subject iteration this lets a
    /// single policy express "the request field X identifies the actor".
    MatchPrincipals,
}

impl Condition {
    /// Evaluate this condition against a context value and the candidate
    /// subject. `None` means the context key was absent.
    #[must_use]
    pub fn fulfills(&self, value: Option<&Value>, subject: &str) -> bool {
        match self {
            Self::StringEqual { equals } => value.and_then(Value::as_str) == Some(equals),
            Self::StringMatch { matches } => {
                value.and_then(Value::as_str).is_some_and(|s| matches.is_match(s))
            }
            Self::Cidr { cidr } => value
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<IpAddr>().ok())
                .is_some_and(|ip| cidr.contains(ip)),
            Self::Boolean { boolean } => value.and_then(Value::as_bool) == Some(*boolean),
            Self::MatchPrincipals => match value {
                Some(Value::String(s)) => s == subject,
                Some(Value::Array(items)) => {
                    items.iter().any(|item| item.as_str() == Some(subject))
                }
                _ => false,
            },
        }
    }
}

/// Builds a [`Condition`] from the `options` mapping of a policies file.
pub type ConditionBuilder = fn(&Value) -> Result<Condition>;

/// Registry of condition builders, keyed by the type tag used in policies
/// files.
pub struct ConditionRegistry {
    builders: HashMap<String, ConditionBuilder>,
}

impl ConditionRegistry {
    /// A registry with the built-in condition types registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            builders: HashMap::new(),
        };
        registry.register("StringEqualCondition", build_string_equal);
        registry.register("StringMatchCondition", build_string_match);
        registry.register("CIDRCondition", build_cidr);
        registry.register("BooleanCondition", build_boolean);
        registry.register("MatchPrincipalsCondition", build_match_principals);
        registry
    }

    /// Register (or replace) a builder under a type tag.
    pub fn register(&mut self, kind: &str, builder: ConditionBuilder) {
        self.builders.insert(kind.to_string(), builder);
    }

    /// Instantiate a condition from its type tag and options.
    ///
    /// # Errors
    ///
    /// `UnknownCondition` for an unregistered tag, or a configuration error
    /// from the builder when the options do not fit.
    pub fn build(&self, kind: &str, options: &Value) -> Result<Condition> {
        let builder = self
            .builders
            .get(kind)
            .ok_or_else(|| Error::UnknownCondition(kind.to_string()))?;
        builder(options)
    }
}

fn parse_options<T: for<'de> Deserialize<'de>>(kind: &str, options: &Value) -> Result<T> {
    serde_json::from_value(options.clone())
        .map_err(|e| Error::Config(format!("invalid options for {kind}: {e}")))
}

fn build_string_equal(options: &Value) -> Result<Condition> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Options {
        equals: String,
    }
    let opts: Options = parse_options("StringEqualCondition", options)?;
    Ok(Condition::StringEqual { equals: opts.equals })
}

fn build_string_match(options: &Value) -> Result<Condition> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Options {
        matches: String,
    }
    let opts: Options = parse_options("StringMatchCondition", options)?;
    let matches = Regex::new(&format!("^(?:{})$", opts.matches)).map_err(|source| {
        Error::InvalidRegex {
            pattern: opts.matches.clone(),
            source,
        }
    })?;
    Ok(Condition::StringMatch { matches })
}

fn build_cidr(options: &Value) -> Result<Condition> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Options {
        cidr: String,
    }
    let opts: Options = parse_options("CIDRCondition", options)?;
    let cidr = opts
        .cidr
        .parse::<IpNetwork>()
        .map_err(|e| Error::Config(format!("invalid CIDR {:?}: {e}", opts.cidr)))?;
    Ok(Condition::Cidr { cidr })
}

fn build_boolean(options: &Value) -> Result<Condition> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Options {
        boolean: bool,
    }
    let opts: Options = parse_options("BooleanCondition", options)?;
    Ok(Condition::Boolean { boolean: opts.boolean })
}

fn build_match_principals(options: &Value) -> Result<Condition> {
    let no_options = options.is_null() || options.as_object().is_some_and(serde_json::Map::is_empty);
    if !no_options {
        return Err(Error::Config(
            "MatchPrincipalsCondition takes no options".to_string(),
        ));
    }
    Ok(Condition::MatchPrincipals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(kind: &str, options: Value) -> Condition {
        ConditionRegistry::with_builtins().build(kind, &options).unwrap()
    }

    #[test]
    fn string_equal_is_case_sensitive() {
        let condition = build("StringEqualCondition", json!({"equals": "mars"}));

        assert!(condition.fulfills(Some(&json!("mars")), "any"));
        assert!(!condition.fulfills(Some(&json!("Mars")), "any"));
        assert!(!condition.fulfills(Some(&json!(42)), "any"));
        assert!(!condition.fulfills(None, "any"));
    }

    #[test]
    fn string_match_requires_a_full_match() {
        let condition = build("StringMatchCondition", json!({"matches": ".*\\.mozilla\\.org"}));

        assert!(condition.fulfills(Some(&json!("kinto.mozilla.org")), "any"));
        assert!(!condition.fulfills(Some(&json!("kinto-storage.org")), "any"));
        // Anchoring: trailing garbage breaks the match.
        assert!(!condition.fulfills(Some(&json!("kinto.mozilla.org:8000")), "any"));
    }

    #[test]
    fn cidr_membership() {
        let condition = build("CIDRCondition", json!({"cidr": "127.0.0.0/8"}));

        assert!(condition.fulfills(Some(&json!("127.0.0.1")), "any"));
        assert!(condition.fulfills(Some(&json!("127.255.0.1")), "any"));
        assert!(!condition.fulfills(Some(&json!("10.0.0.1")), "any"));
        assert!(!condition.fulfills(Some(&json!("not-an-ip")), "any"));
    }

    #[test]
    fn boolean_literal() {
        let condition = build("BooleanCondition", json!({"boolean": true}));

        assert!(condition.fulfills(Some(&json!(true)), "any"));
        assert!(!condition.fulfills(Some(&json!(false)), "any"));
        assert!(!condition.fulfills(Some(&json!("true")), "any"));
    }

    #[test]
    fn match_principals_accepts_subject_or_sequence() {
        let condition = build("MatchPrincipalsCondition", Value::Null);

        assert!(condition.fulfills(Some(&json!("userid:bilbo")), "userid:bilbo"));
        assert!(condition.fulfills(
            Some(&json!(["userid:alice", "userid:bilbo"])),
            "userid:bilbo"
        ));
        assert!(!condition.fulfills(Some(&json!("userid:gollum")), "userid:bilbo"));
        assert!(!condition.fulfills(None, "userid:bilbo"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = ConditionRegistry::with_builtins()
            .build("healthy", &Value::Null)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownCondition(_)));
    }

    #[test]
    fn unknown_option_fields_are_rejected() {
        let err = ConditionRegistry::with_builtins()
            .build("StringEqualCondition", &json!({"equals": "x", "extra": 1}))
            .unwrap_err();
        assert!(err.to_string().contains("invalid options"));
    }

    #[test]
    fn invalid_condition_regex_is_rejected() {
        let err = ConditionRegistry::with_builtins()
            .build("StringMatchCondition", &json!({"matches": "*bad"}))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRegex { .. }));
    }

    #[test]
    fn custom_builders_can_be_registered() {
        let mut registry = ConditionRegistry::with_builtins();
        registry.register("AlwaysTrueCondition", |_| {
            Ok(Condition::Boolean { boolean: true })
        });

        let condition = registry.build("AlwaysTrueCondition", &Value::Null).unwrap();
        assert!(condition.fulfills(Some(&json!(true)), "any"));
    }
}
