//! Ordered policy collection for one service, with deny-wins evaluation.

use std::collections::HashSet;
use std::sync::Arc;

use crate::audit::{Decision, DecisionSink};
use crate::config::PolicyConfig;
use crate::{Error, Result};

use super::{CompiledPolicy, ConditionRegistry, Context, Effect};

/// Outcome of one policy-set evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Whether access was granted.
    pub allowed: bool,
    /// Ids of the deciding policies (last matching deny, else last matching
    /// allow, else empty).
    pub policies: Vec<String>,
    /// The last candidate subject tested.
    pub subject: Option<String>,
}

/// The compiled, ordered policies of one service.
///
/// Built once per (re)load, then shared immutably across request threads.
/// Every evaluation is reported to the decision sink.
pub struct PolicySet {
    service: String,
    policies: Vec<CompiledPolicy>,
    sink: Arc<dyn DecisionSink>,
}

impl std::fmt::Debug for PolicySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicySet")
            .field("service", &self.service)
            .field("policies", &self.policies)
            .field("sink", &"<dyn DecisionSink>")
            .finish()
    }
}

impl PolicySet {
    /// Compile the ordered policies of a service.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate policy id, an invalid pattern, or an unknown
    /// condition type. Any failure aborts the whole set.
    pub fn compile(
        service: &str,
        configs: &[PolicyConfig],
        registry: &ConditionRegistry,
        sink: Arc<dyn DecisionSink>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut policies = Vec::with_capacity(configs.len());
        for config in configs {
            let compiled = CompiledPolicy::compile(config, registry)?;
            if !seen.insert(compiled.id.clone()) {
                return Err(Error::DuplicatePolicy {
                    service: service.to_string(),
                    id: compiled.id,
                });
            }
            tracing::debug!(policy = %compiled.id, description = %compiled.description, "Load policy");
            policies.push(compiled);
        }
        Ok(Self {
            service: service.to_string(),
            policies,
            sink,
        })
    }

    /// Number of policies in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the set holds no policies (every request is then denied).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Evaluate a request with deny-wins semantics.
    ///
    /// Each principal is tried in order as the candidate subject. For a
    /// subject, one matching deny refuses the request immediately; at least
    /// one matching allow (and no deny) grants it. When no subject produces
    /// a match the request is denied by default.
    pub fn evaluate(
        &self,
        principals: &[String],
        action: &str,
        resource: &str,
        context: &Context,
    ) -> Evaluation {
        for subject in principals {
            let matching: Vec<&CompiledPolicy> = self
                .policies
                .iter()
                .filter(|policy| policy.matches(subject, action, resource, context))
                .collect();

            if let Some(deny) = matching.iter().rev().find(|p| p.effect == Effect::Deny) {
                return self.record(false, vec![deny.id.clone()], Some(subject.clone()),
                    principals, action, resource, context);
            }
            if let Some(allow) = matching.last() {
                return self.record(true, vec![allow.id.clone()], Some(subject.clone()),
                    principals, action, resource, context);
            }
        }

        self.record(false, Vec::new(), principals.last().cloned(),
            principals, action, resource, context)
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        allowed: bool,
        policies: Vec<String>,
        subject: Option<String>,
        principals: &[String],
        action: &str,
        resource: &str,
        context: &Context,
    ) -> Evaluation {
        self.sink.on_decision(&Decision {
            allowed,
            service: self.service.clone(),
            subject: subject.clone(),
            principals: principals.to_vec(),
            action: action.to_string(),
            resource: resource.to_string(),
            context: context.clone(),
            policies: policies.clone(),
        });
        Evaluation {
            allowed,
            policies,
            subject,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use crate::audit::NullSink;
    use crate::config::ConditionConfig;

    use super::*;

    /// Captures decisions so tests can assert on the audit trail.
    #[derive(Default)]
    struct RecordingSink {
        decisions: Mutex<Vec<Decision>>,
    }

    impl DecisionSink for RecordingSink {
        fn on_decision(&self, decision: &Decision) {
            self.decisions.lock().unwrap().push(decision.clone());
        }
    }

    fn policy(id: &str, principals: &[&str], actions: &[&str], resources: &[&str], effect: Effect) -> PolicyConfig {
        PolicyConfig {
            id: id.to_string(),
            principals: principals.iter().map(ToString::to_string).collect(),
            actions: actions.iter().map(ToString::to_string).collect(),
            resources: resources.iter().map(ToString::to_string).collect(),
            effect,
            ..PolicyConfig::default()
        }
    }

    fn with_condition(mut config: PolicyConfig, key: &str, kind: &str, options: serde_json::Value) -> PolicyConfig {
        config.conditions.insert(
            key.to_string(),
            ConditionConfig {
                kind: kind.to_string(),
                options,
            },
        );
        config
    }

    fn sample_set(sink: Arc<dyn DecisionSink>) -> PolicySet {
        let configs = vec![
            policy("1", &["userid:foo", "tag:admins"], &["update"], &["<.*>"], Effect::Allow),
            with_condition(
                policy("2", &["<.*>"], &["<.*>"], &["<.*>"], Effect::Deny),
                "planet",
                "StringEqualCondition",
                json!({"equals": "mars"}),
            ),
            with_condition(
                policy("3", &["<.*>"], &["read"], &["<.*>"], Effect::Allow),
                "ip",
                "CIDRCondition",
                json!({"cidr": "127.0.0.0/8"}),
            ),
            with_condition(
                policy("4", &["<.*>"], &["<.*>"], &["<.*>"], Effect::Allow),
                "owner",
                "MatchPrincipalsCondition",
                serde_json::Value::Null,
            ),
        ];
        PolicySet::compile(
            "https://sample.yaml",
            &configs,
            &ConditionRegistry::with_builtins(),
            sink,
        )
        .unwrap()
    }

    fn context(value: serde_json::Value) -> Context {
        value.as_object().unwrap().clone()
    }

    fn principals(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn allow_by_principal_pattern() {
        let set = sample_set(Arc::new(NullSink));
        let evaluation = set.evaluate(
            &principals(&["userid:foo"]),
            "update",
            "server.org/blocklist:onecrl",
            &Context::new(),
        );

        assert!(evaluation.allowed);
        assert_eq!(evaluation.policies, vec!["1"]);
        assert_eq!(evaluation.subject.as_deref(), Some("userid:foo"));
    }

    #[test]
    fn deny_wins_over_matching_allow() {
        let set = sample_set(Arc::new(NullSink));
        // Policy 1 allows this request but policy 2 denies it on mars.
        let evaluation = set.evaluate(
            &principals(&["userid:foo"]),
            "update",
            "server.org/blocklist:onecrl",
            &context(json!({"planet": "mars"})),
        );

        assert!(!evaluation.allowed);
        assert_eq!(evaluation.policies, vec!["2"]);
    }

    #[test]
    fn deny_condition_is_case_sensitive() {
        let set = sample_set(Arc::new(NullSink));
        let evaluation = set.evaluate(
            &principals(&["userid:foo"]),
            "update",
            "server.org/blocklist:onecrl",
            &context(json!({"planet": "Mars"})),
        );

        // Policy 2 does not match; policy 1 still does.
        assert!(evaluation.allowed);
        assert_eq!(evaluation.policies, vec!["1"]);
    }

    #[test]
    fn cidr_gates_the_read_action() {
        let set = sample_set(Arc::new(NullSink));

        let inside = set.evaluate(
            &principals(&["userid:foo"]),
            "read",
            "server.org/blocklist:onecrl",
            &context(json!({"ip": "127.0.0.1"})),
        );
        assert!(inside.allowed);

        let outside = set.evaluate(
            &principals(&["userid:foo"]),
            "read",
            "server.org/blocklist:onecrl",
            &context(json!({"ip": "10.0.0.1"})),
        );
        assert!(!outside.allowed);
    }

    #[test]
    fn match_principals_grants_self_access() {
        let set = sample_set(Arc::new(NullSink));

        let owner = set.evaluate(
            &principals(&["userid:bilbo"]),
            "wear",
            "ring",
            &context(json!({"owner": "userid:bilbo"})),
        );
        assert!(owner.allowed);
        assert_eq!(owner.policies, vec!["4"]);

        let listed = set.evaluate(
            &principals(&["userid:bilbo"]),
            "wear",
            "ring",
            &context(json!({"owner": ["userid:alice", "userid:bilbo"]})),
        );
        assert!(listed.allowed);

        let other = set.evaluate(
            &principals(&["userid:gollum"]),
            "wear",
            "ring",
            &context(json!({"owner": "userid:bilbo"})),
        );
        assert!(!other.allowed);
    }

    #[test]
    fn default_deny_when_nothing_matches() {
        let set = sample_set(Arc::new(NullSink));
        let evaluation = set.evaluate(
            &principals(&["userid:foo"]),
            "delete",
            "server.org/blocklist:onecrl",
            &Context::new(),
        );

        assert!(!evaluation.allowed);
        assert!(evaluation.policies.is_empty());
    }

    #[test]
    fn empty_principals_deny_without_subject() {
        let set = sample_set(Arc::new(NullSink));
        let evaluation = set.evaluate(&[], "update", "anything", &Context::new());

        assert!(!evaluation.allowed);
        assert_eq!(evaluation.subject, None);
    }

    #[test]
    fn empty_set_always_denies() {
        let set = PolicySet::compile(
            "svc",
            &[],
            &ConditionRegistry::with_builtins(),
            Arc::new(NullSink),
        )
        .unwrap();

        assert!(set.is_empty());
        assert!(!set.evaluate(&principals(&["userid:foo"]), "a", "r", &Context::new()).allowed);
    }

    #[test]
    fn duplicate_policy_id_fails_compilation() {
        let configs = vec![
            policy("1", &[], &[], &[], Effect::Allow),
            policy("1", &[], &[], &[], Effect::Deny),
        ];
        let err = PolicySet::compile(
            "svc",
            &configs,
            &ConditionRegistry::with_builtins(),
            Arc::new(NullSink),
        )
        .unwrap_err();

        assert!(matches!(err, Error::DuplicatePolicy { .. }));
    }

    #[test]
    fn last_matching_deny_is_reported() {
        let configs = vec![
            policy("first-deny", &["<.*>"], &["<.*>"], &["<.*>"], Effect::Deny),
            policy("second-deny", &["<.*>"], &["<.*>"], &["<.*>"], Effect::Deny),
        ];
        let set = PolicySet::compile(
            "svc",
            &configs,
            &ConditionRegistry::with_builtins(),
            Arc::new(NullSink),
        )
        .unwrap();

        let evaluation = set.evaluate(&principals(&["anyone"]), "a", "r", &Context::new());
        assert_eq!(evaluation.policies, vec!["second-deny"]);
    }

    #[test]
    fn later_principal_can_still_grant() {
        let set = sample_set(Arc::new(NullSink));
        // The first principal matches nothing; the second one matches policy 1.
        let evaluation = set.evaluate(
            &principals(&["group:nobody", "tag:admins"]),
            "update",
            "anything",
            &Context::new(),
        );

        assert!(evaluation.allowed);
        assert_eq!(evaluation.subject.as_deref(), Some("tag:admins"));
    }

    #[test]
    fn every_evaluation_reaches_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let set = sample_set(Arc::clone(&sink) as Arc<dyn DecisionSink>);

        set.evaluate(&principals(&["userid:foo"]), "update", "r", &Context::new());
        set.evaluate(&principals(&["userid:nobody"]), "none", "r", &Context::new());

        let decisions = sink.decisions.lock().unwrap();
        assert_eq!(decisions.len(), 2);
        assert!(decisions[0].allowed);
        assert_eq!(decisions[0].service, "https://sample.yaml");
        assert!(!decisions[1].allowed);
        assert!(decisions[1].policies.is_empty());
    }
}
