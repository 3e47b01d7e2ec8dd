//! End-to-end policy evaluation scenarios against the sample service,
//! driven through YAML parsing and the service registry.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use gatekeeper::audit::NullSink;
use gatekeeper::config::parse_service_config;
use gatekeeper::policy::{Context, Request};
use gatekeeper::registry::ServiceRegistry;

const SERVICE: &str = "https://sample.yaml";

const SAMPLE: &str = r#"
service: https://sample.yaml
identityProvider:
tags:
  admins:
    - userid:maria
policies:
  - id: "1"
    description: Allow foo and admins to update anything
    principals: ["userid:foo", "tag:admins"]
    actions: ["update"]
    resources: ["<.*>"]
    effect: allow
  - id: "2"
    description: Nothing is allowed on mars
    principals: ["<.*>"]
    actions: ["<.*>"]
    resources: ["<.*>"]
    effect: deny
    conditions:
      planet:
        type: StringEqualCondition
        options:
          equals: mars
  - id: "3"
    description: Loopback reads
    principals: ["<.*>"]
    actions: ["read"]
    resources: ["<.*>"]
    effect: allow
    conditions:
      ip:
        type: CIDRCondition
        options:
          cidr: 127.0.0.0/8
  - id: "4"
    description: Owners can do anything
    principals: ["<.*>"]
    actions: ["<.*>"]
    resources: ["<.*>"]
    effect: allow
    conditions:
      owner:
        type: MatchPrincipalsCondition
  - id: "5"
    description: Admin groups may create on mozilla.org domains
    principals: ["group:admins"]
    actions: ["create"]
    resources: ["<.*>"]
    effect: allow
    conditions:
      domain:
        type: StringMatchCondition
        options:
          matches: .*\.mozilla\.org
  - id: "6"
    description: Editors can update the PTO calendar
    principals: ["role:editor"]
    actions: ["update"]
    resources: ["pto"]
    effect: allow
"#;

async fn sample_registry() -> ServiceRegistry {
    let registry = ServiceRegistry::with_sink(Arc::new(NullSink));
    let config = parse_service_config(SAMPLE, "sample.yaml").unwrap();
    registry.load(&[config]).await.unwrap();
    registry
}

fn request(principals: &[&str], action: &str, resource: &str, context: serde_json::Value) -> Request {
    Request {
        principals: principals.iter().map(ToString::to_string).collect(),
        action: action.to_string(),
        resource: resource.to_string(),
        context: context.as_object().cloned().unwrap_or_else(Context::new),
    }
}

#[tokio::test]
async fn allow_by_principal_pattern() {
    let registry = sample_registry().await;

    let allowed = registry.evaluate(
        SERVICE,
        &request(&["userid:foo"], "update", "server.org/blocklist:onecrl", json!({})),
    );
    assert!(allowed);
}

#[tokio::test]
async fn deny_by_context_wins_over_allow() {
    let registry = sample_registry().await;

    let denied = registry.evaluate(
        SERVICE,
        &request(
            &["userid:foo"],
            "update",
            "server.org/blocklist:onecrl",
            json!({"planet": "mars"}),
        ),
    );
    assert!(!denied);

    // Case differs: the deny no longer matches, the allow still does.
    let allowed = registry.evaluate(
        SERVICE,
        &request(
            &["userid:foo"],
            "update",
            "server.org/blocklist:onecrl",
            json!({"planet": "Mars"}),
        ),
    );
    assert!(allowed);
}

#[tokio::test]
async fn cidr_condition_bounds_the_read_action() {
    let registry = sample_registry().await;

    assert!(registry.evaluate(
        SERVICE,
        &request(
            &["userid:foo"],
            "read",
            "server.org/blocklist:onecrl",
            json!({"ip": "127.0.0.1"}),
        ),
    ));
    assert!(!registry.evaluate(
        SERVICE,
        &request(
            &["userid:foo"],
            "read",
            "server.org/blocklist:onecrl",
            json!({"ip": "10.0.0.1"}),
        ),
    ));
}

#[tokio::test]
async fn match_principals_condition_identifies_the_actor() {
    let registry = sample_registry().await;

    assert!(registry.evaluate(
        SERVICE,
        &request(&["userid:bilbo"], "wear", "ring", json!({"owner": "userid:bilbo"})),
    ));
    assert!(registry.evaluate(
        SERVICE,
        &request(
            &["userid:bilbo"],
            "wear",
            "ring",
            json!({"owner": ["userid:alice", "userid:bilbo"]}),
        ),
    ));
    assert!(!registry.evaluate(
        SERVICE,
        &request(&["userid:gollum"], "wear", "ring", json!({"owner": "userid:bilbo"})),
    ));
}

#[tokio::test]
async fn string_match_condition_anchors_the_domain() {
    let registry = sample_registry().await;

    assert!(registry.evaluate(
        SERVICE,
        &request(
            &["group:admins"],
            "create",
            "dns://",
            json!({"domain": "kinto.mozilla.org"}),
        ),
    ));
    assert!(!registry.evaluate(
        SERVICE,
        &request(
            &["group:admins"],
            "create",
            "dns://",
            json!({"domain": "kinto-storage.org"}),
        ),
    ));
}

#[tokio::test]
async fn tag_expansion_adds_local_tags() {
    let registry = sample_registry().await;

    let expanded = registry.expand_principals(SERVICE, vec!["userid:maria".to_string()]);
    assert_eq!(expanded, vec!["userid:maria", "tag:admins"]);

    // The expanded principal grants through the tag:admins pattern.
    let mut req = request(&["userid:maria"], "update", "anything", json!({}));
    req.principals = expanded;
    assert!(registry.evaluate(SERVICE, &req));
}

#[tokio::test]
async fn role_expansion_adds_role_principals() {
    let registry = sample_registry().await;

    let mut req = request(&["userid:bob"], "update", "pto", json!({"roles": ["editor"]}));
    req.principals.extend(req.roles());

    assert_eq!(req.principals, vec!["userid:bob", "role:editor"]);
    assert!(registry.evaluate(SERVICE, &req));
}

#[tokio::test]
async fn default_deny_with_no_matching_policy() {
    let registry = sample_registry().await;

    assert!(!registry.evaluate(
        SERVICE,
        &request(&["userid:foo"], "delete", "server.org/blocklist:onecrl", json!({})),
    ));
    assert!(!registry.evaluate(SERVICE, &request(&[], "", "", json!({}))));
}

#[tokio::test]
async fn failed_reload_keeps_answering_with_the_previous_policies() {
    let registry = sample_registry().await;

    let mut broken = parse_service_config(SAMPLE, "sample.yaml").unwrap();
    broken.policies[0].principals = vec!["<*invalid>".to_string()];
    registry.load(&[broken]).await.unwrap_err();

    // Invariant: behaves as if the failed load never happened.
    assert!(registry.evaluate(
        SERVICE,
        &request(&["userid:foo"], "update", "server.org/blocklist:onecrl", json!({})),
    ));
}
