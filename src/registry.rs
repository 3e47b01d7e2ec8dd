//! Per-service registry: policies, authenticator and tags, atomically
//! reloadable.
//!
//! The registry maps a service identifier (the `Origin` request header) to
//! its compiled policy set, its optional authenticator and its tag table.
//! [`ServiceRegistry::load`] builds a complete new mapping before swapping
//! it in: readers always observe either the previous or the next
//! configuration in its entirety, and any load error leaves the previous
//! one untouched.
//!
//! Readers take a read-lock only long enough to clone the inner `Arc`;
//! writers swap the whole `Arc` under the write-lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::audit::{Decision, DecisionSink, TracingSink};
use crate::authn::{AuthenticatorRegistry, OpenIdAuthenticator};
use crate::config::{ServiceConfig, Tags, lint_configs};
use crate::policy::{ConditionRegistry, PolicySet, Request};
use crate::{Error, Result};

/// Everything the registry knows about one service.
struct ServiceEntry {
    policies: PolicySet,
    authenticator: Option<Arc<OpenIdAuthenticator>>,
    tags: Tags,
}

type ServiceMap = HashMap<String, Arc<ServiceEntry>>;

/// The reloadable mapping from service identifier to policies,
/// authenticator and tags.
pub struct ServiceRegistry {
    services: RwLock<Arc<ServiceMap>>,
    authenticators: AuthenticatorRegistry,
    conditions: ConditionRegistry,
    sink: Arc<dyn DecisionSink>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    /// An empty registry auditing through the tracing sink.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }

    /// An empty registry with a custom decision sink.
    #[must_use]
    pub fn with_sink(sink: Arc<dyn DecisionSink>) -> Self {
        Self {
            services: RwLock::new(Arc::new(HashMap::new())),
            authenticators: AuthenticatorRegistry::new(),
            conditions: ConditionRegistry::with_builtins(),
            sink,
        }
    }

    /// The per-issuer authenticator map, shared for the process life.
    #[must_use]
    pub fn authenticators(&self) -> &AuthenticatorRegistry {
        &self.authenticators
    }

    /// Build a new service mapping from `configs` and swap it in.
    ///
    /// Validates everything before anything becomes visible: duplicate
    /// service identifiers, duplicate policy ids, unknown condition types,
    /// invalid patterns and unusable identity providers all abort the load
    /// with the previous mapping still in place. Identity providers are
    /// proven dereferenceable by fetching their discovery document.
    pub async fn load(&self, configs: &[ServiceConfig]) -> Result<()> {
        lint_configs(configs)?;

        let mut new_services = ServiceMap::with_capacity(configs.len());
        for config in configs {
            if new_services.contains_key(&config.service) {
                return Err(Error::DuplicateService {
                    service: config.service.clone(),
                    source_file: config.source.clone(),
                });
            }

            let authenticator = if config.identity_provider.is_empty() {
                warn!(service = %config.service, "No authentication configured; principals must be posted by the caller");
                None
            } else {
                let authenticator = self
                    .authenticators
                    .get_or_create(&config.identity_provider)?;
                authenticator
                    .discover()
                    .await
                    .map_err(|source| Error::IssuerUnreachable {
                        issuer: config.identity_provider.clone(),
                        source,
                    })?;
                info!(service = %config.service, issuer = %config.identity_provider, "Enable authentication");
                Some(authenticator)
            };

            let policies = PolicySet::compile(
                &config.service,
                &config.policies,
                &self.conditions,
                Arc::clone(&self.sink),
            )?;

            new_services.insert(
                config.service.clone(),
                Arc::new(ServiceEntry {
                    policies,
                    authenticator,
                    tags: config.tags.clone(),
                }),
            );
        }

        *self.services.write() = Arc::new(new_services);
        Ok(())
    }

    /// The authenticator configured for a service, `None` when the service
    /// runs with authentication disabled.
    ///
    /// # Errors
    ///
    /// `UnknownService` when the identifier is not registered.
    pub fn authenticator(&self, service: &str) -> Result<Option<Arc<OpenIdAuthenticator>>> {
        let snapshot = self.snapshot();
        let entry = snapshot
            .get(service)
            .ok_or_else(|| Error::UnknownService(service.to_string()))?;
        Ok(entry.authenticator.clone())
    }

    /// Expand principals with the service's local tags.
    ///
    /// Appends `tag:<name>` for every tag whose member set intersects the
    /// input. An unknown service returns the input unchanged.
    #[must_use]
    pub fn expand_principals(&self, service: &str, principals: Vec<String>) -> Vec<String> {
        let snapshot = self.snapshot();
        let Some(entry) = snapshot.get(service) else {
            return principals;
        };

        let mut expanded = principals;
        let matched: Vec<String> = entry
            .tags
            .iter()
            .filter(|(_, members)| members.iter().any(|member| expanded.contains(member)))
            .map(|(tag, _)| format!("tag:{tag}"))
            .collect();
        expanded.extend(matched);
        expanded
    }

    /// Evaluate a request against the service's policies.
    ///
    /// An unknown service denies the request and still emits an audit
    /// record for the denial.
    #[must_use]
    pub fn evaluate(&self, service: &str, request: &Request) -> bool {
        let snapshot = self.snapshot();
        match snapshot.get(service) {
            Some(entry) => {
                entry
                    .policies
                    .evaluate(
                        &request.principals,
                        &request.action,
                        &request.resource,
                        &request.context,
                    )
                    .allowed
            }
            None => {
                self.sink.on_decision(&Decision {
                    allowed: false,
                    service: service.to_string(),
                    subject: None,
                    principals: request.principals.clone(),
                    action: request.action.clone(),
                    resource: request.resource.clone(),
                    context: request.context.clone(),
                    policies: Vec::new(),
                });
                false
            }
        }
    }

    /// Number of policies loaded for a service, when it is registered.
    #[must_use]
    pub fn policy_count(&self, service: &str) -> Option<usize> {
        self.snapshot().get(service).map(|entry| entry.policies.len())
    }

    fn snapshot(&self) -> Arc<ServiceMap> {
        Arc::clone(&self.services.read())
    }
}
