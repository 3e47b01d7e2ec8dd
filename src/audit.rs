//! Audit trail for authorization decisions.
//!
//! Every policy evaluation produces a [`Decision`] record handed to a
//! [`DecisionSink`]. The default sink serializes the record and emits it via
//! `tracing::info!` with the JSON blob in an `audit` field, making the trail
//! queryable by any log aggregator:
//!
//! ```text
//! INFO gatekeeper::audit audit={"allowed":false,"policies":["2"],...} authorization decision
//! ```
//!
//! Tests swap in [`NullSink`] to keep output quiet.

use serde::Serialize;

use crate::policy::Context;

/// One authorization decision, as reported to the sink.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    /// Whether access was granted.
    pub allowed: bool,
    /// Service identifier the decision was made for.
    pub service: String,
    /// The last candidate subject tested, when any principal was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// The full principal list after tag and role expansion.
    pub principals: Vec<String>,
    /// The requested action.
    pub action: String,
    /// The requested resource.
    pub resource: String,
    /// The request's environmental context.
    pub context: Context,
    /// Ids of the policies that decided the outcome: the last matching deny
    /// if any, else the last matching allow, else empty.
    pub policies: Vec<String>,
}

/// Receives every authorization decision.
///
/// Implementations must be cheap and non-blocking; they run on the request
/// path.
pub trait DecisionSink: Send + Sync {
    /// Called once per evaluated request, including unknown-service denials.
    fn on_decision(&self, decision: &Decision);
}

/// Emits decisions as structured `tracing` records.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DecisionSink for TracingSink {
    fn on_decision(&self, decision: &Decision) {
        match serde_json::to_string(decision) {
            Ok(ref json) => tracing::info!(audit = %json, "authorization decision"),
            Err(ref e) => tracing::warn!(error = %e, "failed to serialize audit record"),
        }
    }
}

/// Swallows decisions. For tests.
#[derive(Debug, Default)]
pub struct NullSink;

impl DecisionSink for NullSink {
    fn on_decision(&self, _decision: &Decision) {}
}
