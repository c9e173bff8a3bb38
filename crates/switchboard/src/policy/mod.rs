//! Policy hooks consulted while dispatching.
//!
//! Policies are constructed once at startup and handed to the dispatcher as
//! an ordered list. Before any handler is invoked, every policy is asked to
//! evaluate it; the first denial counts as that handler failing. Policies
//! may also hold an operation back by requesting delays when it becomes
//! ready, releasing each one later through
//! [`crate::Dispatcher::end_plugin_delay`].

use switchboard_config::{HandlerOverride, HandlerPolicyMatrix};
use tracing::debug;

use crate::channel::Channel;
use crate::error::DispatchError;
use crate::names::{ClientName, DelayId, OperationId};

const POLICY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::policy");

/// Verdict on one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The handler may be invoked.
    Allow,
    /// The handler must not be invoked, for the given reason.
    Deny(String),
}

/// Delays requested for one operation.
#[derive(Debug, Default)]
pub struct DelayRequests {
    granted: Vec<DelayId>,
}

impl DelayRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Holds the operation until the returned delay is ended.
    pub fn request(&mut self) -> DelayId {
        let next = u64::try_from(self.granted.len()).unwrap_or(u64::MAX);
        let delay = DelayId::new(next.saturating_add(1));
        self.granted.push(delay);
        delay
    }

    pub(crate) fn into_granted(self) -> Vec<DelayId> {
        self.granted
    }
}

/// Strategy consulted before handlers are invoked.
pub trait HandlerPolicy {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Decides whether `handler` may take `channel`.
    fn evaluate_handler(&self, handler: &ClientName, channel: &Channel) -> PolicyDecision;

    /// Invoked once when an operation is ready to run its clients.
    fn on_dispatch_ready(
        &self,
        _operation: OperationId,
        _channel: &Channel,
        _delays: &mut DelayRequests,
    ) {
    }
}

/// Runs `policies` in order; the first denial wins.
///
/// # Errors
///
/// Returns [`DispatchError::PolicyDenied`] naming the handler when any
/// policy refuses it.
pub fn evaluate_chain(
    policies: &[Box<dyn HandlerPolicy>],
    handler: &ClientName,
    channel: &Channel,
) -> Result<(), DispatchError> {
    for policy in policies {
        if let PolicyDecision::Deny(reason) = policy.evaluate_handler(handler, channel) {
            debug!(
                target: POLICY_TARGET,
                policy = policy.name(),
                client = %handler,
                channel = %channel.path(),
                reason = %reason,
                "handler denied"
            );
            return Err(DispatchError::policy_denied(handler.clone(), reason));
        }
    }
    Ok(())
}

/// Built-in policy applying configured per-handler overrides.
#[derive(Debug, Clone)]
pub struct DirectivePolicy {
    matrix: HandlerPolicyMatrix,
}

impl DirectivePolicy {
    /// Wraps a parsed override matrix.
    #[must_use]
    pub const fn new(matrix: HandlerPolicyMatrix) -> Self {
        Self { matrix }
    }
}

impl HandlerPolicy for DirectivePolicy {
    fn name(&self) -> &str {
        "directives"
    }

    fn evaluate_handler(&self, handler: &ClientName, _channel: &Channel) -> PolicyDecision {
        match self.matrix.override_for(handler.as_str()) {
            Some(HandlerOverride::Deny) => {
                PolicyDecision::Deny(String::from("handler denied by configuration"))
            }
            Some(HandlerOverride::Allow) | None => PolicyDecision::Allow,
        }
    }
}
