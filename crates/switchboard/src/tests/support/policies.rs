//! Policies with fixed behaviour for dispatch scenarios.

use crate::channel::Channel;
use crate::names::{ClientName, OperationId};
use crate::policy::{DelayRequests, HandlerPolicy, PolicyDecision};

/// Refuses one handler by name.
pub struct DenyingPolicy {
    denied: ClientName,
}

impl DenyingPolicy {
    pub const fn new(denied: ClientName) -> Self {
        Self { denied }
    }
}

impl HandlerPolicy for DenyingPolicy {
    fn name(&self) -> &str {
        "denying"
    }

    fn evaluate_handler(&self, handler: &ClientName, _channel: &Channel) -> PolicyDecision {
        if handler == &self.denied {
            PolicyDecision::Deny(String::from("muted by test policy"))
        } else {
            PolicyDecision::Allow
        }
    }
}

/// Holds every operation back with `count` delays.
pub struct DelayingPolicy {
    count: usize,
}

impl DelayingPolicy {
    pub const fn new(count: usize) -> Self {
        Self { count }
    }
}

impl HandlerPolicy for DelayingPolicy {
    fn name(&self) -> &str {
        "delaying"
    }

    fn evaluate_handler(&self, _handler: &ClientName, _channel: &Channel) -> PolicyDecision {
        PolicyDecision::Allow
    }

    fn on_dispatch_ready(
        &self,
        _operation: OperationId,
        _channel: &Channel,
        delays: &mut DelayRequests,
    ) {
        for _ in 0..self.count {
            delays.request();
        }
    }
}
