//! Test double for [`DispatchReporter`] that records structured events for
//! assertions.

use std::sync::Mutex;

use switchboard_config::Config;

use crate::bootstrap::BootstrapError;
use crate::error::DispatchError;
use crate::names::{ChannelPath, ClientName, OperationId, UniqueName};
use crate::operation::{HandlerTarget, Resolution};
use crate::reporter::DispatchReporter;

/// Structured dispatcher events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    RegistryReady(usize),
    OperationStarted {
        operation: OperationId,
        candidates: Vec<ClientName>,
    },
    HandlerFailed {
        operation: OperationId,
        handler: HandlerTarget,
        error: DispatchError,
    },
    OperationFinished {
        operation: OperationId,
        channel: ChannelPath,
        resolution: Resolution,
    },
    OwnerVanished {
        owner: UniqueName,
        closed: Vec<ChannelPath>,
    },
}

/// Records dispatcher events for assertions.
#[derive(Debug, Default)]
pub struct RecordingDispatchReporter {
    events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingDispatchReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events
            .lock()
            .expect("dispatch reporter mutex poisoned")
            .clone()
    }

    pub fn record(&self, event: DispatchEvent) {
        self.events
            .lock()
            .expect("dispatch reporter mutex poisoned")
            .push(event);
    }

    /// Resolutions reported for `operation`, in order.
    pub fn resolutions(&self, operation: OperationId) -> Vec<Resolution> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DispatchEvent::OperationFinished {
                    operation: finished,
                    resolution,
                    ..
                } if finished == operation => Some(resolution),
                _ => None,
            })
            .collect()
    }

    /// Handler failures reported for `operation`, in order.
    pub fn handler_failures(&self, operation: OperationId) -> Vec<(HandlerTarget, DispatchError)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DispatchEvent::HandlerFailed {
                    operation: failed,
                    handler,
                    error,
                } if failed == operation => Some((handler, error)),
                _ => None,
            })
            .collect()
    }
}

impl DispatchReporter for RecordingDispatchReporter {
    fn bootstrap_starting(&self) {
        self.record(DispatchEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(DispatchEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(DispatchEvent::BootstrapFailed(error.to_string()));
    }

    fn registry_ready(&self, clients: usize) {
        self.record(DispatchEvent::RegistryReady(clients));
    }

    fn operation_started(
        &self,
        operation: OperationId,
        _channel: &ChannelPath,
        candidates: &[ClientName],
    ) {
        self.record(DispatchEvent::OperationStarted {
            operation,
            candidates: candidates.to_vec(),
        });
    }

    fn handler_failed(&self, operation: OperationId, handler: &HandlerTarget, error: &DispatchError) {
        self.record(DispatchEvent::HandlerFailed {
            operation,
            handler: handler.clone(),
            error: error.clone(),
        });
    }

    fn operation_finished(
        &self,
        operation: OperationId,
        channel: &ChannelPath,
        resolution: &Resolution,
    ) {
        self.record(DispatchEvent::OperationFinished {
            operation,
            channel: channel.clone(),
            resolution: resolution.clone(),
        });
    }

    fn owner_vanished(&self, owner: &UniqueName, closed: &[ChannelPath]) {
        self.record(DispatchEvent::OwnerVanished {
            owner: owner.clone(),
            closed: closed.to_vec(),
        });
    }
}
