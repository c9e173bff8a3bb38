//! Structured reporting of dispatcher lifecycle events.

use std::sync::Arc;

use switchboard_config::Config;

use crate::bootstrap::BootstrapError;
use crate::error::DispatchError;
use crate::names::{ChannelPath, ClientName, OperationId, UniqueName};
use crate::operation::{HandlerTarget, Resolution};

const REPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Observer trait used to surface dispatcher events to telemetry sinks.
pub trait DispatchReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once client discovery has settled.
    fn registry_ready(&self, clients: usize);

    /// Invoked when an operation starts running its clients.
    fn operation_started(
        &self,
        operation: OperationId,
        channel: &ChannelPath,
        candidates: &[ClientName],
    );

    /// Invoked when a handler refuses, fails or is denied by policy.
    fn handler_failed(&self, operation: OperationId, handler: &HandlerTarget, error: &DispatchError);

    /// Invoked when an operation reaches its result.
    fn operation_finished(
        &self,
        operation: OperationId,
        channel: &ChannelPath,
        resolution: &Resolution,
    );

    /// Invoked when a handling process leaves the bus.
    fn owner_vanished(&self, owner: &UniqueName, closed: &[ChannelPath]);
}

impl<T> DispatchReporter for Arc<T>
where
    T: DispatchReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn registry_ready(&self, clients: usize) {
        (**self).registry_ready(clients);
    }

    fn operation_started(
        &self,
        operation: OperationId,
        channel: &ChannelPath,
        candidates: &[ClientName],
    ) {
        (**self).operation_started(operation, channel, candidates);
    }

    fn handler_failed(&self, operation: OperationId, handler: &HandlerTarget, error: &DispatchError) {
        (**self).handler_failed(operation, handler, error);
    }

    fn operation_finished(
        &self,
        operation: OperationId,
        channel: &ChannelPath,
        resolution: &Resolution,
    ) {
        (**self).operation_finished(operation, channel, resolution);
    }

    fn owner_vanished(&self, owner: &UniqueName, closed: &[ChannelPath]) {
        (**self).owner_vanished(owner, closed);
    }
}

/// Default reporter that records dispatcher events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredDispatchReporter;

impl StructuredDispatchReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DispatchReporter for StructuredDispatchReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: REPORT_TARGET,
            event = "bootstrap_starting",
            "starting dispatcher bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: REPORT_TARGET,
            event = "bootstrap_succeeded",
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            client_prefix = %config.client_prefix(),
            approver_scheduling = %config.approver_scheduling(),
            "dispatcher bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: REPORT_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "dispatcher bootstrap failed"
        );
    }

    fn registry_ready(&self, clients: usize) {
        tracing::info!(
            target: REPORT_TARGET,
            event = "registry_ready",
            clients,
            "client discovery complete"
        );
    }

    fn operation_started(
        &self,
        operation: OperationId,
        channel: &ChannelPath,
        candidates: &[ClientName],
    ) {
        tracing::info!(
            target: REPORT_TARGET,
            event = "operation_started",
            operation = %operation,
            channel = %channel,
            candidates = ?candidates,
            "dispatching channel"
        );
    }

    fn handler_failed(&self, operation: OperationId, handler: &HandlerTarget, error: &DispatchError) {
        tracing::warn!(
            target: REPORT_TARGET,
            event = "handler_failed",
            operation = %operation,
            handler = %handler,
            error = %error,
            "handler did not take the channel"
        );
    }

    fn operation_finished(
        &self,
        operation: OperationId,
        channel: &ChannelPath,
        resolution: &Resolution,
    ) {
        match resolution {
            Resolution::Failed(error) => tracing::warn!(
                target: REPORT_TARGET,
                event = "operation_failed",
                operation = %operation,
                channel = %channel,
                error = %error,
                "channel could not be dispatched"
            ),
            _ => tracing::info!(
                target: REPORT_TARGET,
                event = "operation_finished",
                operation = %operation,
                channel = %channel,
                resolution = ?resolution,
                "channel dispatched"
            ),
        }
    }

    fn owner_vanished(&self, owner: &UniqueName, closed: &[ChannelPath]) {
        tracing::warn!(
            target: REPORT_TARGET,
            event = "owner_vanished",
            owner = %owner,
            closed = closed.len(),
            "handling process left the bus"
        );
    }
}
