//! Channels entering dispatch and directives steering it.

use tracing::{debug, warn};

use super::{DISPATCH_TARGET, Dispatcher, QueuedChannel};
use crate::bus::Bus;
use crate::channel::Channel;
use crate::error::DispatchError;
use crate::names::{ChannelPath, ClientName, DelayId, OperationId, ReplyId, RequestPath, UniqueName};
use crate::operation::{DispatchOperation, OperationOptions};
use crate::policy::DelayRequests;

impl<B: Bus> Dispatcher<B> {
    /// Starts dispatching a channel whose properties are known.
    ///
    /// Whether the channel was requested is read from the channel itself.
    /// `observe_only` channels are shown to observers and then released
    /// without approval or handling. Channels added before the registry is
    /// ready are queued and start once it is.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ShuttingDown`] after [`Dispatcher::shutdown`].
    pub fn add_channel(
        &mut self,
        channel: Channel,
        observe_only: bool,
    ) -> Result<OperationId, DispatchError> {
        if self.shutting_down {
            return Err(DispatchError::ShuttingDown);
        }
        if let Some(existing) = self.operation_for(channel.path()) {
            warn!(
                target: DISPATCH_TARGET,
                channel = %channel.path(),
                operation = %existing,
                "channel is already being dispatched"
            );
            return Ok(existing);
        }

        let operation = self.allocate_operation();
        if self.registry_ready {
            self.start_operation(operation, channel, observe_only);
        } else {
            debug!(
                target: DISPATCH_TARGET,
                channel = %channel.path(),
                operation = %operation,
                "registry not ready; queueing channel"
            );
            self.queued.push_back(QueuedChannel {
                operation,
                channel,
                observe_only,
            });
        }
        Ok(operation)
    }

    /// Starts every channel queued while the registry was not ready.
    pub(super) fn flush_queue(&mut self) {
        while let Some(QueuedChannel {
            operation,
            channel,
            observe_only,
        }) = self.queued.pop_front()
        {
            self.start_operation(operation, channel, observe_only);
        }
    }

    fn start_operation(&mut self, operation: OperationId, channel: Channel, observe_only: bool) {
        let internal = channel.request().is_some_and(|request| request.internal);
        let candidates = if internal {
            Vec::new()
        } else {
            let preferred = channel
                .request()
                .and_then(|request| request.preferred_handler.as_ref());
            self.registry
                .list_possible_handlers(preferred, channel.properties(), false, false)
        };

        let options = OperationOptions {
            observe_only,
            internal,
            scheduling: self.settings.approver_scheduling,
        };
        let dispatch = DispatchOperation::new(operation, channel, candidates, options);

        let mut delays = DelayRequests::new();
        for policy in &self.policies {
            policy.on_dispatch_ready(operation, dispatch.channel(), &mut delays);
        }

        self.channel_operations
            .insert(dispatch.channel().path().clone(), operation);
        self.operations.insert(operation, dispatch);
        let granted = delays.into_granted();
        self.with_operation(operation, |dispatch, ctx| {
            dispatch.run_clients(ctx, granted);
        });
    }

    /// Cancels the request a dispatching channel satisfies.
    ///
    /// The operation stops before its next handler attempt and closes the
    /// channel.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownChannel`] when no dispatching channel
    /// satisfies `request`.
    pub fn cancel_request(&mut self, request: &RequestPath) -> Result<(), DispatchError> {
        let satisfies = |channel: &Channel| channel.satisfied_requests().contains(request);

        if let Some(queued) = self
            .queued
            .iter_mut()
            .find(|queued| satisfies(&queued.channel))
        {
            queued.channel.fail(DispatchError::Cancelled);
            return Ok(());
        }

        let operation = self
            .operations
            .values()
            .find(|operation| satisfies(operation.channel()))
            .map(DispatchOperation::id)
            .ok_or(DispatchError::UnknownChannel)?;
        debug!(
            target: DISPATCH_TARGET,
            request = %request,
            operation = %operation,
            "request cancelled"
        );
        self.with_operation(operation, |dispatch, ctx| dispatch.cancel(ctx));
        Ok(())
    }

    /// The connection reports that `channel` closed.
    ///
    /// A dispatching channel fails with "channel lost"; a handled one is
    /// forgotten.
    pub fn on_channel_closed(&mut self, channel: &ChannelPath, reason: &str) {
        self.queued.retain(|queued| queued.channel.path() != channel);
        if let Some(operation) = self.channel_operations.get(channel).copied() {
            self.with_operation(operation, |dispatch, ctx| dispatch.lose_channel(ctx, reason));
        }
        if let Some(entry) = self
            .handler_map
            .on_channel_invalidated(channel, &mut self.bus)
        {
            debug!(
                target: DISPATCH_TARGET,
                channel = %channel,
                owner = ?entry.owner(),
                "handled channel closed"
            );
        }
    }

    /// An approver asks for `handler`, or the best handler when `None`.
    pub fn handle_with(
        &mut self,
        operation: OperationId,
        handler: Option<ClientName>,
        reply: ReplyId,
    ) {
        self.handle_with_time(operation, handler, 0, reply);
    }

    /// As [`Dispatcher::handle_with`], passing a user action time.
    pub fn handle_with_time(
        &mut self,
        operation: OperationId,
        handler: Option<ClientName>,
        user_action_time: u64,
        reply: ReplyId,
    ) {
        let handled = self.with_operation(operation, |dispatch, ctx| {
            dispatch.handle_with(ctx, handler, user_action_time, reply);
        });
        if handled.is_none() {
            self.bus.reply(reply, Err(DispatchError::UnknownOperation));
        }
    }

    /// `claimer` takes the channel for itself.
    pub fn claim(&mut self, operation: OperationId, claimer: UniqueName, reply: ReplyId) {
        let claimed = self.with_operation(operation, |dispatch, ctx| {
            dispatch.claim(ctx, claimer, reply);
        });
        if claimed.is_none() {
            self.bus.reply(reply, Err(DispatchError::UnknownOperation));
        }
    }

    /// Ends a delay a policy requested when `operation` became ready.
    ///
    /// Returns `false` when the operation or delay is unknown.
    pub fn end_plugin_delay(&mut self, operation: OperationId, delay: DelayId) -> bool {
        self.with_operation(operation, |dispatch, ctx| dispatch.end_delay(ctx, delay))
            .unwrap_or(false)
    }
}
