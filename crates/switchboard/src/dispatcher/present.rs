//! Re-presenting a channel to its handler.

use tracing::debug;

use super::{DISPATCH_TARGET, Dispatcher};
use crate::bus::{Bus, CallOutcome, HandleRequest};
use crate::calls::CallPurpose;
use crate::error::DispatchError;
use crate::names::{ChannelPath, ClientName, ReplyId};
use crate::policy::evaluate_chain;

impl<B: Bus> Dispatcher<B> {
    /// Brings `channel` to the user's attention again.
    ///
    /// A handled channel goes back to its current handler, or to the best
    /// remaining handler when that one has gone, without observers or
    /// approvers. A channel still dispatching is treated as if an approver
    /// asked for the best handler.
    pub fn present(&mut self, channel: &ChannelPath, user_action_time: u64, reply: ReplyId) {
        if self.shutting_down {
            self.bus.reply(reply, Err(DispatchError::ShuttingDown));
            return;
        }

        if let Some(operation) = self.channel_operations.get(channel).copied() {
            self.with_operation(operation, |dispatch, ctx| {
                dispatch.handle_with(ctx, None, user_action_time, reply);
            });
            return;
        }

        let Some(entry) = self.handler_map.lookup(channel) else {
            self.bus.reply(reply, Err(DispatchError::UnknownChannel));
            return;
        };

        let current = entry
            .owner_name()
            .filter(|name| self.registry.lookup(name).is_some())
            .cloned();
        let handler = current.or_else(|| {
            self.registry
                .list_possible_handlers(None, entry.channel().properties(), false, false)
                .into_iter()
                .next()
        });
        let Some(handler) = handler else {
            self.bus.reply(reply, Err(DispatchError::NotCapable));
            return;
        };

        if let Err(error) = evaluate_chain(&self.policies, &handler, entry.channel()) {
            self.bus.reply(reply, Err(error));
            return;
        }

        let request = HandleRequest {
            account: entry.account().clone(),
            channel: channel.clone(),
            properties: entry.channel().properties().clone(),
            satisfied_requests: entry.channel().satisfied_requests(),
            user_action_time,
        };
        debug!(
            target: DISPATCH_TARGET,
            channel = %channel,
            handler = %handler,
            "presenting channel"
        );
        let call = self.calls.issue(
            Some(&handler),
            CallPurpose::Present {
                reply,
                channel: channel.clone(),
                handler: handler.clone(),
            },
        );
        self.bus.handle_channels(call, &handler, request);
    }

    pub(super) fn on_present_done(
        &mut self,
        reply: ReplyId,
        channel: &ChannelPath,
        handler: ClientName,
        outcome: CallOutcome,
    ) {
        match outcome {
            Ok(_) => {
                let moved = self
                    .handler_map
                    .lookup(channel)
                    .filter(|entry| entry.owner_name() != Some(&handler))
                    .map(|entry| entry.channel().clone());
                if let Some(handled) = moved {
                    let owner = self
                        .registry
                        .lookup(&handler)
                        .and_then(|record| record.unique_name().cloned());
                    self.handler_map
                        .record(handled, owner, Some(handler), &mut self.bus);
                }
                self.bus.reply(reply, Ok(()));
            }
            Err(source) => {
                debug!(
                    target: DISPATCH_TARGET,
                    channel = %channel,
                    handler = %handler,
                    error = %source,
                    "handler refused presented channel"
                );
                self.bus
                    .reply(reply, Err(DispatchError::handler_failed(handler, source)));
            }
        }
    }
}
