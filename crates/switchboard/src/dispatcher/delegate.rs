//! Moving handled channels from one handler to another.
//!
//! Each delegated channel walks its own ranked list of handlers serially;
//! channels in one request proceed independently and the caller gets a
//! single reply once every channel has an outcome.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use super::{DISPATCH_TARGET, Dispatcher};
use crate::bus::{Bus, CallOutcome, DelegationOutcome, HandleRequest};
use crate::calls::CallPurpose;
use crate::channel::Channel;
use crate::error::DispatchError;
use crate::names::{ChannelPath, ClientName, ReplyId, UniqueName};
use crate::policy::evaluate_chain;

/// One inbound delegation awaiting its reply.
#[derive(Debug)]
pub(super) struct Delegation {
    reply: ReplyId,
    remaining: BTreeMap<ChannelPath, VecDeque<ClientName>>,
    last_errors: BTreeMap<ChannelPath, DispatchError>,
    in_flight: BTreeSet<ChannelPath>,
    outcome: DelegationOutcome,
}

impl Delegation {
    fn new(reply: ReplyId) -> Self {
        Self {
            reply,
            remaining: BTreeMap::new(),
            last_errors: BTreeMap::new(),
            in_flight: BTreeSet::new(),
            outcome: DelegationOutcome::default(),
        }
    }

    fn is_known(&self, channel: &ChannelPath) -> bool {
        self.in_flight.contains(channel)
            || self
                .outcome
                .delegated
                .iter()
                .any(|(path, _)| path == channel)
            || self
                .outcome
                .not_delegated
                .iter()
                .any(|(path, _)| path == channel)
    }

    fn begin(&mut self, channel: ChannelPath, candidates: Vec<ClientName>) {
        self.remaining.insert(channel.clone(), candidates.into());
        self.in_flight.insert(channel);
    }

    fn delegated(&mut self, channel: ChannelPath, handler: ClientName) {
        self.in_flight.remove(&channel);
        self.remaining.remove(&channel);
        self.outcome.delegated.push((channel, handler));
    }

    fn not_delegated(&mut self, channel: ChannelPath, error: DispatchError) {
        self.in_flight.remove(&channel);
        self.remaining.remove(&channel);
        self.outcome.not_delegated.push((channel, error));
    }

    /// Gives up on every channel still in flight.
    pub(super) fn abandon(mut self, error: &DispatchError) -> (ReplyId, DelegationOutcome) {
        for channel in std::mem::take(&mut self.in_flight) {
            self.outcome.not_delegated.push((channel, error.clone()));
        }
        (self.reply, self.outcome)
    }
}

impl<B: Bus> Dispatcher<B> {
    /// Asks for `channels`, handled by `caller`, to move to other handlers.
    ///
    /// For each channel the handlers able to take it are tried in rank
    /// order, `preferred` first when it is a handler, never the caller
    /// itself. The reply reports, per channel, the new handler or why the
    /// channel stayed put.
    pub fn delegate(
        &mut self,
        caller: &UniqueName,
        channels: &[ChannelPath],
        preferred: Option<&ClientName>,
        reply: ReplyId,
    ) {
        let mut delegation = Delegation::new(reply);
        for channel in channels {
            if delegation.is_known(channel) {
                continue;
            }
            if self.shutting_down {
                delegation.not_delegated(channel.clone(), DispatchError::ShuttingDown);
                continue;
            }
            let Some(entry) = self.handler_map.lookup(channel) else {
                delegation.not_delegated(channel.clone(), DispatchError::UnknownChannel);
                continue;
            };
            if entry.owner() != Some(caller) {
                delegation.not_delegated(channel.clone(), DispatchError::NotHandledByCaller);
                continue;
            }
            let candidates = self.ranked_delegates(entry.channel(), caller, preferred);
            if candidates.is_empty() {
                delegation.not_delegated(channel.clone(), DispatchError::NotCapable);
                continue;
            }
            debug!(
                target: DISPATCH_TARGET,
                channel = %channel,
                caller = %caller,
                candidates = ?candidates,
                "delegating channel"
            );
            delegation.begin(channel.clone(), candidates);
        }

        let started: Vec<ChannelPath> = delegation.in_flight.iter().cloned().collect();
        self.delegations.insert(reply, delegation);
        for channel in started {
            self.try_next_delegate(reply, &channel);
        }
        self.finish_delegation_if_complete(reply);
    }

    fn ranked_delegates(
        &self,
        channel: &Channel,
        caller: &UniqueName,
        preferred: Option<&ClientName>,
    ) -> Vec<ClientName> {
        let mut ranked =
            self.registry
                .list_possible_handlers(preferred, channel.properties(), false, false);
        if let Some(name) = preferred.filter(|name| {
            self.registry
                .lookup(name)
                .is_some_and(|record| record.roles().handler().is_some())
        }) {
            ranked.retain(|candidate| candidate != name);
            ranked.insert(0, name.clone());
        }
        ranked.retain(|candidate| {
            self.registry
                .lookup(candidate)
                .is_none_or(|record| record.unique_name() != Some(caller))
        });
        ranked
    }

    /// Invokes the next handler for `channel`, or records why none is left.
    fn try_next_delegate(&mut self, reply: ReplyId, channel: &ChannelPath) {
        loop {
            let Some(delegation) = self.delegations.get_mut(&reply) else {
                return;
            };
            let next = delegation
                .remaining
                .get_mut(channel)
                .and_then(VecDeque::pop_front);
            let Some(handler) = next else {
                let error = delegation
                    .last_errors
                    .remove(channel)
                    .unwrap_or(DispatchError::NotCapable);
                delegation.not_delegated(channel.clone(), error);
                return;
            };
            let Some(entry) = self.handler_map.lookup(channel) else {
                delegation.not_delegated(channel.clone(), DispatchError::UnknownChannel);
                return;
            };

            if let Err(error) = evaluate_chain(&self.policies, &handler, entry.channel()) {
                delegation.last_errors.insert(channel.clone(), error);
                continue;
            }

            let request = HandleRequest {
                account: entry.account().clone(),
                channel: channel.clone(),
                properties: entry.channel().properties().clone(),
                satisfied_requests: entry.channel().satisfied_requests(),
                user_action_time: 0,
            };
            let call = self.calls.issue(
                Some(&handler),
                CallPurpose::Delegate {
                    reply,
                    channel: channel.clone(),
                    handler: handler.clone(),
                },
            );
            self.bus.handle_channels(call, &handler, request);
            return;
        }
    }

    pub(super) fn on_delegate_done(
        &mut self,
        reply: ReplyId,
        channel: ChannelPath,
        handler: ClientName,
        outcome: CallOutcome,
    ) {
        if !self.delegations.contains_key(&reply) {
            debug!(target: DISPATCH_TARGET, %reply, "late delegation reply");
            return;
        }

        match outcome {
            Ok(_) => {
                let moved = self.handler_map.lookup(&channel).map(|entry| entry.channel().clone());
                let result = match moved {
                    Some(handled) => {
                        let owner = self
                            .registry
                            .lookup(&handler)
                            .and_then(|record| record.unique_name().cloned());
                        self.handler_map.record(
                            handled,
                            owner,
                            Some(handler.clone()),
                            &mut self.bus,
                        );
                        Ok(handler)
                    }
                    None => Err(DispatchError::UnknownChannel),
                };
                if let Some(delegation) = self.delegations.get_mut(&reply) {
                    match result {
                        Ok(winner) => delegation.delegated(channel, winner),
                        Err(error) => delegation.not_delegated(channel, error),
                    }
                }
            }
            Err(source) => {
                if let Some(delegation) = self.delegations.get_mut(&reply) {
                    delegation.last_errors.insert(
                        channel.clone(),
                        DispatchError::handler_failed(handler, source),
                    );
                }
                self.try_next_delegate(reply, &channel);
            }
        }
        self.finish_delegation_if_complete(reply);
    }

    fn finish_delegation_if_complete(&mut self, reply: ReplyId) {
        let complete = self
            .delegations
            .get(&reply)
            .is_some_and(|delegation| delegation.in_flight.is_empty());
        if !complete {
            return;
        }
        if let Some(delegation) = self.delegations.remove(&reply) {
            debug!(
                target: DISPATCH_TARGET,
                %reply,
                delegated = delegation.outcome.delegated.len(),
                not_delegated = delegation.outcome.not_delegated.len(),
                "delegation complete"
            );
            self.bus.delegate_reply(reply, delegation.outcome);
        }
    }
}
