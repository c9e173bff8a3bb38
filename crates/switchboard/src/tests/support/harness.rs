//! Scripted client directory driving a dispatcher over [`RecordingBus`].
//!
//! The harness answers every outbound call the moment it is recorded: the
//! census and introspection from the directory, client calls from each
//! [`ClientSpec`]'s scripted [`Response`]. Calls scripted to `Hold` wait in
//! a parking area until the test releases them.

use std::sync::Arc;

use crate::bus::{CallOutcome, CallReply, CloseReason};
use crate::channel::Channel;
use crate::dispatcher::{Dispatcher, DispatcherSettings};
use crate::error::{CallError, DispatchError};
use crate::names::{CallId, ChannelPath, ClientName, OperationId, ReplyId, UniqueName};
use crate::policy::HandlerPolicy;
use crate::reporter::DispatchReporter;

use super::bus::{BusEvent, RecordingBus};
use super::clients::{ClientSpec, Response, answer_census, client};
use super::reporter::RecordingDispatchReporter;

/// Dispatcher plus the fake world around it.
pub struct Harness {
    directory: Vec<ClientSpec>,
    dispatcher: Dispatcher<RecordingBus>,
    reporter: Arc<RecordingDispatchReporter>,
    held: Vec<BusEvent>,
    answer_census: bool,
    internal: Response,
    next_reply: u64,
}

impl Harness {
    /// A ready dispatcher over `directory`.
    pub fn new(directory: Vec<ClientSpec>) -> Self {
        Self::with_policies(directory, DispatcherSettings::default(), Vec::new())
    }

    /// A ready dispatcher with custom settings and policies.
    pub fn with_policies(
        directory: Vec<ClientSpec>,
        settings: DispatcherSettings,
        policies: Vec<Box<dyn HandlerPolicy>>,
    ) -> Self {
        let mut harness = Self::idle(directory, settings, policies);
        harness.finish_census();
        harness
    }

    /// A started dispatcher whose census is left unanswered.
    pub fn idle(
        directory: Vec<ClientSpec>,
        settings: DispatcherSettings,
        policies: Vec<Box<dyn HandlerPolicy>>,
    ) -> Self {
        let reporter = Arc::new(RecordingDispatchReporter::default());
        let shared: Arc<dyn DispatchReporter> = reporter.clone();
        let mut dispatcher =
            Dispatcher::new(settings, RecordingBus::default(), policies, shared);
        dispatcher.start();
        let mut harness = Self {
            directory,
            dispatcher,
            reporter,
            held: Vec::new(),
            answer_census: false,
            internal: Response::Accept,
            next_reply: 0,
        };
        harness.pump();
        harness
    }

    /// Answers the census calls held so far and keeps answering later ones.
    pub fn finish_census(&mut self) {
        self.answer_census = true;
        let parked = std::mem::take(&mut self.held);
        for event in parked {
            match answer_census(&self.directory, &event) {
                Some(outcome) => self.deliver(&event, outcome),
                None => self.held.push(event),
            }
        }
        self.pump();
    }

    /// How the in-process handler answers.
    pub const fn set_internal_response(&mut self, response: Response) {
        self.internal = response;
    }

    pub const fn dispatcher(&self) -> &Dispatcher<RecordingBus> {
        &self.dispatcher
    }

    pub const fn dispatcher_mut(&mut self) -> &mut Dispatcher<RecordingBus> {
        &mut self.dispatcher
    }

    pub fn bus(&self) -> &RecordingBus {
        self.dispatcher.bus()
    }

    pub fn reporter(&self) -> &RecordingDispatchReporter {
        &self.reporter
    }

    /// Calls waiting for the test to release them.
    pub fn held(&self) -> &[BusEvent] {
        &self.held
    }

    /// Allocates an inbound reply id.
    pub const fn reply_id(&mut self) -> ReplyId {
        self.next_reply += 1;
        ReplyId::new(self.next_reply)
    }

    /// Offers `channel` and runs everything the clients answer at once.
    pub fn add(&mut self, channel: Channel) -> OperationId {
        let operation = self
            .dispatcher
            .add_channel(channel, false)
            .unwrap_or_else(|error| panic!("add_channel failed: {error}"));
        self.pump();
        operation
    }

    /// Offers `channel` for observation only.
    pub fn add_observe_only(&mut self, channel: Channel) -> OperationId {
        let operation = self
            .dispatcher
            .add_channel(channel, true)
            .unwrap_or_else(|error| panic!("add_channel failed: {error}"));
        self.pump();
        operation
    }

    /// An approver calls `HandleWith` naming `handler` by suffix.
    pub fn handle_with(&mut self, operation: OperationId, handler: Option<&str>) -> ReplyId {
        let reply = self.reply_id();
        self.dispatcher
            .handle_with(operation, handler.map(client), reply);
        self.pump();
        reply
    }

    /// `claimer` claims the operation.
    pub fn claim(&mut self, operation: OperationId, claimer: &str) -> ReplyId {
        let reply = self.reply_id();
        self.dispatcher
            .claim(operation, UniqueName::new(claimer), reply);
        self.pump();
        reply
    }

    /// Re-presents `channel`.
    pub fn present(&mut self, channel: &ChannelPath) -> ReplyId {
        let reply = self.reply_id();
        self.dispatcher.present(channel, 0, reply);
        self.pump();
        reply
    }

    /// `caller` delegates `channels`, optionally to `preferred`.
    pub fn delegate(
        &mut self,
        caller: &str,
        channels: &[ChannelPath],
        preferred: Option<&str>,
    ) -> ReplyId {
        let reply = self.reply_id();
        let preferred = preferred.map(client);
        self.dispatcher.delegate(
            &UniqueName::new(caller),
            channels,
            preferred.as_ref(),
            reply,
        );
        self.pump();
        reply
    }

    /// The connection reports `channel` closed.
    pub fn close(&mut self, channel: &ChannelPath) {
        self.dispatcher.on_channel_closed(channel, "remote hung up");
        self.pump();
    }

    /// A client starts on the bus and joins the directory.
    pub fn client_appears(&mut self, spec: ClientSpec) {
        let name = spec.name.clone();
        let unique = spec.unique.clone();
        self.directory.retain(|known| known.name != name);
        self.directory.push(spec);
        self.dispatcher
            .on_name_owner_changed(name.as_str(), unique);
        self.pump();
    }

    /// A client leaves the bus, unique name and well-known name alike.
    pub fn client_vanishes(&mut self, suffix: &str) {
        let name = client(suffix);
        let unique = self
            .directory
            .iter()
            .find(|spec| spec.name == name)
            .and_then(|spec| spec.unique.clone());
        for spec in &mut self.directory {
            if spec.name == name {
                spec.unique = None;
            }
        }
        self.directory
            .retain(|spec| spec.name != name || spec.activatable);
        self.held
            .retain(|event| target_of(event).is_none_or(|target| target != &name));
        self.dispatcher.on_name_owner_changed(name.as_str(), None);
        if let Some(unique) = unique {
            self.dispatcher
                .on_name_owner_changed(unique.as_str(), None);
        }
        self.pump();
    }

    /// Completes the first held call matching `predicate`.
    pub fn release(&mut self, predicate: impl Fn(&BusEvent) -> bool, outcome: CallOutcome) {
        let Some(index) = self.held.iter().position(|event| predicate(event)) else {
            panic!("no held call matches; held: {:?}", self.held);
        };
        let event = self.held.remove(index);
        self.deliver(&event, outcome);
        self.pump();
    }

    /// Completes every held call matching `predicate` with success.
    pub fn release_all(&mut self, predicate: impl Fn(&BusEvent) -> bool) {
        let (matching, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.held).into_iter().partition(|event| predicate(event));
        self.held = rest;
        for event in matching {
            self.deliver(&event, Ok(CallReply::Unit));
        }
        self.pump();
    }

    /// Delivers a completion directly, for duplicate and stale replies.
    pub fn complete(&mut self, call: CallId, outcome: CallOutcome) {
        self.dispatcher.on_call_completed(call, outcome);
        self.pump();
    }

    /// Replies sent for `reply`.
    pub fn replies(&self, reply: ReplyId) -> Vec<Result<(), DispatchError>> {
        self.bus().replies(reply)
    }

    /// Channels closed, with reasons.
    pub fn closed(&self) -> Vec<(ChannelPath, CloseReason)> {
        self.bus().closed()
    }

    /// Current owner name recorded for `channel`.
    pub fn owner_of(&self, channel: &ChannelPath) -> Option<ClientName> {
        self.dispatcher
            .handler_map()
            .lookup(channel)
            .and_then(|entry| entry.owner_name().cloned())
    }

    /// Answers new calls until the bus goes quiet.
    pub fn pump(&mut self) {
        loop {
            let fresh = self.dispatcher.bus_mut().take_new();
            if fresh.is_empty() {
                return;
            }
            for event in fresh {
                if event.call().is_none() {
                    continue;
                }
                match self.scripted(&event) {
                    Some(outcome) => self.deliver(&event, outcome),
                    None => self.held.push(event),
                }
            }
        }
    }

    fn scripted(&self, event: &BusEvent) -> Option<CallOutcome> {
        if let Some(outcome) = answer_census(&self.directory, event) {
            return self.answer_census.then_some(outcome);
        }
        let spec = target_of(event)
            .and_then(|name| self.directory.iter().find(|spec| &spec.name == name));
        let response = match (event, spec) {
            (BusEvent::HandleInternally(..), _) => self.internal,
            (BusEvent::Observe(..), Some(spec)) => spec.observe,
            (BusEvent::AddDispatchOperation(..), Some(spec)) => spec.approve,
            (BusEvent::Handle(..), Some(spec)) => spec.handle,
            _ => return Some(Err(CallError::PeerVanished)),
        };
        response.outcome()
    }

    fn deliver(&mut self, event: &BusEvent, outcome: CallOutcome) {
        if let Some(call) = event.call() {
            self.dispatcher.on_call_completed(call, outcome);
        }
    }
}

/// Client a recorded call went to.
fn target_of(event: &BusEvent) -> Option<&ClientName> {
    match event {
        BusEvent::FetchInterfaces(_, name)
        | BusEvent::FetchRole(_, name, _)
        | BusEvent::Observe(_, name, _)
        | BusEvent::AddDispatchOperation(_, name, _)
        | BusEvent::Handle(_, name, _) => Some(name),
        _ => None,
    }
}
