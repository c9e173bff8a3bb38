//! Test double for [`Bus`] that records every outbound interaction.
//!
//! Calls are never answered by the bus itself: tests (or the scripted
//! [`super::Harness`]) read the recorded events and feed completions back
//! through the dispatcher.

use crate::bus::{
    ApprovalRequest, Bus, CloseReason, DelegationOutcome, HandleRequest, ObserveRequest,
};
use crate::client::Role;
use crate::error::DispatchError;
use crate::names::{CallId, ChannelPath, ClientName, OperationId, ReplyId, UniqueName};

/// One recorded interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    ListNames(CallId),
    ListActivatableNames(CallId),
    FetchInterfaces(CallId, ClientName),
    FetchRole(CallId, ClientName, Role),
    Observe(CallId, ClientName, ObserveRequest),
    AddDispatchOperation(CallId, ClientName, ApprovalRequest),
    Handle(CallId, ClientName, HandleRequest),
    HandleInternally(CallId, HandleRequest),
    Reply(ReplyId, Result<(), DispatchError>),
    DelegateReply(ReplyId, DelegationOutcome),
    Finished(OperationId),
    ChannelLost(OperationId, ChannelPath, DispatchError),
    Close(ChannelPath, CloseReason),
    Watch(UniqueName),
    Unwatch(UniqueName),
}

impl BusEvent {
    /// Call id for events that expect a completion.
    pub fn call(&self) -> Option<CallId> {
        match self {
            Self::ListNames(call)
            | Self::ListActivatableNames(call)
            | Self::FetchInterfaces(call, _)
            | Self::FetchRole(call, _, _)
            | Self::Observe(call, _, _)
            | Self::AddDispatchOperation(call, _, _)
            | Self::Handle(call, _, _)
            | Self::HandleInternally(call, _) => Some(*call),
            _ => None,
        }
    }
}

/// Bus that records instead of sending.
#[derive(Debug, Default)]
pub struct RecordingBus {
    events: Vec<BusEvent>,
    cursor: usize,
}

impl RecordingBus {
    /// Every event recorded so far.
    pub fn events(&self) -> &[BusEvent] {
        &self.events
    }

    /// Events recorded since the previous call.
    pub fn take_new(&mut self) -> Vec<BusEvent> {
        let fresh = self.events.get(self.cursor..).unwrap_or_default().to_vec();
        self.cursor = self.events.len();
        fresh
    }

    /// Handler invocations, in order.
    pub fn handled_by(&self) -> Vec<ClientName> {
        self.events
            .iter()
            .filter_map(|event| match event {
                BusEvent::Handle(_, handler, _) => Some(handler.clone()),
                _ => None,
            })
            .collect()
    }

    /// Observer invocations, in order.
    pub fn observed_by(&self) -> Vec<ClientName> {
        self.events
            .iter()
            .filter_map(|event| match event {
                BusEvent::Observe(_, observer, _) => Some(observer.clone()),
                _ => None,
            })
            .collect()
    }

    /// Approver invocations, in order.
    pub fn approved_by(&self) -> Vec<ClientName> {
        self.events
            .iter()
            .filter_map(|event| match event {
                BusEvent::AddDispatchOperation(_, approver, _) => Some(approver.clone()),
                _ => None,
            })
            .collect()
    }

    /// Replies sent for `reply`.
    pub fn replies(&self, reply: ReplyId) -> Vec<Result<(), DispatchError>> {
        self.events
            .iter()
            .filter_map(|event| match event {
                BusEvent::Reply(id, result) if *id == reply => Some(result.clone()),
                _ => None,
            })
            .collect()
    }

    /// Outcome sent for the delegation answered through `reply`.
    pub fn delegation(&self, reply: ReplyId) -> Option<DelegationOutcome> {
        self.events.iter().find_map(|event| match event {
            BusEvent::DelegateReply(id, outcome) if *id == reply => Some(outcome.clone()),
            _ => None,
        })
    }

    /// Number of `Finished` signals for `operation`.
    pub fn finished_count(&self, operation: OperationId) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, BusEvent::Finished(id) if *id == operation))
            .count()
    }

    /// Channels closed, with reasons.
    pub fn closed(&self) -> Vec<(ChannelPath, CloseReason)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                BusEvent::Close(path, reason) => Some((path.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// Position of the first event matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&BusEvent) -> bool) -> Option<usize> {
        self.events.iter().position(predicate)
    }

    fn record(&mut self, event: BusEvent) {
        self.events.push(event);
    }
}

impl Bus for RecordingBus {
    fn list_names(&mut self, call: CallId) {
        self.record(BusEvent::ListNames(call));
    }

    fn list_activatable_names(&mut self, call: CallId) {
        self.record(BusEvent::ListActivatableNames(call));
    }

    fn fetch_client_interfaces(&mut self, call: CallId, client: &ClientName) {
        self.record(BusEvent::FetchInterfaces(call, client.clone()));
    }

    fn fetch_role_properties(&mut self, call: CallId, client: &ClientName, role: Role) {
        self.record(BusEvent::FetchRole(call, client.clone(), role));
    }

    fn observe_channels(&mut self, call: CallId, observer: &ClientName, request: ObserveRequest) {
        self.record(BusEvent::Observe(call, observer.clone(), request));
    }

    fn add_dispatch_operation(
        &mut self,
        call: CallId,
        approver: &ClientName,
        request: ApprovalRequest,
    ) {
        self.record(BusEvent::AddDispatchOperation(call, approver.clone(), request));
    }

    fn handle_channels(&mut self, call: CallId, handler: &ClientName, request: HandleRequest) {
        self.record(BusEvent::Handle(call, handler.clone(), request));
    }

    fn handle_internally(&mut self, call: CallId, request: HandleRequest) {
        self.record(BusEvent::HandleInternally(call, request));
    }

    fn reply(&mut self, reply: ReplyId, result: Result<(), DispatchError>) {
        self.record(BusEvent::Reply(reply, result));
    }

    fn delegate_reply(&mut self, reply: ReplyId, outcome: DelegationOutcome) {
        self.record(BusEvent::DelegateReply(reply, outcome));
    }

    fn emit_finished(&mut self, operation: OperationId) {
        self.record(BusEvent::Finished(operation));
    }

    fn emit_channel_lost(
        &mut self,
        operation: OperationId,
        channel: &ChannelPath,
        error: &DispatchError,
    ) {
        self.record(BusEvent::ChannelLost(
            operation,
            channel.clone(),
            error.clone(),
        ));
    }

    fn close_channel(&mut self, channel: &ChannelPath, reason: CloseReason) {
        self.record(BusEvent::Close(channel.clone(), reason));
    }

    fn watch_owner(&mut self, owner: &UniqueName) {
        self.record(BusEvent::Watch(owner.clone()));
    }

    fn unwatch_owner(&mut self, owner: &UniqueName) {
        self.record(BusEvent::Unwatch(owner.clone()));
    }
}
