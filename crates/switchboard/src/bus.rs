//! Boundary between the dispatcher and the message bus.
//!
//! The dispatcher never blocks. Every request/response call is issued
//! through [`Bus`] together with a [`CallId`]; the event loop later feeds
//! exactly one completion for that id back through
//! [`crate::Dispatcher::on_call_completed`]. Replies, signals, channel
//! closes and liveness subscriptions are fire-and-forget.

use std::fmt;

use crate::client::{Role, RoleProperties};
use crate::error::{CallError, DispatchError};
use crate::names::{
    AccountPath, CallId, ChannelPath, ClientName, OperationId, ReplyId, RequestPath, UniqueName,
};
use crate::properties::PropertyMap;

/// Outbound operations the dispatcher performs on the bus.
pub trait Bus {
    /// Lists names currently owned on the bus, with their owners.
    fn list_names(&mut self, call: CallId);

    /// Lists names the bus can activate on demand.
    fn list_activatable_names(&mut self, call: CallId);

    /// Fetches the roles a client implements.
    fn fetch_client_interfaces(&mut self, call: CallId, client: &ClientName);

    /// Fetches the properties of one role of a client.
    fn fetch_role_properties(&mut self, call: CallId, client: &ClientName, role: Role);

    /// Calls `ObserveChannels` on an observer.
    fn observe_channels(&mut self, call: CallId, observer: &ClientName, request: ObserveRequest);

    /// Calls `AddDispatchOperation` on an approver.
    fn add_dispatch_operation(
        &mut self,
        call: CallId,
        approver: &ClientName,
        request: ApprovalRequest,
    );

    /// Calls `HandleChannels` on a handler.
    fn handle_channels(&mut self, call: CallId, handler: &ClientName, request: HandleRequest);

    /// Hands a channel to the dispatcher's own in-process handler.
    fn handle_internally(&mut self, call: CallId, request: HandleRequest);

    /// Answers an inbound approver or presentation call.
    fn reply(&mut self, reply: ReplyId, result: Result<(), DispatchError>);

    /// Answers an inbound delegation call.
    fn delegate_reply(&mut self, reply: ReplyId, outcome: DelegationOutcome);

    /// Emits `Finished` on a dispatch operation.
    fn emit_finished(&mut self, operation: OperationId);

    /// Emits `ChannelLost` on a dispatch operation.
    fn emit_channel_lost(
        &mut self,
        operation: OperationId,
        channel: &ChannelPath,
        error: &DispatchError,
    );

    /// Closes a channel, best effort.
    fn close_channel(&mut self, channel: &ChannelPath, reason: CloseReason);

    /// Starts delivering owner-change events for `owner`.
    fn watch_owner(&mut self, owner: &UniqueName);

    /// Stops delivering owner-change events for `owner`.
    fn unwatch_owner(&mut self, owner: &UniqueName);
}

/// A bus name and its current owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameOwner {
    /// Bus name.
    pub name: String,
    /// Owner, when the name is currently owned.
    pub owner: Option<UniqueName>,
}

impl NameOwner {
    /// Creates an owned name.
    pub fn owned(name: impl Into<String>, owner: impl Into<UniqueName>) -> Self {
        Self {
            name: name.into(),
            owner: Some(owner.into()),
        }
    }

    /// Creates a name without an owner.
    pub fn unowned(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: None,
        }
    }
}

/// Successful result of an outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallReply {
    /// Call with no payload.
    Unit,
    /// Result of a name listing.
    Names(Vec<NameOwner>),
    /// Roles a client implements.
    Interfaces(Vec<Role>),
    /// Properties of one role.
    Role(RoleProperties),
}

/// Completion delivered for one outbound call.
pub type CallOutcome = Result<CallReply, CallError>;

/// Payload of `ObserveChannels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserveRequest {
    /// Account the channel belongs to.
    pub account: AccountPath,
    /// Channel being observed.
    pub channel: ChannelPath,
    /// Channel properties.
    pub properties: PropertyMap,
    /// Dispatch operation approvers will see, if any.
    pub operation: Option<OperationId>,
    /// Requests the channel satisfies.
    pub satisfied_requests: Vec<RequestPath>,
    /// The channel is already handled and is being replayed.
    pub recovering: bool,
}

/// Payload of `AddDispatchOperation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    /// Operation to approve.
    pub operation: OperationId,
    /// Account the channel belongs to.
    pub account: AccountPath,
    /// Channel being dispatched.
    pub channel: ChannelPath,
    /// Channel properties.
    pub properties: PropertyMap,
    /// Ranked handlers the approver may choose from.
    pub possible_handlers: Vec<ClientName>,
}

/// Payload of `HandleChannels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleRequest {
    /// Account the channel belongs to.
    pub account: AccountPath,
    /// Channel to handle.
    pub channel: ChannelPath,
    /// Channel properties.
    pub properties: PropertyMap,
    /// Requests the channel satisfies.
    pub satisfied_requests: Vec<RequestPath>,
    /// User action time; zero when unknown.
    pub user_action_time: u64,
}

/// Why the dispatcher closed a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// No handler took the channel.
    Undispatchable {
        /// Explanation passed to the connection.
        message: String,
    },
    /// The owning handler left the bus.
    OwnerGone,
    /// The originating request was cancelled.
    Cancelled,
}

impl CloseReason {
    /// Creates an undispatchable reason.
    pub fn undispatchable(message: impl Into<String>) -> Self {
        Self::Undispatchable {
            message: message.into(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undispatchable { message } => write!(formatter, "undispatchable: {message}"),
            Self::OwnerGone => formatter.write_str("handler left the bus"),
            Self::Cancelled => formatter.write_str("request cancelled"),
        }
    }
}

/// Per-channel result of a delegation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationOutcome {
    /// Channels that moved, with their new handler.
    pub delegated: Vec<(ChannelPath, ClientName)>,
    /// Channels that stayed with the caller, with the reason.
    pub not_delegated: Vec<(ChannelPath, DispatchError)>,
}
