//! Book-keeping for outbound calls awaiting completion.
//!
//! Each call is registered before it is issued and removed when its single
//! completion arrives, so a completion can never be processed twice.

use std::collections::BTreeMap;

use crate::client::RegistryTask;
use crate::names::{CallId, ChannelPath, ClientName, OperationId, ReplyId};
use crate::operation::HandlerTarget;

/// What an outbound call was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallPurpose {
    /// Census or introspection on behalf of the registry.
    Registry(RegistryTask),
    /// `ObserveChannels` for a dispatch operation.
    Observe {
        operation: OperationId,
        delay_approvers: bool,
    },
    /// `ObserveChannels` replaying a handled channel to a recovering observer.
    Recover { channel: ChannelPath },
    /// `AddDispatchOperation`.
    Approve { operation: OperationId },
    /// `HandleChannels` for a dispatch operation.
    Handle {
        operation: OperationId,
        target: HandlerTarget,
    },
    /// `HandleChannels` moving a handled channel to another handler.
    Delegate {
        reply: ReplyId,
        channel: ChannelPath,
        handler: ClientName,
    },
    /// `HandleChannels` re-presenting a handled channel.
    Present {
        reply: ReplyId,
        channel: ChannelPath,
        handler: ClientName,
    },
}

/// A call waiting for its completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingCall {
    /// Client the call went to, when it went to one.
    pub target: Option<ClientName>,
    /// What the completion should be routed to.
    pub purpose: CallPurpose,
}

/// Outstanding calls keyed by id.
#[derive(Debug, Default)]
pub(crate) struct CallTable {
    next: u64,
    pending: BTreeMap<CallId, PendingCall>,
}

impl CallTable {
    /// Registers a call and returns the id to issue it with.
    pub fn issue(&mut self, target: Option<&ClientName>, purpose: CallPurpose) -> CallId {
        self.next += 1;
        let call = CallId::new(self.next);
        self.pending.insert(
            call,
            PendingCall {
                target: target.cloned(),
                purpose,
            },
        );
        call
    }

    /// Removes a call; `None` when it already completed or never existed.
    pub fn take(&mut self, call: CallId) -> Option<PendingCall> {
        self.pending.remove(&call)
    }

    /// Calls still waiting on `client`, in issue order.
    pub fn targeting(&self, client: &ClientName) -> Vec<CallId> {
        self.pending
            .iter()
            .filter(|(_, pending)| pending.target.as_ref() == Some(client))
            .map(|(call, _)| *call)
            .collect()
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Every outstanding call, in issue order.
    pub fn drain(&mut self) -> Vec<(CallId, PendingCall)> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}
