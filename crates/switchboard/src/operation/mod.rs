//! Per-channel dispatch operations.
//!
//! A [`DispatchOperation`] carries one channel from "ready to offer" to a
//! single owner, or to failure. It runs observers, then approvers (unless a
//! candidate may bypass approval), then tries handlers one at a time in
//! ranked order. Progress is driven by counters of outstanding calls and a
//! single re-evaluation entry point, `check_client_locks`, which runs after
//! every completion, directive or delay change.
//!
//! `Finished` and `ChannelLost` are only signalled once observers have been
//! invoked and no observer or approver call is outstanding; a result reached
//! earlier is held back until then and signalled exactly once.

mod handlers;
mod locks;

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use switchboard_config::ApproverScheduling;
use tracing::debug;

use crate::bus::{Bus, CallOutcome, ObserveRequest};
use crate::calls::{CallPurpose, CallTable};
use crate::channel::Channel;
use crate::client::{ClientRecord, ClientRegistry};
use crate::error::DispatchError;
use crate::handler_map::HandlerMap;
use crate::names::{ClientName, DelayId, OperationId, ReplyId, UniqueName};
use crate::policy::HandlerPolicy;
use crate::reporter::DispatchReporter;

const OPERATION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::operation");

/// Who a channel is handed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerTarget {
    /// A registered handler client.
    Client(ClientName),
    /// The dispatcher's own in-process handler.
    Internal,
}

impl HandlerTarget {
    /// Client name, unless the target is internal.
    #[must_use]
    pub const fn client(&self) -> Option<&ClientName> {
        match self {
            Self::Client(name) => Some(name),
            Self::Internal => None,
        }
    }
}

impl fmt::Display for HandlerTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(name) => fmt::Display::fmt(name, formatter),
            Self::Internal => formatter.write_str("<internal>"),
        }
    }
}

/// How an operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A handler accepted the channel.
    Handled(HandlerTarget),
    /// A third party claimed the channel.
    Claimed(UniqueName),
    /// The channel was only to be observed.
    ObservedOnly,
    /// Dispatching failed.
    Failed(DispatchError),
}

impl Resolution {
    /// Error given to directives still pending when the operation ends.
    #[must_use]
    pub fn directive_error(&self) -> DispatchError {
        match self {
            Self::Failed(error) => error.clone(),
            Self::Handled(_) | Self::Claimed(_) | Self::ObservedOnly => DispatchError::NotYours,
        }
    }
}

/// One way an operation may be resolved, queued in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Approval {
    /// The channel was requested locally and needs no approval.
    Requested { preferred: Option<ClientName> },
    /// An approver (or a presentation) asked for a handler.
    HandleWith {
        handler: Option<ClientName>,
        user_action_time: u64,
        reply: ReplyId,
    },
    /// A process asked to take the channel itself.
    Claim { claimer: UniqueName, reply: ReplyId },
    /// Approvers ran and none objected.
    NoApproverObjected,
}

impl Approval {
    const fn reply(&self) -> Option<ReplyId> {
        match self {
            Self::HandleWith { reply, .. } | Self::Claim { reply, .. } => Some(*reply),
            Self::Requested { .. } | Self::NoApproverObjected => None,
        }
    }
}

/// How an operation is configured at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OperationOptions {
    pub observe_only: bool,
    pub internal: bool,
    pub scheduling: ApproverScheduling,
}

/// Borrowed collaborators an operation acts through.
pub(crate) struct OperationContext<'a> {
    pub registry: &'a ClientRegistry,
    pub handler_map: &'a mut HandlerMap,
    pub bus: &'a mut dyn Bus,
    pub calls: &'a mut CallTable,
    pub policies: &'a [Box<dyn HandlerPolicy>],
    pub reporter: &'a dyn DispatchReporter,
}

#[derive(Debug, Default, Clone, Copy)]
struct Pending {
    observers: usize,
    approvers: usize,
    delay_sensitive: usize,
}

/// Orchestrates observe, approve and handle for one channel.
#[derive(Debug)]
pub(crate) struct DispatchOperation {
    id: OperationId,
    channel: Channel,
    candidates: Vec<ClientName>,
    options: OperationOptions,
    needs_approval: bool,
    approvals: VecDeque<Approval>,
    failed: BTreeSet<ClientName>,
    internal_failed: bool,
    pending: Pending,
    delays: BTreeSet<DelayId>,
    observers_invoked: bool,
    approvers_invoked: bool,
    approver_successes: usize,
    trying: Option<HandlerTarget>,
    result: Option<Resolution>,
    signalled: bool,
}

impl DispatchOperation {
    /// Creates an operation over a ranked candidate list.
    ///
    /// Locally requested channels skip approval; their request (and any
    /// preferred handler it names) is queued as the first approval.
    pub fn new(
        id: OperationId,
        channel: Channel,
        candidates: Vec<ClientName>,
        options: OperationOptions,
    ) -> Self {
        let requested = channel.is_requested() || options.internal;
        let needs_approval = !requested && !options.observe_only;
        let mut approvals = VecDeque::new();
        if requested && !options.observe_only {
            approvals.push_back(Approval::Requested {
                preferred: channel
                    .request()
                    .and_then(|request| request.preferred_handler.clone()),
            });
        }
        Self {
            id,
            channel,
            candidates,
            options,
            needs_approval,
            approvals,
            failed: BTreeSet::new(),
            internal_failed: false,
            pending: Pending::default(),
            delays: BTreeSet::new(),
            observers_invoked: false,
            approvers_invoked: false,
            approver_successes: 0,
            trying: None,
            result: None,
            signalled: false,
        }
    }

    pub const fn id(&self) -> OperationId {
        self.id
    }

    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Finished has been signalled; the operation can be released.
    pub const fn is_finished(&self) -> bool {
        self.signalled
    }

    #[cfg(test)]
    pub const fn result(&self) -> Option<&Resolution> {
        self.result.as_ref()
    }

    #[cfg(test)]
    pub const fn pending_approvers(&self) -> usize {
        self.pending.approvers
    }

    #[cfg(test)]
    pub const fn is_trying(&self) -> bool {
        self.trying.is_some()
    }

    /// Invokes observers and starts the lock checks.
    ///
    /// Observers are skipped when every candidate that still exists may
    /// bypass them, or when the channel already failed while queued.
    /// `delays` are plugin delays granted before the start.
    pub fn run_clients(&mut self, ctx: &mut OperationContext<'_>, delays: Vec<DelayId>) {
        self.delays.extend(delays);
        ctx.reporter
            .operation_started(self.id, self.channel.path(), &self.candidates);

        if let Some(error) = self.channel.failure() {
            debug!(
                target: OPERATION_TARGET,
                operation = %self.id,
                %error,
                "channel failed before dispatch; skipping observers"
            );
        } else if self.can_bypass_observers(ctx.registry) {
            debug!(
                target: OPERATION_TARGET,
                operation = %self.id,
                "every candidate bypasses observers"
            );
        } else {
            for (observer, delay_approvers) in ctx.registry.observers_for(self.channel.properties())
            {
                self.pending.observers += 1;
                if delay_approvers {
                    self.pending.delay_sensitive += 1;
                }
                let call = ctx.calls.issue(
                    Some(&observer),
                    CallPurpose::Observe {
                        operation: self.id,
                        delay_approvers,
                    },
                );
                ctx.bus
                    .observe_channels(call, &observer, self.observe_request());
            }
        }

        self.observers_invoked = true;
        self.check_client_locks(ctx);
    }

    /// Consumes an observer completion.
    pub fn on_observer_done(
        &mut self,
        ctx: &mut OperationContext<'_>,
        observer: Option<&ClientName>,
        delay_approvers: bool,
        outcome: &CallOutcome,
    ) {
        if let Err(error) = outcome {
            debug!(
                target: OPERATION_TARGET,
                operation = %self.id,
                observer = ?observer,
                error = %error,
                "observer failed"
            );
        }
        self.pending.observers = self.pending.observers.saturating_sub(1);
        if delay_approvers {
            self.pending.delay_sensitive = self.pending.delay_sensitive.saturating_sub(1);
        }
        self.check_client_locks(ctx);
    }

    /// Ends a plugin delay; returns `false` for an unknown delay.
    pub fn end_delay(&mut self, ctx: &mut OperationContext<'_>, delay: DelayId) -> bool {
        if !self.delays.remove(&delay) {
            return false;
        }
        self.check_client_locks(ctx);
        true
    }

    /// Queues an explicit handler choice.
    pub fn handle_with(
        &mut self,
        ctx: &mut OperationContext<'_>,
        handler: Option<ClientName>,
        user_action_time: u64,
        reply: ReplyId,
    ) {
        if let Some(result) = &self.result {
            ctx.bus.reply(reply, Err(result.directive_error()));
            return;
        }
        self.approvals.push_back(Approval::HandleWith {
            handler,
            user_action_time,
            reply,
        });
        self.check_client_locks(ctx);
    }

    /// Queues a claim by `claimer`.
    pub fn claim(&mut self, ctx: &mut OperationContext<'_>, claimer: UniqueName, reply: ReplyId) {
        if let Some(result) = &self.result {
            ctx.bus.reply(reply, Err(result.directive_error()));
            return;
        }
        self.approvals
            .push_back(Approval::Claim { claimer, reply });
        self.check_client_locks(ctx);
    }

    /// Marks the originating request as cancelled.
    pub fn cancel(&mut self, ctx: &mut OperationContext<'_>) {
        self.channel.fail(DispatchError::Cancelled);
        self.check_client_locks(ctx);
    }

    /// The channel closed underneath the operation.
    pub fn lose_channel(&mut self, ctx: &mut OperationContext<'_>, reason: &str) {
        let error = DispatchError::channel_lost(reason);
        self.channel.fail(error.clone());
        self.resolve(ctx, Resolution::Failed(error));
    }

    /// Fails every directive with [`DispatchError::ShuttingDown`] and ends
    /// the operation without signalling.
    pub fn shut_down(&mut self, bus: &mut dyn Bus) {
        for approval in self.approvals.drain(..) {
            if let Some(reply) = approval.reply() {
                bus.reply(reply, Err(DispatchError::ShuttingDown));
            }
        }
        if self.result.is_none() {
            self.result = Some(Resolution::Failed(DispatchError::ShuttingDown));
        }
        self.signalled = true;
    }

    fn observe_request(&self) -> ObserveRequest {
        ObserveRequest {
            account: self.channel.account().clone(),
            channel: self.channel.path().clone(),
            properties: self.channel.properties().clone(),
            operation: self.needs_approval.then_some(self.id),
            satisfied_requests: self.channel.satisfied_requests(),
            recovering: false,
        }
    }

    /// Candidates that still exist and have not failed, in rank order.
    fn live_candidates<'a>(
        &'a self,
        registry: &'a ClientRegistry,
    ) -> impl Iterator<Item = &'a ClientName> + 'a {
        self.candidates.iter().filter(move |name| {
            !self.failed.contains(*name) && registry.lookup(name).is_some()
        })
    }

    /// The best live candidate decides whether approval can be skipped.
    fn can_bypass_approval(&self, registry: &ClientRegistry) -> bool {
        self.live_candidates(registry)
            .next()
            .and_then(|name| registry.lookup(name))
            .is_some_and(ClientRecord::bypasses_approval)
    }

    fn can_bypass_observers(&self, registry: &ClientRegistry) -> bool {
        let mut live = self.live_candidates(registry).peekable();
        live.peek().is_some()
            && live.all(|name| {
                registry
                    .lookup(name)
                    .is_some_and(ClientRecord::bypasses_observers)
            })
    }

    const fn may_signal(&self) -> bool {
        self.observers_invoked && self.pending.observers == 0 && self.pending.approvers == 0
    }

    /// Sets the write-once result and fails leftover directives.
    fn resolve(&mut self, ctx: &mut OperationContext<'_>, resolution: Resolution) {
        if self.result.is_some() {
            return;
        }
        let error = resolution.directive_error();
        for approval in self.approvals.drain(..) {
            if let Some(reply) = approval.reply() {
                ctx.bus.reply(reply, Err(error.clone()));
            }
        }
        ctx.reporter
            .operation_finished(self.id, self.channel.path(), &resolution);
        self.result = Some(resolution);
        self.signal_if_allowed(ctx);
    }

    /// Replays the result as bus signals once the gate opens.
    fn signal_if_allowed(&mut self, ctx: &mut OperationContext<'_>) {
        if self.signalled || !self.may_signal() {
            return;
        }
        let Some(result) = &self.result else {
            return;
        };
        self.signalled = true;
        if let Resolution::Failed(error) = result {
            ctx.bus
                .emit_channel_lost(self.id, self.channel.path(), error);
        }
        ctx.bus.emit_finished(self.id);
    }
}
