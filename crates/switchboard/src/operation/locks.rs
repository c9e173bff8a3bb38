//! The re-evaluation entry point and the approver phase.

use switchboard_config::ApproverScheduling;
use tracing::debug;

use super::{
    Approval, DispatchOperation, HandlerTarget, OPERATION_TARGET, OperationContext, Resolution,
};
use crate::bus::{ApprovalRequest, CallOutcome, CloseReason};
use crate::calls::CallPurpose;
use crate::error::DispatchError;
use crate::names::ClientName;

/// Outcome of choosing the next handler.
pub(super) enum Selection {
    /// Invoke this handler.
    Chosen(HandlerTarget),
    /// A named directive was dropped; look at the queue again.
    Retry,
    /// Nobody is left to try.
    Exhausted,
}

impl DispatchOperation {
    /// Re-evaluates what the operation can do next.
    ///
    /// Runs after every counter change, new directive or plugin delay
    /// change. Does nothing until observers are invoked; signals the result
    /// once the completion gate opens.
    pub fn check_client_locks(&mut self, ctx: &mut OperationContext<'_>) {
        self.advance(ctx);
        self.signal_if_allowed(ctx);
    }

    fn advance(&mut self, ctx: &mut OperationContext<'_>) {
        if !self.observers_invoked || self.result.is_some() {
            return;
        }

        if self.trying.is_none() {
            if let Some(error) = self.channel.failure().cloned() {
                self.abort(ctx, error);
                return;
            }
        }

        if !self.delays.is_empty() {
            return;
        }

        if self.options.observe_only {
            if self.may_signal() {
                self.resolve(ctx, Resolution::ObservedOnly);
            }
            return;
        }

        let directed = matches!(
            self.approvals.front(),
            Some(Approval::HandleWith { handler: Some(_), .. } | Approval::Claim { .. })
        );
        if !self.options.internal && self.candidates.is_empty() && !directed {
            self.fail_not_capable(ctx, "no possible handlers");
            return;
        }

        if self.should_run_approvers(ctx) {
            self.run_approvers(ctx);
        }

        loop {
            if self.pending.approvers > 0 || self.trying.is_some() || self.result.is_some() {
                return;
            }
            if matches!(self.approvals.front(), Some(Approval::Claim { .. })) {
                self.resolve_claim(ctx);
                return;
            }
            if !self.is_approved() && !self.can_bypass_approval(ctx.registry) {
                return;
            }
            match self.select_handler(ctx) {
                Selection::Chosen(target) => self.invoke_handler(ctx, target),
                Selection::Retry => {}
                Selection::Exhausted => {
                    self.fail_not_capable(ctx, "handler no longer available");
                    return;
                }
            }
        }
    }

    fn should_run_approvers(&self, ctx: &OperationContext<'_>) -> bool {
        if !self.needs_approval || self.approvers_invoked || self.pending.delay_sensitive > 0 {
            return false;
        }
        if self.options.scheduling == ApproverScheduling::AfterObservers
            && self.pending.observers > 0
        {
            return false;
        }
        !self.can_bypass_approval(ctx.registry)
    }

    /// Approved once a non-claim directive heads the queue.
    pub(super) fn is_approved(&self) -> bool {
        matches!(
            self.approvals.front(),
            Some(
                Approval::Requested { .. }
                    | Approval::HandleWith { .. }
                    | Approval::NoApproverObjected
            )
        )
    }

    fn run_approvers(&mut self, ctx: &mut OperationContext<'_>) {
        self.approvers_invoked = true;
        let approvers = ctx.registry.approvers_for(self.channel.properties());
        if approvers.is_empty() {
            debug!(
                target: OPERATION_TARGET,
                operation = %self.id,
                "no approvers; treating as approved"
            );
            self.approvals.push_back(Approval::NoApproverObjected);
            return;
        }

        for approver in approvers {
            self.pending.approvers += 1;
            let call = ctx.calls.issue(
                Some(&approver),
                CallPurpose::Approve {
                    operation: self.id,
                },
            );
            let request = ApprovalRequest {
                operation: self.id,
                account: self.channel.account().clone(),
                channel: self.channel.path().clone(),
                properties: self.channel.properties().clone(),
                possible_handlers: self.candidates.clone(),
            };
            ctx.bus.add_dispatch_operation(call, &approver, request);
        }
    }

    /// Consumes an approver completion.
    ///
    /// When every approver has answered and none accepted the operation,
    /// it proceeds as if approved.
    pub fn on_approver_done(
        &mut self,
        ctx: &mut OperationContext<'_>,
        approver: Option<&ClientName>,
        outcome: &CallOutcome,
    ) {
        self.pending.approvers = self.pending.approvers.saturating_sub(1);
        match outcome {
            Ok(_) => self.approver_successes += 1,
            Err(error) => debug!(
                target: OPERATION_TARGET,
                operation = %self.id,
                approver = ?approver,
                error = %error,
                "approver failed"
            ),
        }
        if self.pending.approvers == 0 && self.approver_successes == 0 && self.result.is_none() {
            debug!(
                target: OPERATION_TARGET,
                operation = %self.id,
                "every approver failed; treating as approved"
            );
            self.approvals.push_back(Approval::NoApproverObjected);
        }
        self.check_client_locks(ctx);
    }

    fn resolve_claim(&mut self, ctx: &mut OperationContext<'_>) {
        let Some(Approval::Claim { claimer, reply }) = self.approvals.pop_front() else {
            return;
        };
        let owner_name = ctx
            .registry
            .find_by_unique(&claimer)
            .map(|record| record.name().clone());
        ctx.handler_map.record(
            self.channel.clone(),
            Some(claimer.clone()),
            owner_name,
            ctx.bus,
        );
        ctx.bus.reply(reply, Ok(()));
        self.approvers_invoked = true;
        self.resolve(ctx, Resolution::Claimed(claimer));
    }

    /// Terminates after cancellation or a failed channel.
    fn abort(&mut self, ctx: &mut OperationContext<'_>, error: DispatchError) {
        if error == DispatchError::Cancelled {
            ctx.bus
                .close_channel(self.channel.path(), CloseReason::Cancelled);
        }
        self.resolve(ctx, Resolution::Failed(error));
    }

    /// Closes the channel as undispatchable and fails with "not capable".
    pub(super) fn fail_not_capable(&mut self, ctx: &mut OperationContext<'_>, message: &str) {
        debug!(
            target: OPERATION_TARGET,
            operation = %self.id,
            channel = %self.channel.path(),
            reason = message,
            "channel is undispatchable"
        );
        ctx.bus.close_channel(
            self.channel.path(),
            CloseReason::undispatchable(message),
        );
        self.resolve(ctx, Resolution::Failed(DispatchError::NotCapable));
    }
}
