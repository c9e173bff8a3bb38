//! Handler selection, invocation and completion.

use tracing::debug;

use super::locks::Selection;
use super::{Approval, DispatchOperation, HandlerTarget, OPERATION_TARGET, OperationContext, Resolution};
use crate::bus::{CallOutcome, HandleRequest};
use crate::calls::CallPurpose;
use crate::error::DispatchError;
use crate::policy::evaluate_chain;

impl DispatchOperation {
    /// Picks the next handler to try.
    ///
    /// A named `HandleWith` always gets a try, even after an earlier failure,
    /// but is failed at once when its client is unknown. A requested
    /// channel's preferred handler is tried before the ranked list unless it
    /// has failed or vanished. Otherwise the first live candidate wins, as
    /// long as the operation is approved or that candidate bypasses approval.
    pub(super) fn select_handler(&mut self, ctx: &mut OperationContext<'_>) -> Selection {
        if self.options.internal {
            return if self.internal_failed {
                Selection::Exhausted
            } else {
                Selection::Chosen(HandlerTarget::Internal)
            };
        }

        match self.approvals.front() {
            Some(Approval::HandleWith {
                handler: Some(name),
                ..
            }) => {
                if ctx.registry.lookup(name).is_some() {
                    return Selection::Chosen(HandlerTarget::Client(name.clone()));
                }
                let error = DispatchError::does_not_exist(name.clone());
                self.fail_head(ctx, error);
                return Selection::Retry;
            }
            Some(Approval::Requested {
                preferred: Some(name),
            }) if ctx.registry.lookup(name).is_some() && !self.failed.contains(name) => {
                return Selection::Chosen(HandlerTarget::Client(name.clone()));
            }
            _ => {}
        }

        let approved = self.is_approved();
        self.live_candidates(ctx.registry)
            .find(|name| {
                approved
                    || ctx
                        .registry
                        .lookup(name)
                        .is_some_and(|record| record.bypasses_approval())
            })
            .map_or(Selection::Exhausted, |name| {
                Selection::Chosen(HandlerTarget::Client(name.clone()))
            })
    }

    /// Hands the channel to `target` unless a policy refuses it.
    pub(super) fn invoke_handler(&mut self, ctx: &mut OperationContext<'_>, target: HandlerTarget) {
        if let HandlerTarget::Client(name) = &target {
            if let Err(error) = evaluate_chain(ctx.policies, name, &self.channel) {
                self.record_failure(ctx, &target, error);
                return;
            }
        }

        let request = HandleRequest {
            account: self.channel.account().clone(),
            channel: self.channel.path().clone(),
            properties: self.channel.properties().clone(),
            satisfied_requests: self.channel.satisfied_requests(),
            user_action_time: self.user_action_time(),
        };
        let call = ctx.calls.issue(
            target.client(),
            CallPurpose::Handle {
                operation: self.id,
                target: target.clone(),
            },
        );
        debug!(
            target: OPERATION_TARGET,
            operation = %self.id,
            handler = %target,
            "invoking handler"
        );
        match &target {
            HandlerTarget::Client(name) => ctx.bus.handle_channels(call, name, request),
            HandlerTarget::Internal => ctx.bus.handle_internally(call, request),
        }
        self.trying = Some(target);
    }

    /// Consumes the completion of a handler invocation.
    pub fn on_handler_done(
        &mut self,
        ctx: &mut OperationContext<'_>,
        target: &HandlerTarget,
        outcome: CallOutcome,
    ) {
        if self.trying.as_ref() != Some(target) {
            debug!(
                target: OPERATION_TARGET,
                operation = %self.id,
                handler = %target,
                "ignoring reply from a handler that is not being tried"
            );
            return;
        }
        self.trying = None;

        if self.result.is_some() {
            debug!(
                target: OPERATION_TARGET,
                operation = %self.id,
                handler = %target,
                "ignoring late handler reply"
            );
            self.check_client_locks(ctx);
            return;
        }

        match outcome {
            Ok(_) => self.handler_succeeded(ctx, target),
            Err(source) => {
                let error = match target {
                    HandlerTarget::Client(name) => DispatchError::handler_failed(name.clone(), source),
                    HandlerTarget::Internal => DispatchError::NotCapable,
                };
                self.record_failure(ctx, target, error);
                self.check_client_locks(ctx);
            }
        }
    }

    fn handler_succeeded(&mut self, ctx: &mut OperationContext<'_>, target: &HandlerTarget) {
        let winner = target.client();
        let owner = winner
            .and_then(|name| ctx.registry.lookup(name))
            .and_then(|record| record.unique_name().cloned());
        ctx.handler_map
            .record(self.channel.clone(), owner, winner.cloned(), ctx.bus);

        for approval in self.approvals.drain(..) {
            match approval {
                Approval::HandleWith { handler, reply, .. } => {
                    let fulfilled = handler.is_none() || handler.as_ref() == winner;
                    let result = if fulfilled {
                        Ok(())
                    } else {
                        Err(DispatchError::NotYours)
                    };
                    ctx.bus.reply(reply, result);
                }
                Approval::Claim { reply, .. } => ctx.bus.reply(reply, Err(DispatchError::NotYours)),
                Approval::Requested { .. } | Approval::NoApproverObjected => {}
            }
        }

        self.resolve(ctx, Resolution::Handled(target.clone()));
    }

    /// Remembers that `target` failed and fails the directive that named it.
    ///
    /// Once every candidate has failed the channel is closed.
    fn record_failure(
        &mut self,
        ctx: &mut OperationContext<'_>,
        target: &HandlerTarget,
        error: DispatchError,
    ) {
        ctx.reporter.handler_failed(self.id, target, &error);
        match target {
            HandlerTarget::Client(name) => {
                self.failed.insert(name.clone());
            }
            HandlerTarget::Internal => self.internal_failed = true,
        }

        let named_head = matches!(
            self.approvals.front(),
            Some(Approval::HandleWith { handler: Some(name), .. })
                if target.client() == Some(name)
        );
        if named_head {
            self.fail_head(ctx, error);
        }

        if self.every_candidate_failed() {
            self.fail_not_capable(ctx, "no handler accepted the channel");
        }
    }

    fn every_candidate_failed(&self) -> bool {
        if self.options.internal {
            return self.internal_failed;
        }
        !self.candidates.is_empty()
            && self
                .candidates
                .iter()
                .all(|name| self.failed.contains(name))
    }

    /// Pops the head directive and answers it with `error`.
    fn fail_head(&mut self, ctx: &mut OperationContext<'_>, error: DispatchError) {
        if let Some(reply) = self.approvals.pop_front().and_then(|head| head.reply()) {
            ctx.bus.reply(reply, Err(error));
        }
    }

    fn user_action_time(&self) -> u64 {
        match self.approvals.front() {
            Some(Approval::HandleWith {
                user_action_time, ..
            }) if *user_action_time != 0 => *user_action_time,
            _ => self.channel.user_action_time(),
        }
    }
}
