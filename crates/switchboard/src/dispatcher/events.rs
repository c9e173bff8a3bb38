//! Routing of bus events and call completions.

use tracing::debug;

use super::{DISPATCH_TARGET, Dispatcher};
use crate::bus::{Bus, CallOutcome};
use crate::calls::{CallPurpose, PendingCall};
use crate::client::RegistryEvent;
use crate::error::CallError;
use crate::names::{CallId, ClientName, UniqueName};

impl<B: Bus> Dispatcher<B> {
    /// Applies a name-owner change reported by the bus.
    ///
    /// `name` is either a unique connection name or a well-known name.
    /// A unique name losing its owner closes every channel that process
    /// handled. A client name losing its owner fails every call still
    /// waiting on it with [`CallError::PeerVanished`].
    pub fn on_name_owner_changed(&mut self, name: &str, new_owner: Option<UniqueName>) {
        if UniqueName::is_unique(name) {
            if new_owner.is_none() {
                self.owner_gone(&UniqueName::new(name));
            }
            return;
        }

        let Some(client) = self.registry.client_name(name) else {
            return;
        };
        self.registry
            .on_owner_changed(&client, new_owner.as_ref(), &mut self.bus, &mut self.calls);
        if new_owner.is_none() {
            self.fail_calls_to(&client);
        }
        self.process_registry_events();
    }

    fn owner_gone(&mut self, owner: &UniqueName) {
        let closed = self.handler_map.on_owner_gone(owner, &mut self.bus);
        if !closed.is_empty() {
            self.reporter.owner_vanished(owner, &closed);
        }
    }

    fn fail_calls_to(&mut self, client: &ClientName) {
        for call in self.calls.targeting(client) {
            debug!(
                target: DISPATCH_TARGET,
                client = %client,
                call = %call,
                "peer vanished; failing outstanding call"
            );
            self.on_call_completed(call, Err(CallError::PeerVanished));
        }
    }

    /// Delivers the single completion of an outbound call.
    ///
    /// Completions for unknown or already completed calls are dropped.
    pub fn on_call_completed(&mut self, call: CallId, outcome: CallOutcome) {
        let Some(PendingCall { target, purpose }) = self.calls.take(call) else {
            debug!(
                target: DISPATCH_TARGET,
                call = %call,
                "dropping completion for an unknown call"
            );
            return;
        };

        match purpose {
            CallPurpose::Registry(task) => {
                self.registry
                    .on_task_completed(task, outcome, &mut self.bus, &mut self.calls);
                self.process_registry_events();
            }
            CallPurpose::Observe {
                operation,
                delay_approvers,
            } => {
                let routed = self.with_operation(operation, |dispatch, ctx| {
                    dispatch.on_observer_done(ctx, target.as_ref(), delay_approvers, &outcome);
                });
                if routed.is_none() {
                    debug!(target: DISPATCH_TARGET, %operation, "late observer reply");
                }
            }
            CallPurpose::Approve { operation } => {
                let routed = self.with_operation(operation, |dispatch, ctx| {
                    dispatch.on_approver_done(ctx, target.as_ref(), &outcome);
                });
                if routed.is_none() {
                    debug!(target: DISPATCH_TARGET, %operation, "late approver reply");
                }
            }
            CallPurpose::Handle {
                operation,
                target: handler,
            } => {
                let routed = self.with_operation(operation, |dispatch, ctx| {
                    dispatch.on_handler_done(ctx, &handler, outcome);
                });
                if routed.is_none() {
                    debug!(target: DISPATCH_TARGET, %operation, "late handler reply");
                }
            }
            CallPurpose::Recover { channel } => {
                Self::on_recovery_done(&channel, target.as_ref(), &outcome);
            }
            CallPurpose::Delegate {
                reply,
                channel,
                handler,
            } => self.on_delegate_done(reply, channel, handler, outcome),
            CallPurpose::Present {
                reply,
                channel,
                handler,
            } => self.on_present_done(reply, &channel, handler, outcome),
        }
    }

    pub(super) fn process_registry_events(&mut self) {
        for event in self.registry.drain_events() {
            match event {
                RegistryEvent::Ready => {
                    self.registry_ready = true;
                    self.reporter.registry_ready(self.registry.len());
                    self.flush_queue();
                }
                RegistryEvent::ClientReady(client) => {
                    if self.registry_ready {
                        self.recover_observer(&client);
                    }
                }
                RegistryEvent::ClientExited(client) => {
                    debug!(target: DISPATCH_TARGET, %client, "client exited");
                }
                RegistryEvent::ClientRemoved(client) => {
                    debug!(target: DISPATCH_TARGET, %client, "client removed");
                }
                RegistryEvent::CapabilitiesChanged => self.capabilities_changed = true,
            }
        }
    }
}
