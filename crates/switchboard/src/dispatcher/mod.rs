//! Top-level coordination of dispatch.
//!
//! The [`Dispatcher`] owns the client registry, the handler map and every
//! live dispatch operation. It is driven entirely by its caller: channels
//! arrive through [`Dispatcher::add_channel`], bus events through
//! [`Dispatcher::on_name_owner_changed`] and call completions through
//! [`Dispatcher::on_call_completed`]. Nothing blocks; every outbound call is
//! issued on the [`Bus`] and finished later by its completion.

mod delegate;
mod events;
mod intake;
mod present;
mod recovery;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use switchboard_config::{ApproverScheduling, Config, DEFAULT_CLIENT_PREFIX};
use tracing::info;

use crate::bus::Bus;
use crate::calls::CallTable;
use crate::channel::Channel;
use crate::client::{ClientRegistry, HandlerCapabilities};
use crate::error::DispatchError;
use crate::handler_map::HandlerMap;
use crate::names::{ChannelPath, ClientName, OperationId, ReplyId};
use crate::operation::{DispatchOperation, OperationContext};
use crate::policy::HandlerPolicy;
use crate::properties::PropertyMap;
use crate::reporter::DispatchReporter;

use self::delegate::Delegation;

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatcher");

/// Settings the dispatcher takes from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Well-known name prefix identifying clients.
    pub client_prefix: String,
    /// When approvers start relative to observers.
    pub approver_scheduling: ApproverScheduling,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            client_prefix: DEFAULT_CLIENT_PREFIX.to_owned(),
            approver_scheduling: ApproverScheduling::default(),
        }
    }
}

impl From<&Config> for DispatcherSettings {
    fn from(config: &Config) -> Self {
        Self {
            client_prefix: config.client_prefix().to_owned(),
            approver_scheduling: config.approver_scheduling(),
        }
    }
}

/// A channel that arrived before the registry was ready.
#[derive(Debug)]
struct QueuedChannel {
    operation: OperationId,
    channel: Channel,
    observe_only: bool,
}

/// Coordinates the registry, the handler map and dispatch operations.
pub struct Dispatcher<B> {
    settings: DispatcherSettings,
    bus: B,
    registry: ClientRegistry,
    handler_map: HandlerMap,
    operations: BTreeMap<OperationId, DispatchOperation>,
    channel_operations: BTreeMap<ChannelPath, OperationId>,
    queued: VecDeque<QueuedChannel>,
    delegations: BTreeMap<ReplyId, Delegation>,
    calls: CallTable,
    policies: Vec<Box<dyn HandlerPolicy>>,
    reporter: Arc<dyn DispatchReporter>,
    next_operation: u64,
    registry_ready: bool,
    capabilities_changed: bool,
    shutting_down: bool,
}

impl<B: Bus> Dispatcher<B> {
    /// Creates a dispatcher acting through `bus`.
    ///
    /// `policies` are consulted in order before every handler invocation.
    #[must_use]
    pub fn new(
        settings: DispatcherSettings,
        bus: B,
        policies: Vec<Box<dyn HandlerPolicy>>,
        reporter: Arc<dyn DispatchReporter>,
    ) -> Self {
        let registry = ClientRegistry::new(settings.client_prefix.as_str());
        Self {
            settings,
            bus,
            registry,
            handler_map: HandlerMap::new(),
            operations: BTreeMap::new(),
            channel_operations: BTreeMap::new(),
            queued: VecDeque::new(),
            delegations: BTreeMap::new(),
            calls: CallTable::default(),
            policies,
            reporter,
            next_operation: 0,
            registry_ready: false,
            capabilities_changed: false,
            shutting_down: false,
        }
    }

    /// Starts the client census. Channels added before it completes are
    /// queued.
    pub fn start(&mut self) {
        self.registry.discover(&mut self.bus, &mut self.calls);
    }

    /// The bus the dispatcher acts through.
    #[must_use]
    pub const fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutable access to the bus.
    pub const fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Known clients.
    #[must_use]
    pub const fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Channels currently owned by a handler.
    #[must_use]
    pub const fn handler_map(&self) -> &HandlerMap {
        &self.handler_map
    }

    /// Returns `true` once the startup census has completed.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.registry_ready
    }

    /// Number of operations that have not yet finished.
    #[must_use]
    pub fn active_operations(&self) -> usize {
        self.operations.len() + self.queued.len()
    }

    /// Operation currently dispatching `channel`.
    #[must_use]
    pub fn operation_for(&self, channel: &ChannelPath) -> Option<OperationId> {
        self.channel_operations.get(channel).copied().or_else(|| {
            self.queued
                .iter()
                .find(|queued| queued.channel.path() == channel)
                .map(|queued| queued.operation)
        })
    }

    /// Number of outbound calls still waiting for a completion.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    /// Ranked handlers for a channel that does not exist yet.
    ///
    /// Used by the request layer to build the candidate list for
    /// `properties` before the channel is created.
    #[must_use]
    pub fn list_handlers_for_request(
        &self,
        properties: &PropertyMap,
        preferred: Option<&ClientName>,
    ) -> Vec<ClientName> {
        self.registry
            .list_possible_handlers(preferred, properties, false, true)
    }

    /// Aggregated filters and capability tokens of every handler.
    #[must_use]
    pub fn handler_capabilities(&self) -> Vec<HandlerCapabilities> {
        self.registry.handler_capabilities()
    }

    /// Returns `true` once per batch of handler capability changes.
    pub const fn take_capabilities_changed(&mut self) -> bool {
        let changed = self.capabilities_changed;
        self.capabilities_changed = false;
        changed
    }

    /// Fails every outstanding directive and releases all operations.
    ///
    /// Later channels are refused and late completions are dropped.
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        info!(
            target: DISPATCH_TARGET,
            operations = self.operations.len(),
            queued = self.queued.len(),
            delegations = self.delegations.len(),
            "dispatcher shutting down"
        );

        for operation in self.operations.values_mut() {
            operation.shut_down(&mut self.bus);
        }
        self.operations.clear();
        self.channel_operations.clear();
        self.queued.clear();

        for delegation in std::mem::take(&mut self.delegations).into_values() {
            let (reply, outcome) = delegation.abandon(&DispatchError::ShuttingDown);
            self.bus.delegate_reply(reply, outcome);
        }

        self.calls.drain();
    }

    fn allocate_operation(&mut self) -> OperationId {
        self.next_operation += 1;
        OperationId::new(self.next_operation)
    }

    /// Runs `action` against a live operation with its collaborators.
    ///
    /// Releases the operation once it has signalled `Finished`. Returns
    /// `None` when the operation no longer exists.
    fn with_operation<R>(
        &mut self,
        operation: OperationId,
        action: impl FnOnce(&mut DispatchOperation, &mut OperationContext<'_>) -> R,
    ) -> Option<R> {
        let Self {
            bus,
            registry,
            handler_map,
            operations,
            channel_operations,
            calls,
            policies,
            reporter,
            ..
        } = self;
        let entry = operations.get_mut(&operation)?;
        let mut ctx = OperationContext {
            registry,
            handler_map,
            bus,
            calls,
            policies: policies.as_slice(),
            reporter: &**reporter,
        };
        let result = action(entry, &mut ctx);
        if entry.is_finished() {
            channel_operations.remove(entry.channel().path());
            operations.remove(&operation);
        }
        Some(result)
    }
}
