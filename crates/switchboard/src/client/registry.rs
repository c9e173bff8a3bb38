//! Census, introspection and lookup of client records.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::{ClientIdentity, ClientRecord, Role, RoleProperties};
use crate::bus::{Bus, CallOutcome, CallReply, NameOwner};
use crate::calls::{CallPurpose, CallTable};
use crate::filter::{ChannelFilter, Quality};
use crate::names::{ClientName, UniqueName};
use crate::properties::PropertyMap;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Registry work awaiting a bus reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RegistryTask {
    ListNames,
    ListActivatableNames,
    Interfaces {
        client: ClientName,
        generation: u64,
    },
    RoleProperties {
        client: ClientName,
        role: Role,
        generation: u64,
    },
}

/// Changes the dispatcher reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// The startup census and every introspection it triggered finished.
    Ready,
    /// A client finished introspection.
    ClientReady(ClientName),
    /// An activatable client stopped running; its record is kept.
    ClientExited(ClientName),
    /// A client left for good and its record was dropped.
    ClientRemoved(ClientName),
    /// The aggregated handler capabilities changed.
    CapabilitiesChanged,
}

/// Filters and tokens one handler advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerCapabilities {
    /// Handler name.
    pub client: ClientName,
    /// Channels it can take.
    pub filters: Vec<ChannelFilter>,
    /// Capability tokens.
    pub capabilities: Vec<String>,
}

struct Candidate<'a> {
    name: &'a ClientName,
    bypass_approval: bool,
    quality: Quality,
}

/// All known client records.
#[derive(Debug)]
pub struct ClientRegistry {
    prefix: String,
    clients: BTreeMap<ClientName, ClientRecord>,
    pending_tasks: usize,
    census_started: bool,
    ready: bool,
    events: Vec<RegistryEvent>,
}

impl ClientRegistry {
    /// Creates an empty registry recognising names that start with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            clients: BTreeMap::new(),
            pending_tasks: 0,
            census_started: false,
            ready: false,
            events: Vec::new(),
        }
    }

    /// Returns `true` once the startup census has completed.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Returns the client name for `raw` when it carries the client prefix.
    #[must_use]
    pub fn client_name(&self, raw: &str) -> Option<ClientName> {
        raw.strip_prefix(self.prefix.as_str())
            .filter(|suffix| !suffix.is_empty())
            .map(|_| ClientName::new(raw))
    }

    /// Looks up a client.
    #[must_use]
    pub fn lookup(&self, name: &ClientName) -> Option<&ClientRecord> {
        self.clients.get(name)
    }

    /// Finds the client currently running as `unique`.
    #[must_use]
    pub fn find_by_unique(&self, unique: &UniqueName) -> Option<&ClientRecord> {
        self.clients
            .values()
            .find(|record| record.unique_name() == Some(unique))
    }

    /// Number of known clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` when no client is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Iterates over records in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ClientRecord> + '_ {
        self.clients.values()
    }

    /// Ranks the handlers able to take a channel with `properties`.
    ///
    /// Handlers that bypass approval always outrank those that do not;
    /// within each group higher filter quality wins and names break ties.
    /// When nothing matches but `preferred` is still a known client, it is
    /// returned alone whatever roles it declared.
    #[must_use]
    pub fn list_possible_handlers(
        &self,
        preferred: Option<&ClientName>,
        properties: &PropertyMap,
        must_have_unique_name: bool,
        assume_requested: bool,
    ) -> Vec<ClientName> {
        let mut candidates: Vec<Candidate<'_>> = self
            .clients
            .values()
            .filter(|record| record.is_ready())
            .filter(|record| !must_have_unique_name || record.unique_name().is_some())
            .filter_map(|record| {
                let quality = record.handler_quality(properties, assume_requested);
                (quality > 0).then(|| Candidate {
                    name: record.name(),
                    bypass_approval: record.bypasses_approval(),
                    quality,
                })
            })
            .collect();

        candidates.sort_by(|left, right| {
            right
                .bypass_approval
                .cmp(&left.bypass_approval)
                .then_with(|| right.quality.cmp(&left.quality))
                .then_with(|| left.name.cmp(right.name))
        });

        let ranked: Vec<ClientName> = candidates
            .into_iter()
            .map(|candidate| candidate.name.clone())
            .collect();
        if !ranked.is_empty() {
            return ranked;
        }

        preferred
            .filter(|name| self.lookup(name).is_some())
            .map(|name| vec![name.clone()])
            .unwrap_or_default()
    }

    /// Ready observers whose filters match, with their delay-approvers flag.
    #[must_use]
    pub fn observers_for(&self, properties: &PropertyMap) -> Vec<(ClientName, bool)> {
        self.clients
            .values()
            .filter(|record| record.observes(properties))
            .map(|record| {
                let delay = record
                    .roles()
                    .observer()
                    .is_some_and(|observer| observer.delay_approvers);
                (record.name().clone(), delay)
            })
            .collect()
    }

    /// Ready approvers whose filters match.
    #[must_use]
    pub fn approvers_for(&self, properties: &PropertyMap) -> Vec<ClientName> {
        self.clients
            .values()
            .filter(|record| record.approves(properties))
            .map(|record| record.name().clone())
            .collect()
    }

    /// Aggregated handler filters and capability tokens.
    #[must_use]
    pub fn handler_capabilities(&self) -> Vec<HandlerCapabilities> {
        self.clients
            .values()
            .filter(|record| record.is_ready())
            .filter_map(|record| {
                record.roles().handler().map(|handler| HandlerCapabilities {
                    client: record.name().clone(),
                    filters: handler.filters.clone(),
                    capabilities: handler.capabilities.clone(),
                })
            })
            .collect()
    }

    /// Takes the events raised since the last call.
    pub fn drain_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Starts the census; later calls do nothing.
    pub(crate) fn discover(&mut self, bus: &mut dyn Bus, calls: &mut CallTable) {
        if self.census_started {
            return;
        }
        self.census_started = true;

        self.pending_tasks += 1;
        let call = calls.issue(None, CallPurpose::Registry(RegistryTask::ListNames));
        bus.list_names(call);

        self.pending_tasks += 1;
        let call = calls.issue(
            None,
            CallPurpose::Registry(RegistryTask::ListActivatableNames),
        );
        bus.list_activatable_names(call);
    }

    /// Applies an owner change for a client name.
    pub(crate) fn on_owner_changed(
        &mut self,
        name: &ClientName,
        new_owner: Option<&UniqueName>,
        bus: &mut dyn Bus,
        calls: &mut CallTable,
    ) {
        match new_owner {
            Some(owner) => self.client_started(name, owner, bus, calls),
            None => self.client_stopped(name),
        }
    }

    /// Consumes the completion of a registry call.
    pub(crate) fn on_task_completed(
        &mut self,
        task: RegistryTask,
        outcome: CallOutcome,
        bus: &mut dyn Bus,
        calls: &mut CallTable,
    ) {
        match task {
            RegistryTask::ListNames => match outcome {
                Ok(CallReply::Names(names)) => self.sighted_running(names, bus, calls),
                other => warn!(
                    target: REGISTRY_TARGET,
                    outcome = ?other,
                    "listing bus names failed"
                ),
            },
            RegistryTask::ListActivatableNames => match outcome {
                Ok(CallReply::Names(names)) => self.sighted_activatable(&names, bus, calls),
                other => warn!(
                    target: REGISTRY_TARGET,
                    outcome = ?other,
                    "listing activatable names failed"
                ),
            },
            RegistryTask::Interfaces { client, generation } => {
                self.interfaces_fetched(&client, generation, outcome, bus, calls);
            }
            RegistryTask::RoleProperties {
                client,
                role,
                generation,
            } => self.role_fetched(&client, role, generation, outcome),
        }
        self.finish_task();
    }

    fn sighted_running(
        &mut self,
        names: Vec<NameOwner>,
        bus: &mut dyn Bus,
        calls: &mut CallTable,
    ) {
        for NameOwner { name, owner } in names {
            let Some(client) = self.client_name(&name) else {
                continue;
            };
            let record = self.record_mut(&client);
            if let Some(unique) = owner {
                if record.unique_name().is_none() {
                    record.set_identity(ClientIdentity::Running(unique));
                }
            }
            self.introspect(&client, bus, calls);
        }
    }

    fn sighted_activatable(
        &mut self,
        names: &[NameOwner],
        bus: &mut dyn Bus,
        calls: &mut CallTable,
    ) {
        for entry in names {
            let Some(client) = self.client_name(&entry.name) else {
                continue;
            };
            self.record_mut(&client).set_activatable();
            self.introspect(&client, bus, calls);
        }
    }

    fn client_started(
        &mut self,
        name: &ClientName,
        owner: &UniqueName,
        bus: &mut dyn Bus,
        calls: &mut CallTable,
    ) {
        let record = self.record_mut(name);
        if record.unique_name() == Some(owner) {
            return;
        }
        let identity = ClientIdentity::Running(owner.clone());
        if record.needs_introspection() && record.roles().is_empty() {
            record.set_identity(identity);
        } else {
            let had_handler = record.roles().handler().is_some();
            let generation = record.restart(identity);
            debug!(
                target: REGISTRY_TARGET,
                client = %name,
                generation,
                "client restarted; introspecting again"
            );
            if had_handler {
                self.events.push(RegistryEvent::CapabilitiesChanged);
            }
        }
        self.introspect(name, bus, calls);
    }

    fn client_stopped(&mut self, name: &ClientName) {
        let Some(record) = self.clients.get_mut(name) else {
            return;
        };
        if record.is_activatable() {
            record.set_identity(ClientIdentity::NotRunning);
            debug!(target: REGISTRY_TARGET, client = %name, "activatable client exited");
            self.events.push(RegistryEvent::ClientExited(name.clone()));
            return;
        }

        if record.roles().handler().is_some() {
            self.events.push(RegistryEvent::CapabilitiesChanged);
        }
        self.clients.remove(name);
        debug!(target: REGISTRY_TARGET, client = %name, "client removed");
        self.events.push(RegistryEvent::ClientRemoved(name.clone()));
    }

    fn record_mut(&mut self, name: &ClientName) -> &mut ClientRecord {
        self.clients
            .entry(name.clone())
            .or_insert_with(|| ClientRecord::new(name.clone()))
    }

    fn current_mut(&mut self, name: &ClientName, generation: u64) -> Option<&mut ClientRecord> {
        self.clients
            .get_mut(name)
            .filter(|record| record.generation() == generation)
    }

    fn introspect(&mut self, name: &ClientName, bus: &mut dyn Bus, calls: &mut CallTable) {
        let Some(record) = self.clients.get_mut(name) else {
            return;
        };
        if !record.needs_introspection() {
            return;
        }
        record.begin_fetch();
        let generation = record.generation();
        self.pending_tasks += 1;
        let call = calls.issue(
            Some(name),
            CallPurpose::Registry(RegistryTask::Interfaces {
                client: name.clone(),
                generation,
            }),
        );
        bus.fetch_client_interfaces(call, name);
    }

    fn interfaces_fetched(
        &mut self,
        name: &ClientName,
        generation: u64,
        outcome: CallOutcome,
        bus: &mut dyn Bus,
        calls: &mut CallTable,
    ) {
        let Some(record) = self.current_mut(name, generation) else {
            debug!(target: REGISTRY_TARGET, client = %name, "ignoring stale interface list");
            return;
        };

        let mut roles = match outcome {
            Ok(CallReply::Interfaces(roles)) => roles,
            other => {
                warn!(
                    target: REGISTRY_TARGET,
                    client = %name,
                    outcome = ?other,
                    "fetching client interfaces failed"
                );
                Vec::new()
            }
        };
        roles.sort_unstable();
        roles.dedup();
        for _ in &roles {
            record.begin_fetch();
        }

        for role in roles {
            self.pending_tasks += 1;
            let call = calls.issue(
                Some(name),
                CallPurpose::Registry(RegistryTask::RoleProperties {
                    client: name.clone(),
                    role,
                    generation,
                }),
            );
            bus.fetch_role_properties(call, name, role);
        }

        self.fetch_finished(name, generation, None);
    }

    fn role_fetched(
        &mut self,
        name: &ClientName,
        role: Role,
        generation: u64,
        outcome: CallOutcome,
    ) {
        let properties = match outcome {
            Ok(CallReply::Role(properties)) if properties.role() == role => Some(properties),
            other => {
                warn!(
                    target: REGISTRY_TARGET,
                    client = %name,
                    %role,
                    outcome = ?other,
                    "fetching role properties failed; dropping role"
                );
                None
            }
        };
        self.fetch_finished(name, generation, properties);
    }

    fn fetch_finished(
        &mut self,
        name: &ClientName,
        generation: u64,
        properties: Option<RoleProperties>,
    ) {
        let Some(record) = self.current_mut(name, generation) else {
            debug!(target: REGISTRY_TARGET, client = %name, "ignoring stale role properties");
            return;
        };
        if !record.finish_fetch(properties) {
            return;
        }
        let is_handler = record.roles().handler().is_some();
        debug!(target: REGISTRY_TARGET, client = %name, "client ready");
        self.events.push(RegistryEvent::ClientReady(name.clone()));
        if is_handler {
            self.events.push(RegistryEvent::CapabilitiesChanged);
        }
    }

    fn finish_task(&mut self) {
        self.pending_tasks = self.pending_tasks.saturating_sub(1);
        if self.pending_tasks == 0 && self.census_started && !self.ready {
            self.ready = true;
            debug!(
                target: REGISTRY_TARGET,
                clients = self.clients.len(),
                "client registry ready"
            );
            self.events.push(RegistryEvent::Ready);
        }
    }
}
