//! Client records and the client registry.
//!
//! Every process whose well-known name carries the client prefix gets a
//! [`ClientRecord`]. A record learns which roles the client plays by
//! fetching its interface list and then one property set per role; it is
//! ready once every fetch has completed. The [`ClientRegistry`] owns the
//! records and raises a one-way `ready` barrier once the startup census and
//! every introspection it triggered have finished.

mod registry;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::filter::{ChannelFilter, Quality, match_filters};
use crate::names::{ClientName, UniqueName};
use crate::properties::PropertyMap;

pub(crate) use registry::RegistryTask;
pub use registry::{ClientRegistry, HandlerCapabilities, RegistryEvent};

/// Role a client may play.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Passively notified of matching channels.
    Observer,
    /// Consulted before handler selection.
    Approver,
    /// Takes ownership of channels.
    Handler,
}

/// Observer role payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverRole {
    /// Channels the observer wants to see.
    pub filters: Vec<ChannelFilter>,
    /// Observe already-handled channels when (re)appearing.
    #[serde(default)]
    pub recover: bool,
    /// Approvers must wait for this observer to answer.
    #[serde(default)]
    pub delay_approvers: bool,
}

/// Approver role payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverRole {
    /// Channels the approver wants to approve.
    pub filters: Vec<ChannelFilter>,
}

/// Handler role payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerRole {
    /// Channels the handler can take.
    pub filters: Vec<ChannelFilter>,
    /// Matching channels skip approval.
    #[serde(default)]
    pub bypass_approval: bool,
    /// Matching channels skip observers.
    #[serde(default)]
    pub bypass_observers: bool,
    /// Capability tokens advertised to connections.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Properties fetched for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleProperties {
    /// Observer properties.
    Observer(ObserverRole),
    /// Approver properties.
    Approver(ApproverRole),
    /// Handler properties.
    Handler(HandlerRole),
}

impl RoleProperties {
    /// Role these properties belong to.
    #[must_use]
    pub const fn role(&self) -> Role {
        match self {
            Self::Observer(_) => Role::Observer,
            Self::Approver(_) => Role::Approver,
            Self::Handler(_) => Role::Handler,
        }
    }
}

/// Roles a client has been confirmed to play.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet {
    observer: Option<ObserverRole>,
    approver: Option<ApproverRole>,
    handler: Option<HandlerRole>,
}

impl RoleSet {
    /// Stores the payload for one role, replacing any previous one.
    pub fn insert(&mut self, properties: RoleProperties) {
        match properties {
            RoleProperties::Observer(role) => self.observer = Some(role),
            RoleProperties::Approver(role) => self.approver = Some(role),
            RoleProperties::Handler(role) => self.handler = Some(role),
        }
    }

    /// Observer payload.
    #[must_use]
    pub const fn observer(&self) -> Option<&ObserverRole> {
        self.observer.as_ref()
    }

    /// Approver payload.
    #[must_use]
    pub const fn approver(&self) -> Option<&ApproverRole> {
        self.approver.as_ref()
    }

    /// Handler payload.
    #[must_use]
    pub const fn handler(&self) -> Option<&HandlerRole> {
        self.handler.as_ref()
    }

    /// Returns `true` when the client plays `role`.
    #[must_use]
    pub const fn has(&self, role: Role) -> bool {
        match role {
            Role::Observer => self.observer.is_some(),
            Role::Approver => self.approver.is_some(),
            Role::Handler => self.handler.is_some(),
        }
    }

    /// Returns `true` when no role is confirmed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.observer.is_none() && self.approver.is_none() && self.handler.is_none()
    }
}

/// Runtime identity of a client process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClientIdentity {
    /// Not resolved yet.
    #[default]
    Unknown,
    /// Known not to be running; may still be activatable.
    NotRunning,
    /// Running with this unique name.
    Running(UniqueName),
}

/// One registered client process.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    name: ClientName,
    identity: ClientIdentity,
    activatable: bool,
    roles: RoleSet,
    pending_fetches: usize,
    introspected: bool,
    generation: u64,
}

impl ClientRecord {
    pub(crate) fn new(name: ClientName) -> Self {
        Self {
            name,
            identity: ClientIdentity::Unknown,
            activatable: false,
            roles: RoleSet::default(),
            pending_fetches: 0,
            introspected: false,
            generation: 0,
        }
    }

    /// Well-known name.
    #[must_use]
    pub const fn name(&self) -> &ClientName {
        &self.name
    }

    /// Runtime identity.
    #[must_use]
    pub const fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Unique name, when running.
    #[must_use]
    pub const fn unique_name(&self) -> Option<&UniqueName> {
        match &self.identity {
            ClientIdentity::Running(unique) => Some(unique),
            ClientIdentity::Unknown | ClientIdentity::NotRunning => None,
        }
    }

    /// Whether the bus can start the client on demand.
    #[must_use]
    pub const fn is_activatable(&self) -> bool {
        self.activatable
    }

    /// Confirmed roles.
    #[must_use]
    pub const fn roles(&self) -> &RoleSet {
        &self.roles
    }

    /// Ready once introspection started and every fetch completed.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.introspected && self.pending_fetches == 0
    }

    /// Best handler filter quality for `properties`, or 0.
    #[must_use]
    pub fn handler_quality(&self, properties: &PropertyMap, assume_requested: bool) -> Quality {
        self.roles.handler().map_or(0, |handler| {
            match_filters(properties, &handler.filters, assume_requested)
        })
    }

    /// Returns `true` when a ready observer role matches `properties`.
    #[must_use]
    pub fn observes(&self, properties: &PropertyMap) -> bool {
        self.is_ready()
            && self
                .roles
                .observer()
                .is_some_and(|observer| match_filters(properties, &observer.filters, false) > 0)
    }

    /// Returns `true` when a ready approver role matches `properties`.
    #[must_use]
    pub fn approves(&self, properties: &PropertyMap) -> bool {
        self.is_ready()
            && self
                .roles
                .approver()
                .is_some_and(|approver| match_filters(properties, &approver.filters, false) > 0)
    }

    /// Handler bypass-approval flag.
    #[must_use]
    pub fn bypasses_approval(&self) -> bool {
        self.roles
            .handler()
            .is_some_and(|handler| handler.bypass_approval)
    }

    /// Handler bypass-observers flag.
    #[must_use]
    pub fn bypasses_observers(&self) -> bool {
        self.roles
            .handler()
            .is_some_and(|handler| handler.bypass_observers)
    }

    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_activatable(&mut self) {
        self.activatable = true;
        if matches!(self.identity, ClientIdentity::Unknown) {
            self.identity = ClientIdentity::NotRunning;
        }
    }

    /// Forgets roles and starts a new introspection generation.
    pub(crate) fn restart(&mut self, identity: ClientIdentity) -> u64 {
        self.identity = identity;
        self.roles = RoleSet::default();
        self.pending_fetches = 0;
        self.introspected = false;
        self.generation += 1;
        self.generation
    }

    pub(crate) fn set_identity(&mut self, identity: ClientIdentity) {
        self.identity = identity;
    }

    pub(crate) const fn needs_introspection(&self) -> bool {
        !self.introspected
    }

    pub(crate) fn begin_fetch(&mut self) {
        self.introspected = true;
        self.pending_fetches += 1;
    }

    /// Returns `true` when this completion made the record ready.
    pub(crate) fn finish_fetch(&mut self, properties: Option<RoleProperties>) -> bool {
        if let Some(role) = properties {
            self.roles.insert(role);
        }
        self.pending_fetches = self.pending_fetches.saturating_sub(1);
        self.pending_fetches == 0
    }
}
