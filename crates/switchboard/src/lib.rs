//! Channel dispatch engine.
//!
//! Switchboard decides, for every communication channel that appears on a
//! user's accounts, which registered client processes observe it, which may
//! approve or redirect it, and the single handler that ends up owning it.
//!
//! The engine is event driven and never blocks. A caller-supplied [`Bus`]
//! carries every outbound call; the caller's event loop feeds completions
//! and name-owner changes back into the [`Dispatcher`]. The pieces are:
//!
//! - [`filter`] scores channel properties against declared interests.
//! - [`client`] discovers clients, introspects their roles and ranks
//!   handlers.
//! - [`handler_map`] tracks which process owns each handled channel and
//!   closes orphans when an owner leaves the bus.
//! - [`Dispatcher`] runs one dispatch operation per channel through the
//!   observe, approve and handle phases, and serves delegation,
//!   presentation and approver directives.
//!
//! [`bootstrap_with`] wires configuration from [`switchboard_config`],
//! structured telemetry and the built-in [`DirectivePolicy`] around a
//! dispatcher.

mod bootstrap;
pub mod bus;
mod calls;
pub mod channel;
pub mod client;
mod dispatcher;
pub mod error;
pub mod filter;
pub mod handler_map;
pub mod names;
mod operation;
pub mod policy;
pub mod properties;
mod reporter;
mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Service, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use bus::{
    ApprovalRequest, Bus, CallOutcome, CallReply, CloseReason, DelegationOutcome, HandleRequest,
    NameOwner, ObserveRequest,
};
pub use channel::{Channel, ChannelRequest, ChannelStatus};
pub use client::{ClientRegistry, HandlerCapabilities, RegistryEvent, Role, RoleProperties};
pub use dispatcher::{Dispatcher, DispatcherSettings};
pub use error::{CallError, DispatchError};
pub use names::{
    AccountPath, CallId, ChannelPath, ClientName, DelayId, OperationId, ReplyId, RequestPath,
    UniqueName,
};
pub use operation::{HandlerTarget, Resolution};
pub use policy::{DelayRequests, DirectivePolicy, HandlerPolicy, PolicyDecision};
pub use properties::{PropertyMap, PropertyValue};
pub use reporter::{DispatchReporter, StructuredDispatchReporter};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};

#[cfg(test)]
mod tests;
