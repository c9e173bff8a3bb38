//! Fake client directory entries and channel builders.

use switchboard_config::DEFAULT_CLIENT_PREFIX;

use crate::bus::{CallReply, NameOwner};
use crate::calls::{CallPurpose, CallTable};
use crate::channel::{Channel, ChannelRequest};
use crate::client::{
    ApproverRole, ClientRegistry, HandlerRole, ObserverRole, Role, RoleProperties,
};
use crate::error::CallError;
use crate::filter::ChannelFilter;
use crate::names::{ClientName, UniqueName};
use crate::properties::{PropertyMap, keys};

use super::bus::{BusEvent, RecordingBus};

/// How a fake client answers a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Return success.
    Accept,
    /// Return a remote error.
    Reject,
    /// Leave the call outstanding until the test completes it.
    Hold,
}

impl Response {
    /// Completion for this response, unless held.
    pub fn outcome(self) -> Option<Result<CallReply, CallError>> {
        match self {
            Self::Accept => Some(Ok(CallReply::Unit)),
            Self::Reject => Some(Err(CallError::remote(
                "org.freedesktop.Telepathy.Error.NotAvailable",
                "refused by test client",
            ))),
            Self::Hold => None,
        }
    }
}

/// One entry of the fake client directory.
#[derive(Debug, Clone)]
pub struct ClientSpec {
    pub name: ClientName,
    pub unique: Option<UniqueName>,
    pub activatable: bool,
    pub observer: Option<ObserverRole>,
    pub approver: Option<ApproverRole>,
    pub handler: Option<HandlerRole>,
    pub observe: Response,
    pub approve: Response,
    pub handle: Response,
}

impl ClientSpec {
    /// A running client with no roles yet.
    pub fn running(suffix: &str, unique: &str) -> Self {
        Self {
            name: client(suffix),
            unique: Some(UniqueName::new(unique)),
            activatable: false,
            observer: None,
            approver: None,
            handler: None,
            observe: Response::Accept,
            approve: Response::Accept,
            handle: Response::Accept,
        }
    }

    /// A client the bus can activate but which is not running.
    pub fn activatable(suffix: &str) -> Self {
        Self {
            unique: None,
            activatable: true,
            ..Self::running(suffix, ":0.0")
        }
    }

    pub fn observing(mut self, filter: ChannelFilter) -> Self {
        self.observer = Some(ObserverRole {
            filters: vec![filter],
            ..ObserverRole::default()
        });
        self
    }

    pub fn delaying_approvers(mut self) -> Self {
        if let Some(observer) = self.observer.as_mut() {
            observer.delay_approvers = true;
        }
        self
    }

    pub fn recovering(mut self) -> Self {
        if let Some(observer) = self.observer.as_mut() {
            observer.recover = true;
        }
        self
    }

    pub fn approving(mut self, filter: ChannelFilter) -> Self {
        self.approver = Some(ApproverRole {
            filters: vec![filter],
        });
        self
    }

    pub fn handling(mut self, filter: ChannelFilter) -> Self {
        self.handler = Some(HandlerRole {
            filters: vec![filter],
            ..HandlerRole::default()
        });
        self
    }

    pub fn bypassing_approval(mut self) -> Self {
        if let Some(handler) = self.handler.as_mut() {
            handler.bypass_approval = true;
        }
        self
    }

    pub fn bypassing_observers(mut self) -> Self {
        if let Some(handler) = self.handler.as_mut() {
            handler.bypass_observers = true;
        }
        self
    }

    pub fn with_capability(mut self, token: &str) -> Self {
        if let Some(handler) = self.handler.as_mut() {
            handler.capabilities.push(token.to_owned());
        }
        self
    }

    pub const fn observe_with(mut self, response: Response) -> Self {
        self.observe = response;
        self
    }

    pub const fn approve_with(mut self, response: Response) -> Self {
        self.approve = response;
        self
    }

    pub const fn handle_with(mut self, response: Response) -> Self {
        self.handle = response;
        self
    }

    /// Roles answered to an interface fetch.
    pub fn roles(&self) -> Vec<Role> {
        let mut roles = Vec::new();
        if self.observer.is_some() {
            roles.push(Role::Observer);
        }
        if self.approver.is_some() {
            roles.push(Role::Approver);
        }
        if self.handler.is_some() {
            roles.push(Role::Handler);
        }
        roles
    }

    /// Properties answered to a role fetch.
    pub fn role_properties(&self, role: Role) -> Option<RoleProperties> {
        match role {
            Role::Observer => self.observer.clone().map(RoleProperties::Observer),
            Role::Approver => self.approver.clone().map(RoleProperties::Approver),
            Role::Handler => self.handler.clone().map(RoleProperties::Handler),
        }
    }
}

/// Full client name for `suffix`.
pub fn client(suffix: &str) -> ClientName {
    ClientName::new(format!("{DEFAULT_CLIENT_PREFIX}{suffix}"))
}

/// Filter accepting text channels.
pub fn text_filter() -> ChannelFilter {
    ChannelFilter::new().with(keys::CHANNEL_TYPE, "Text")
}

/// Filter accepting every channel.
pub fn any_filter() -> ChannelFilter {
    ChannelFilter::new()
}

/// An incoming text channel.
pub fn text_channel(id: u32) -> Channel {
    Channel::new(
        format!("/org/example/channel/{id}"),
        "/org/example/account/1",
        PropertyMap::new()
            .with(keys::CHANNEL_TYPE, "Text")
            .with(keys::REQUESTED, false),
    )
}

/// An incoming call channel.
pub fn call_channel(id: u32) -> Channel {
    Channel::new(
        format!("/org/example/channel/{id}"),
        "/org/example/account/1",
        PropertyMap::new()
            .with(keys::CHANNEL_TYPE, "Call")
            .with(keys::REQUESTED, false),
    )
}

/// A locally requested text channel.
pub fn requested_channel(id: u32, request: ChannelRequest) -> Channel {
    Channel::new(
        format!("/org/example/channel/{id}"),
        "/org/example/account/1",
        PropertyMap::new()
            .with(keys::CHANNEL_TYPE, "Text")
            .with(keys::REQUESTED, true),
    )
    .with_request(request)
}

/// Answers a registry call from the directory; `None` for other calls.
pub fn answer_census(
    specs: &[ClientSpec],
    event: &BusEvent,
) -> Option<Result<CallReply, CallError>> {
    let find = |name: &ClientName| specs.iter().find(|spec| &spec.name == name);
    match event {
        BusEvent::ListNames(_) => Some(Ok(CallReply::Names(
            specs
                .iter()
                .filter_map(|spec| {
                    spec.unique
                        .as_ref()
                        .map(|unique| NameOwner::owned(spec.name.as_str(), unique.clone()))
                })
                .collect(),
        ))),
        BusEvent::ListActivatableNames(_) => Some(Ok(CallReply::Names(
            specs
                .iter()
                .filter(|spec| spec.activatable)
                .map(|spec| NameOwner::unowned(spec.name.as_str()))
                .collect(),
        ))),
        BusEvent::FetchInterfaces(_, name) => Some(
            find(name)
                .map(|spec| CallReply::Interfaces(spec.roles()))
                .ok_or(CallError::PeerVanished),
        ),
        BusEvent::FetchRole(_, name, role) => Some(
            find(name)
                .and_then(|spec| spec.role_properties(*role))
                .map(CallReply::Role)
                .ok_or(CallError::PeerVanished),
        ),
        _ => None,
    }
}

/// Builds a ready registry holding `specs`.
pub fn ready_registry(specs: &[ClientSpec]) -> ClientRegistry {
    let mut registry = ClientRegistry::new(DEFAULT_CLIENT_PREFIX);
    let mut bus = RecordingBus::default();
    let mut calls = CallTable::default();
    registry.discover(&mut bus, &mut calls);
    loop {
        let fresh = bus.take_new();
        if fresh.is_empty() {
            break;
        }
        for event in fresh {
            let Some(call) = event.call() else {
                continue;
            };
            let Some(outcome) = answer_census(specs, &event) else {
                continue;
            };
            let Some(pending) = calls.take(call) else {
                continue;
            };
            if let CallPurpose::Registry(task) = pending.purpose {
                registry.on_task_completed(task, outcome, &mut bus, &mut calls);
            }
        }
    }
    assert!(registry.is_ready(), "registry should be ready");
    registry
}
