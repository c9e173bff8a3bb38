//! Channels as seen by the dispatcher.
//!
//! A channel is owned by its connection; the dispatcher only keeps a
//! snapshot of the immutable facts it needs to route the channel.

use crate::error::DispatchError;
use crate::names::{AccountPath, ChannelPath, ClientName, RequestPath};
use crate::properties::{PropertyMap, PropertyValue, keys};

/// Dispatch status of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChannelStatus {
    /// The channel is waiting for, or undergoing, dispatch.
    #[default]
    Dispatching,
    /// The channel can no longer be dispatched.
    Failed(DispatchError),
}

/// Request a locally requested channel satisfies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Request object path.
    pub path: RequestPath,
    /// User action time carried by the request; zero when unknown.
    pub user_action_time: u64,
    /// Handler the requester asked for, if any.
    pub preferred_handler: Option<ClientName>,
    /// The dispatcher itself will handle the channel.
    pub internal: bool,
}

impl ChannelRequest {
    /// Creates a request with no preferences.
    pub fn new(path: impl Into<RequestPath>) -> Self {
        Self {
            path: path.into(),
            user_action_time: 0,
            preferred_handler: None,
            internal: false,
        }
    }

    /// Sets the preferred handler.
    #[must_use]
    pub fn with_preferred_handler(mut self, handler: impl Into<ClientName>) -> Self {
        self.preferred_handler = Some(handler.into());
        self
    }

    /// Sets the user action time.
    #[must_use]
    pub fn with_user_action_time(mut self, time: u64) -> Self {
        self.user_action_time = time;
        self
    }

    /// Marks the request as handled in-process.
    #[must_use]
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }
}

/// Snapshot of a channel being dispatched or handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    path: ChannelPath,
    account: AccountPath,
    properties: PropertyMap,
    status: ChannelStatus,
    request: Option<ChannelRequest>,
}

impl Channel {
    /// Creates a channel in the dispatching state.
    pub fn new(
        path: impl Into<ChannelPath>,
        account: impl Into<AccountPath>,
        properties: PropertyMap,
    ) -> Self {
        Self {
            path: path.into(),
            account: account.into(),
            properties,
            status: ChannelStatus::Dispatching,
            request: None,
        }
    }

    /// Attaches the request this channel satisfies.
    #[must_use]
    pub fn with_request(mut self, request: ChannelRequest) -> Self {
        self.request = Some(request);
        self
    }

    /// Object path.
    #[must_use]
    pub const fn path(&self) -> &ChannelPath {
        &self.path
    }

    /// Account the channel belongs to.
    #[must_use]
    pub const fn account(&self) -> &AccountPath {
        &self.account
    }

    /// Immutable properties.
    #[must_use]
    pub const fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// Current dispatch status.
    #[must_use]
    pub const fn status(&self) -> &ChannelStatus {
        &self.status
    }

    /// Originating request, for locally requested channels.
    #[must_use]
    pub const fn request(&self) -> Option<&ChannelRequest> {
        self.request.as_ref()
    }

    /// Whether the channel was requested locally.
    ///
    /// The `Requested` property wins; a channel without it counts as
    /// requested when it carries a request.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.properties
            .get(keys::REQUESTED)
            .and_then(PropertyValue::as_bool)
            .unwrap_or(self.request.is_some())
    }

    /// Requests satisfied by this channel.
    #[must_use]
    pub fn satisfied_requests(&self) -> Vec<RequestPath> {
        self.request
            .iter()
            .map(|request| request.path.clone())
            .collect()
    }

    /// User action time of the originating request, or zero.
    #[must_use]
    pub fn user_action_time(&self) -> u64 {
        self.request
            .as_ref()
            .map_or(0, |request| request.user_action_time)
    }

    /// Marks the channel as failed; the first failure wins.
    pub fn fail(&mut self, error: DispatchError) {
        if matches!(self.status, ChannelStatus::Dispatching) {
            self.status = ChannelStatus::Failed(error);
        }
    }

    /// Returns the failure, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&DispatchError> {
        match &self.status {
            ChannelStatus::Failed(error) => Some(error),
            ChannelStatus::Dispatching => None,
        }
    }
}
