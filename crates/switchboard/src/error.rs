//! Error types surfaced by dispatching.
//!
//! [`DispatchError`] is what approvers, delegators and presenters see when a
//! directive cannot be honoured. [`CallError`] is the failure of one
//! outbound call, as reported by the bus.

use thiserror::Error;

use crate::names::ClientName;

/// Failure of a single outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The peer answered with an error.
    #[error("{name}: {message}")]
    Remote {
        /// Error name reported by the peer.
        name: String,
        /// Human-readable message reported by the peer.
        message: String,
    },
    /// The peer left the bus before answering.
    #[error("peer vanished before replying")]
    PeerVanished,
}

impl CallError {
    /// Creates a remote error.
    pub fn remote(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Errors returned to the originator of a dispatch directive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No handler is able or willing to take the channel.
    #[error("no handler is capable of handling the channel")]
    NotCapable,

    /// Another party already took the channel.
    #[error("the channel has already been dispatched elsewhere")]
    NotYours,

    /// A named client is not registered.
    #[error("client '{client}' does not exist")]
    DoesNotExist {
        /// Client that was named.
        client: ClientName,
    },

    /// The originating request was cancelled.
    #[error("the channel request was cancelled")]
    Cancelled,

    /// The channel closed while it was being dispatched.
    #[error("the channel was lost: {reason}")]
    ChannelLost {
        /// Reason given by the connection.
        reason: String,
    },

    /// A policy refused to let the handler take the channel.
    #[error("policy refused handler '{client}': {reason}")]
    PolicyDenied {
        /// Handler that was refused.
        client: ClientName,
        /// Reason given by the policy.
        reason: String,
    },

    /// The handler refused or failed to take the channel.
    #[error("handler '{client}' failed: {source}")]
    HandlerFailed {
        /// Handler that failed.
        client: ClientName,
        /// Underlying call failure.
        #[source]
        source: CallError,
    },

    /// The caller does not currently handle the channel.
    #[error("the caller does not handle the channel")]
    NotHandledByCaller,

    /// The channel is not known to the dispatcher.
    #[error("unknown channel")]
    UnknownChannel,

    /// The dispatch operation is not known to the dispatcher.
    #[error("unknown dispatch operation")]
    UnknownOperation,

    /// The dispatcher is shutting down.
    #[error("the dispatcher is shutting down")]
    ShuttingDown,
}

impl DispatchError {
    /// Creates a does-not-exist error.
    pub fn does_not_exist(client: impl Into<ClientName>) -> Self {
        Self::DoesNotExist {
            client: client.into(),
        }
    }

    /// Creates a channel-lost error.
    pub fn channel_lost(reason: impl Into<String>) -> Self {
        Self::ChannelLost {
            reason: reason.into(),
        }
    }

    /// Creates a policy denial.
    pub fn policy_denied(client: impl Into<ClientName>, reason: impl Into<String>) -> Self {
        Self::PolicyDenied {
            client: client.into(),
            reason: reason.into(),
        }
    }

    /// Creates a handler failure.
    pub fn handler_failed(client: impl Into<ClientName>, source: CallError) -> Self {
        Self::HandlerFailed {
            client: client.into(),
            source,
        }
    }

    /// Stable error name used by the bus layer when replying.
    #[must_use]
    pub const fn error_name(&self) -> &'static str {
        match self {
            Self::NotCapable => "org.freedesktop.Telepathy.Error.NotCapable",
            Self::NotYours => "org.freedesktop.Telepathy.Error.NotYours",
            Self::DoesNotExist { .. } | Self::UnknownChannel | Self::UnknownOperation => {
                "org.freedesktop.Telepathy.Error.InvalidArgument"
            }
            Self::Cancelled => "org.freedesktop.Telepathy.Error.Cancelled",
            Self::ChannelLost { .. } => "org.freedesktop.Telepathy.Error.Terminated",
            Self::PolicyDenied { .. } => "org.freedesktop.Telepathy.Error.PermissionDenied",
            Self::HandlerFailed { .. } => "org.freedesktop.Telepathy.Error.NotAvailable",
            Self::NotHandledByCaller => "org.freedesktop.Telepathy.Error.NotYours",
            Self::ShuttingDown => "org.freedesktop.Telepathy.Error.Disconnected",
        }
    }
}
