//! Strongly typed names and identifiers shared across the dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw string.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_name!(
    /// Well-known bus name of a client, such as
    /// `org.freedesktop.Telepathy.Client.Empathy`.
    ClientName
);

string_name!(
    /// Unique connection name of a running process, such as `:1.42`.
    UniqueName
);

string_name!(
    /// Object path of a channel.
    ChannelPath
);

string_name!(
    /// Object path of the account a channel belongs to.
    AccountPath
);

string_name!(
    /// Object path of the request a channel satisfies.
    RequestPath
);

impl UniqueName {
    /// Returns `true` for names of the `:1.42` form.
    #[must_use]
    pub fn is_unique(raw: &str) -> bool {
        raw.starts_with(':')
    }
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw identifier.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw identifier.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, concat!($label, "#{}"), self.0)
            }
        }
    };
}

numeric_id!(
    /// Identifies one dispatch operation for its whole lifetime.
    OperationId,
    "operation"
);

numeric_id!(
    /// Identifies one outbound call until its completion is delivered.
    CallId,
    "call"
);

numeric_id!(
    /// Identifies an inbound method call awaiting a reply.
    ReplyId,
    "reply"
);

numeric_id!(
    /// Identifies a delay requested by a policy plugin.
    DelayId,
    "delay"
);
