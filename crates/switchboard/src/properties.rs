//! Channel property values and the immutable property bag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Property names the dispatcher itself inspects.
pub mod keys {
    /// Interface name describing the kind of channel (text, call, ...).
    pub const CHANNEL_TYPE: &str = "ChannelType";
    /// Kind of handle the channel targets (contact, room, ...).
    pub const TARGET_HANDLE_TYPE: &str = "TargetHandleType";
    /// Whether the channel was requested locally.
    pub const REQUESTED: &str = "Requested";
}

/// A single property value as carried on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// UTF-8 string.
    String(String),
    /// Object path.
    ObjectPath(String),
    /// Boolean.
    Bool(bool),
    /// Signed integer of any width.
    Signed(i64),
    /// Unsigned integer of any width.
    Unsigned(u64),
    /// List of strings.
    StringList(Vec<String>),
}

impl PropertyValue {
    /// Returns `true` when `other` carries the same value.
    ///
    /// Integers compare numerically, so `Signed(3)` equals `Unsigned(3)`
    /// while `Signed(-1)` never equals an unsigned value. Every other kind
    /// compares exactly and only against its own kind.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Signed(left), Self::Unsigned(right))
            | (Self::Unsigned(right), Self::Signed(left)) => {
                u64::try_from(*left).is_ok_and(|widened| widened == *right)
            }
            (left, right) => left == right,
        }
    }

    /// Returns the boolean payload, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the string payload of string and object-path values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) | Self::ObjectPath(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::Unsigned(u64::from(value))
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Signed(i64::from(value))
    }
}

/// Immutable property bag describing a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap(BTreeMap<String, PropertyValue>);

impl PropertyMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts or replaces a property.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Looks up a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the map holds no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> + '_ {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl FromIterator<(String, PropertyValue)> for PropertyMap {
    fn from_iter<T: IntoIterator<Item = (String, PropertyValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
