//! Per-client overrides consulted before a handler is invoked.
//!
//! Directives are written as `client=directive`, for example
//! `org.freedesktop.Telepathy.Client.Logger=deny`. The client may be given
//! with or without the configured well-known prefix.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Directive applied to a handler during selection.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum HandlerOverride {
    /// Let the handler be tried normally.
    #[default]
    Allow,
    /// Never hand channels to the handler.
    Deny,
}

/// Errors produced when parsing [`HandlerDirective`] values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerDirectiveParseError {
    /// The `=` separating client and directive was missing.
    #[error("directive '{0}' is missing the override assignment '='")]
    MissingDirective(String),
    /// The client part was empty.
    #[error("directive '{0}' does not name a client")]
    MissingClient(String),
    /// The override keyword was not recognised.
    #[error("unsupported handler directive '{0}'")]
    InvalidDirective(String),
}

/// Declarative override for one handler.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HandlerDirective {
    /// Client name, with or without the well-known prefix.
    pub client: String,
    /// Override applied to the client.
    pub directive: HandlerOverride,
}

impl HandlerDirective {
    /// Creates a new directive.
    #[must_use]
    pub fn new(client: impl Into<String>, directive: HandlerOverride) -> Self {
        Self {
            client: client.into(),
            directive,
        }
    }
}

impl fmt::Display for HandlerDirective {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}={}", self.client, self.directive)
    }
}

impl FromStr for HandlerDirective {
    type Err = HandlerDirectiveParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (client, directive) = input
            .split_once('=')
            .ok_or_else(|| HandlerDirectiveParseError::MissingDirective(input.to_owned()))?;
        if client.trim().is_empty() {
            return Err(HandlerDirectiveParseError::MissingClient(input.to_owned()));
        }
        let parsed = HandlerOverride::from_str(directive.trim())
            .map_err(|_| HandlerDirectiveParseError::InvalidDirective(directive.to_owned()))?;
        Ok(Self::new(client.trim(), parsed))
    }
}

/// Overrides keyed by client name with the well-known prefix stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerPolicyMatrix {
    prefix: String,
    overrides: BTreeMap<String, HandlerOverride>,
}

impl HandlerPolicyMatrix {
    /// Creates an empty matrix that strips `prefix` from client names.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            overrides: BTreeMap::new(),
        }
    }

    /// Builds a matrix from directives; later directives win.
    #[must_use]
    pub fn from_directives<'a, I>(prefix: impl Into<String>, directives: I) -> Self
    where
        I: IntoIterator<Item = &'a HandlerDirective>,
    {
        let mut matrix = Self::new(prefix);
        for directive in directives {
            matrix.set_override(&directive.client, directive.directive);
        }
        matrix
    }

    /// Stores or replaces the override for a client.
    pub fn set_override(&mut self, client: &str, directive: HandlerOverride) {
        let key = self.normalise(client);
        self.overrides.insert(key, directive);
    }

    /// Retrieves the override for a client, when present.
    #[must_use]
    pub fn override_for(&self, client: &str) -> Option<HandlerOverride> {
        self.overrides.get(&self.normalise(client)).copied()
    }

    /// Returns `true` when no overrides are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    fn normalise(&self, client: &str) -> String {
        let trimmed = client.trim();
        trimmed
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(trimmed)
            .to_owned()
    }
}
