//! Enumerated switches exposed through configuration.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Output encoding used by the tracing subscriber.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Single-line human readable events.
    Compact,
}

/// When approvers are consulted relative to observers.
///
/// Approvers never start before observers that asked for approval to be
/// delayed have answered. `Early` lets them start as soon as that holds;
/// `AfterObservers` additionally waits for every observer call.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ApproverScheduling {
    /// Start approvers once no delay-requesting observer is pending.
    #[default]
    Early,
    /// Start approvers once every observer has answered.
    AfterObservers,
}

/// Errors encountered while parsing a mode from text.
pub type ModeParseError = strum::ParseError;
