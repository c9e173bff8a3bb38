//! Built-in configuration defaults.

use crate::modes::{ApproverScheduling, LogFormat};

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Well-known bus name prefix shared by every dispatchable client.
pub const DEFAULT_CLIENT_PREFIX: &str = "org.freedesktop.Telepathy.Client.";

/// Default log filter expression.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Owned client prefix used where allocation is required.
#[must_use]
pub fn default_client_prefix() -> String {
    DEFAULT_CLIENT_PREFIX.to_owned()
}

/// Default approver scheduling mode.
#[must_use]
pub const fn default_approver_scheduling() -> ApproverScheduling {
    ApproverScheduling::Early
}
