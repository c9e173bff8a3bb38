//! Shared configuration for the switchboard dispatcher.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults, then
//! configuration files, then `SWITCHBOARD_*` environment variables, then
//! command-line flags. The resolved [`Config`] carries the logging settings
//! used by telemetry, the well-known name prefix that marks a bus name as a
//! dispatchable client, the approver scheduling mode, and the per-handler
//! overrides consulted by the built-in directive policy.

mod defaults;
mod handler_policy;
mod modes;

use std::ffi::OsString;
use std::str::FromStr;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CLIENT_PREFIX, DEFAULT_LOG_FILTER, default_approver_scheduling, default_client_prefix,
    default_log_filter, default_log_filter_string, default_log_format,
};
pub use handler_policy::{
    HandlerDirective, HandlerDirectiveParseError, HandlerOverride, HandlerPolicyMatrix,
};
pub use modes::{ApproverScheduling, LogFormat, ModeParseError};

/// Resolved dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "SWITCHBOARD")]
pub struct Config {
    /// `tracing` filter expression, for example `info,switchboard=debug`.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output encoding for log events.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Well-known name prefix identifying dispatchable clients.
    #[ortho_config(default = default_client_prefix())]
    pub client_prefix: String,
    /// When approvers start relative to observers.
    #[ortho_config(default = default_approver_scheduling())]
    pub approver_scheduling: ApproverScheduling,
    /// Handler overrides written as `client=allow|deny`.
    #[serde(default)]
    #[ortho_config(merge_strategy = "append")]
    pub handler_directives: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            client_prefix: default_client_prefix(),
            approver_scheduling: default_approver_scheduling(),
            handler_directives: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments, environment and files.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when any layer is malformed.
    pub fn load_layers() -> Result<Self, Arc<OrthoError>> {
        <Self as OrthoConfig>::load()
    }

    /// Loads configuration treating `args` as the command line.
    ///
    /// The first argument is the program name, as with `std::env::args_os`.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when any layer is malformed.
    pub fn load_layers_from(args: Vec<OsString>) -> Result<Self, Arc<OrthoError>> {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Well-known client name prefix.
    #[must_use]
    pub fn client_prefix(&self) -> &str {
        self.client_prefix.as_str()
    }

    /// Approver scheduling mode.
    #[must_use]
    pub const fn approver_scheduling(&self) -> ApproverScheduling {
        self.approver_scheduling
    }

    /// Parses the configured handler directives into a policy matrix.
    ///
    /// # Errors
    ///
    /// Returns the first directive that fails to parse.
    pub fn handler_policy(&self) -> Result<HandlerPolicyMatrix, HandlerDirectiveParseError> {
        let directives = self
            .handler_directives
            .iter()
            .map(|raw| HandlerDirective::from_str(raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(HandlerPolicyMatrix::from_directives(
            self.client_prefix.as_str(),
            &directives,
        ))
    }
}
