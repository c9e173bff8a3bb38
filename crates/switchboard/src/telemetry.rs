//! Structured telemetry initialisation for the dispatcher.
//!
//! The log filter accepts the dispatcher's component names as shorthand:
//! `registry=debug` is widened to `switchboard::registry=debug`.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use switchboard_config::{Config, LogFormat};
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Log targets emitted by the dispatcher, relative to the crate name.
const COMPONENTS: [&str; 6] = [
    "registry",
    "operation",
    "dispatcher",
    "dispatch",
    "handler_map",
    "policy",
];

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured log filter expression did not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Filter after component names were widened.
        filter: String,
        /// Parser message.
        message: String,
    },
    /// The global subscriber could not be installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber on first use.
///
/// Later calls leave the installed subscriber alone and return a fresh
/// handle, so embedding applications and tests may call this freely.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for a malformed `log_filter` and
/// [`TelemetryError::Subscriber`] when another subscriber is already
/// installed globally.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|()| TelemetryHandle)
}

/// Rewrites bare component directives into fully qualified targets.
fn widen_filter(raw: &str) -> String {
    raw.split(',')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .map(|directive| {
            let (target, level) = directive
                .split_once('=')
                .map_or((directive, None), |(name, rest)| (name, Some(rest)));
            if !COMPONENTS.contains(&target) {
                return directive.to_owned();
            }
            let qualified = format!("{}::{target}", env!("CARGO_PKG_NAME"));
            level.map_or_else(|| qualified.clone(), |lvl| format!("{qualified}={lvl}"))
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn build_filter(raw: &str) -> Result<EnvFilter, TelemetryError> {
    let widened = widen_filter(raw);
    EnvFilter::try_new(&widened).map_err(|error| TelemetryError::Filter {
        filter: widened,
        message: error.to_string(),
    })
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = build_filter(config.log_filter())?;

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(
            fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_span_list(false)
                .finish(),
        ),
        LogFormat::Compact => Box::new(
            fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .without_time()
                .compact()
                .finish(),
        ),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
