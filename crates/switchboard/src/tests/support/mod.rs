//! Test harness utilities for the dispatcher suites.

mod bus;
mod clients;
mod config_loader;
mod harness;
mod policies;
mod reporter;
mod world;

pub use bus::{BusEvent, RecordingBus};
pub use clients::{
    ClientSpec, Response, answer_census, any_filter, call_channel, client, ready_registry,
    requested_channel, text_channel, text_filter,
};
pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use harness::Harness;
pub use policies::{DelayingPolicy, DenyingPolicy};
pub use reporter::{DispatchEvent, RecordingDispatchReporter};
pub use world::{TestWorld, world};

/// Strips surrounding double quotes from a step argument.
pub fn strip_quotes(raw: &str) -> &str {
    raw.trim_matches('"')
}
