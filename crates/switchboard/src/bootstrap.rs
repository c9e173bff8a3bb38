//! Dispatcher bootstrap orchestration.

use std::sync::Arc;

use ortho_config::OrthoError;
use switchboard_config::{Config, HandlerDirectiveParseError};
use thiserror::Error;

use crate::bus::Bus;
use crate::dispatcher::{Dispatcher, DispatcherSettings};
use crate::policy::{DirectivePolicy, HandlerPolicy};
use crate::reporter::DispatchReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the dispatcher configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader error when any configuration layer is malformed.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that reads the process arguments, environment and files.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load_layers()
    }
}

/// Loader returning a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// A handler directive did not parse.
    #[error("invalid handler directive: {source}")]
    Policy {
        /// Underlying parse error.
        #[source]
        source: HandlerDirectiveParseError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// A configured dispatcher with discovery under way.
pub struct Service<B> {
    config: Config,
    dispatcher: Dispatcher<B>,
    telemetry: TelemetryHandle,
}

impl<B> Service<B> {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// The running dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<B> {
        &self.dispatcher
    }

    /// Mutable access for the event loop driving the dispatcher.
    pub const fn dispatcher_mut(&mut self) -> &mut Dispatcher<B> {
        &mut self.dispatcher
    }

    /// Releases the dispatcher to the caller's event loop.
    #[must_use]
    pub fn into_dispatcher(self) -> Dispatcher<B> {
        self.dispatcher
    }
}

/// Bootstraps the dispatcher using the supplied collaborators.
///
/// Loads configuration, installs telemetry, prepends the built-in
/// [`DirectivePolicy`] to `policies`, builds the [`Dispatcher`] over `bus`
/// and starts client discovery. Every failure is reported before it is
/// returned.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration, handler directives or
/// telemetry cannot be set up.
pub fn bootstrap_with<B: Bus>(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn DispatchReporter>,
    bus: B,
    policies: Vec<Box<dyn HandlerPolicy>>,
) -> Result<Service<B>, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let matrix = match config.handler_policy() {
        Ok(matrix) => matrix,
        Err(source) => {
            let error = BootstrapError::Policy { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let mut chain: Vec<Box<dyn HandlerPolicy>> = Vec::with_capacity(policies.len() + 1);
    if !matrix.is_empty() {
        chain.push(Box::new(DirectivePolicy::new(matrix)));
    }
    chain.extend(policies);

    let mut dispatcher = Dispatcher::new(
        DispatcherSettings::from(&config),
        bus,
        chain,
        Arc::clone(&reporter),
    );
    dispatcher.start();
    reporter.bootstrap_succeeded(&config);

    Ok(Service {
        config,
        dispatcher,
        telemetry,
    })
}
