//! BDD test world: the client directory, the running harness and bootstrap
//! state shared by step functions.

use std::cell::RefCell;
use std::sync::Arc;

use crate::bootstrap::{BootstrapError, ConfigLoader, Service, bootstrap_with};
use crate::channel::Channel;
use crate::dispatcher::DispatcherSettings;
use crate::names::{ChannelPath, OperationId, ReplyId};
use crate::policy::HandlerPolicy;

use super::bus::RecordingBus;
use super::clients::ClientSpec;
use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::harness::Harness;
use super::reporter::RecordingDispatchReporter;

/// Scenario world shared across BDD steps.
pub struct TestWorld {
    directory: Vec<ClientSpec>,
    policies: Vec<Box<dyn HandlerPolicy>>,
    harness: Option<Harness>,
    pub channel: Option<Channel>,
    pub operation: Option<OperationId>,
    pub replies: Vec<ReplyId>,
    loader: Box<dyn ConfigLoader>,
    pub reporter: Arc<RecordingDispatchReporter>,
    service: Option<Service<RecordingBus>>,
    bootstrap_error: Option<BootstrapError>,
}

impl TestWorld {
    /// Builds an empty world with a successful configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            directory: Vec::new(),
            policies: Vec::new(),
            harness: None,
            channel: None,
            operation: None,
            replies: Vec::new(),
            loader: Box::new(TestConfigLoader::new()),
            reporter: Arc::new(RecordingDispatchReporter::default()),
            service: None,
            bootstrap_error: None,
        }
    }

    /// A running client named `suffix` with the next free unique name.
    #[must_use]
    pub fn running_client(&self, suffix: &str) -> ClientSpec {
        let serial = self.directory.len() + 10;
        ClientSpec::running(suffix, &format!(":1.{serial}"))
    }

    /// Adds a client to the directory the dispatcher will discover.
    pub fn add_client(&mut self, spec: ClientSpec) {
        self.directory.push(spec);
    }

    /// Installs a policy consulted by the dispatcher.
    pub fn add_policy(&mut self, policy: Box<dyn HandlerPolicy>) {
        self.policies.push(policy);
    }

    /// The running harness, started on first use.
    pub fn harness(&mut self) -> &mut Harness {
        let directory = &self.directory;
        let policies = &mut self.policies;
        self.harness.get_or_insert_with(|| {
            Harness::with_policies(
                directory.clone(),
                DispatcherSettings::default(),
                std::mem::take(policies),
            )
        })
    }

    /// Offers `channel` and remembers its operation.
    pub fn offer(&mut self, channel: Channel) {
        let operation = self.harness().add(channel.clone());
        self.channel = Some(channel);
        self.operation = Some(operation);
    }

    /// Operation of the last offered channel.
    ///
    /// # Errors
    ///
    /// Returns an error when no channel was offered.
    pub fn operation(&self) -> Result<OperationId, String> {
        self.operation
            .ok_or_else(|| String::from("no channel has been offered"))
    }

    /// Path of the last offered channel.
    ///
    /// # Errors
    ///
    /// Returns an error when no channel was offered.
    pub fn channel_path(&self) -> Result<ChannelPath, String> {
        self.channel
            .as_ref()
            .map(|channel| channel.path().clone())
            .ok_or_else(|| String::from("no channel has been offered"))
    }

    /// Most recent inbound reply id.
    ///
    /// # Errors
    ///
    /// Returns an error when no directive was issued.
    pub fn last_reply(&self) -> Result<ReplyId, String> {
        self.replies
            .last()
            .copied()
            .ok_or_else(|| String::from("no directive has been issued"))
    }

    /// Installs a loader that yields the default configuration.
    pub fn use_successful_loader(&mut self) {
        self.loader = Box::new(TestConfigLoader::new());
        self.reset_bootstrap();
    }

    /// Installs a loader that always fails.
    pub fn use_failing_loader(&mut self) {
        self.loader = Box::new(FailingConfigLoader);
        self.reset_bootstrap();
    }

    /// Installs a loader with one handler directive.
    pub fn use_directive(&mut self, directive: &str) {
        self.loader = Box::new(TestConfigLoader::new().with_directive(directive));
        self.reset_bootstrap();
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.service.is_some() || self.bootstrap_error.is_some() {
            return;
        }
        match bootstrap_with(
            &*self.loader,
            self.reporter.clone(),
            RecordingBus::default(),
            Vec::new(),
        ) {
            Ok(service) => self.service = Some(service),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    /// Returns whether bootstrap produced an error.
    #[must_use]
    pub const fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    /// The bootstrapped service, when bootstrap succeeded.
    #[must_use]
    pub const fn service(&self) -> Option<&Service<RecordingBus>> {
        self.service.as_ref()
    }

    fn reset_bootstrap(&mut self) {
        self.service = None;
        self.bootstrap_error = None;
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Default test world fixture.
#[must_use]
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
