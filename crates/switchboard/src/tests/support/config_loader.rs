//! Test configuration loaders for scenarios covering success and failure
//! paths.

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::OrthoError;
use switchboard_config::Config;

use crate::bootstrap::ConfigLoader;

/// Loader returning defaults plus the given handler directives.
#[derive(Debug, Default)]
pub struct TestConfigLoader {
    directives: Vec<String>,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_owned());
        self
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            handler_directives: self.directives.clone(),
            ..Config::default()
        })
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("switchboard"),
            OsString::from("--log-format"),
            OsString::from("yaml"),
        ];
        Config::load_layers_from(args)
    }
}
