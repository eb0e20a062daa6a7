//! Wires configuration and logging into applications.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ember_runtime::Runtime;
//!
//! let runtime = Runtime::builder()
//!     .config_file("config/ember.toml")
//!     .profile("production")
//!     .build()?;
//!
//! let mut app = runtime.application("shop");
//! app.route("/", || "welcome")?;
//! let app = Arc::new(app);
//! ```

use std::path::Path;

use tracing::{info, warn};

use ember_framework::{AppService, Application};

use crate::config::{ConfigLoader, EmberConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;

/// Loaded configuration plus initialized logging.
#[derive(Debug, Clone)]
pub struct Runtime {
    config: EmberConfig,
}

impl Runtime {
    /// Creates a runtime from the default configuration locations.
    ///
    /// Falls back to built-in defaults when loading or validation fails.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .and_then(|config| validate_config(&config).map(|()| config))
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                EmberConfig::default()
            });

        Self::init(config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Validates `config`, then initializes logging from it.
    pub fn from_config(config: &EmberConfig) -> RuntimeResult<Self> {
        validate_config(config)?;
        Ok(Self::init(config.clone()))
    }

    fn init(config: EmberConfig) -> Self {
        logging::init_from_config(&config.logging);

        if config.app.debug && config.app.secret_key.is_none() {
            warn!("Debug mode is enabled without a secret key");
        }
        info!(
            debug = config.app.debug,
            testing = config.app.testing,
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            "Runtime initialized from configuration"
        );

        Self { config }
    }

    pub fn config(&self) -> &EmberConfig {
        &self.config
    }

    /// Creates an application using the loaded `app` settings.
    pub fn application(&self, name: impl Into<String>) -> Application {
        Application::with_config(name, self.config.app.clone())
    }

    /// Wraps a finished application as a tower service.
    pub fn service(&self, app: Application) -> AppService {
        AppService::new(app.into())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a [`Runtime`] with custom configuration sources.
#[derive(Debug)]
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Enables loading environment variables (enabled by default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: EmberConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads, validates and applies the configuration.
    pub fn build(self) -> RuntimeResult<Runtime> {
        let config = self.config_loader.load()?;
        Runtime::from_config(&config)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ember_framework::Request;
    use figment::Jail;

    use super::*;
    use crate::error::RuntimeError;

    #[test]
    fn test_application_uses_loaded_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "ember.toml",
                r#"
                [app]
                testing = true
                json_pretty_print = true
                "#,
            )?;

            let runtime = Runtime::builder()
                .search_path(jail.directory())
                .without_env()
                .build()
                .map_err(|e| e.to_string())?;

            let mut app = runtime.application("configured");
            assert!(app.testing());
            app.route("/", || serde_json::json!({"ok": true}))
                .map_err(|e| e.to_string())?;
            let app = Arc::new(app);

            let response = app.handle(Request::get("/")).map_err(|e| e.to_string())?;
            assert_eq!(response.text(), "{\n  \"ok\": true\n}\n");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("EMBER_APP__APPLICATION_ROOT", "relative");

            let result = Runtime::builder().search_path(jail.directory()).build();
            assert!(matches!(result, Err(RuntimeError::Config(_))));
            Ok(())
        });
    }
}
