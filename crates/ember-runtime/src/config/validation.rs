//! Configuration validation utilities.

use ember_framework::AppConfig;

use super::error::{ConfigError, ConfigResult};
use super::schema::{EmberConfig, LogLevel, LogOutput, LoggingConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &EmberConfig) -> ConfigResult<()> {
    validate_app_config(&config.app)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

/// Validates application settings.
fn validate_app_config(app: &AppConfig) -> ConfigResult<()> {
    if app.default_mimetype.trim().is_empty() {
        return Err(ConfigError::missing_field("app.default_mimetype"));
    }

    if app.json_mimetype.trim().is_empty() {
        return Err(ConfigError::missing_field("app.json_mimetype"));
    }

    if !app.application_root.starts_with('/') {
        return Err(ConfigError::validation(format!(
            "Application root must start with '/': {}",
            app.application_root
        )));
    }

    if app.session_cookie_name.is_empty() {
        return Err(ConfigError::missing_field("app.session_cookie_name"));
    }

    Ok(())
}

/// Validates logging settings.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    logging.level.parse::<LogLevel>()?;

    for (target, level) in &logging.filters {
        if target.is_empty() {
            return Err(ConfigError::validation("Log filter target must not be empty"));
        }
        level.parse::<LogLevel>()?;
    }

    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    Ok(())
}
