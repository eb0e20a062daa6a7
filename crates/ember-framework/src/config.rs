//! Application configuration.

use serde::{Deserialize, Serialize};

use ember_core::Normalizer;

/// Settings that change how an [`Application`](crate::Application) dispatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Enables debug behavior: propagation, context preservation, the
    /// late-registration guard and the form-data redirect diagnostic.
    #[serde(default)]
    pub debug: bool,

    /// Enables testing behavior. Unhandled errors propagate to the caller.
    #[serde(default)]
    pub testing: bool,

    /// Escalate unhandled errors instead of rendering a generic 500.
    /// Defaults to `testing || debug` when unset.
    #[serde(default)]
    pub propagate_exceptions: Option<bool>,

    /// Keep the request context on the stack after an unhandled error.
    /// Defaults to `debug` when unset.
    #[serde(default)]
    pub preserve_context_on_exception: Option<bool>,

    /// Trap every HTTP error instead of running its error handler.
    #[serde(default)]
    pub trap_http_exceptions: bool,

    /// Trap `BadRequest` errors. When unset, only a missing request key is
    /// trapped, and only in debug mode.
    #[serde(default)]
    pub trap_bad_request_errors: Option<bool>,

    #[serde(default)]
    pub server_name: Option<String>,

    #[serde(default = "default_application_root")]
    pub application_root: String,

    #[serde(default = "default_url_scheme")]
    pub preferred_url_scheme: String,

    #[serde(default)]
    pub secret_key: Option<String>,

    #[serde(default = "default_session_cookie_name")]
    pub session_cookie_name: String,

    /// Content type for text and byte responses.
    #[serde(default = "default_mimetype")]
    pub default_mimetype: String,

    /// Content type for JSON responses.
    #[serde(default = "default_json_mimetype")]
    pub json_mimetype: String,

    #[serde(default)]
    pub json_pretty_print: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            testing: false,
            propagate_exceptions: None,
            preserve_context_on_exception: None,
            trap_http_exceptions: false,
            trap_bad_request_errors: None,
            server_name: None,
            application_root: default_application_root(),
            preferred_url_scheme: default_url_scheme(),
            secret_key: None,
            session_cookie_name: default_session_cookie_name(),
            default_mimetype: default_mimetype(),
            json_mimetype: default_json_mimetype(),
            json_pretty_print: false,
        }
    }
}

impl AppConfig {
    /// Whether unhandled errors escalate to the caller.
    pub fn propagate_exceptions(&self) -> bool {
        self.propagate_exceptions
            .unwrap_or(self.testing || self.debug)
    }

    /// Whether an erroring request keeps its context after dispatch.
    pub fn preserve_context_on_exception(&self) -> bool {
        self.preserve_context_on_exception.unwrap_or(self.debug)
    }

    /// Builds the response normalizer for these settings.
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new()
            .default_mimetype(self.default_mimetype.clone())
            .json_mimetype(self.json_mimetype.clone())
            .pretty_json(self.json_pretty_print)
    }
}

fn default_application_root() -> String {
    "/".to_string()
}

fn default_url_scheme() -> String {
    "http".to_string()
}

fn default_session_cookie_name() -> String {
    "session".to_string()
}

fn default_mimetype() -> String {
    ember_core::normalize::DEFAULT_MIMETYPE.to_string()
}

fn default_json_mimetype() -> String {
    ember_core::normalize::JSON_MIMETYPE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_flags() {
        let mut config = AppConfig::default();
        assert!(!config.propagate_exceptions());
        assert!(!config.preserve_context_on_exception());

        config.debug = true;
        assert!(config.propagate_exceptions());
        assert!(config.preserve_context_on_exception());

        config.propagate_exceptions = Some(false);
        assert!(!config.propagate_exceptions());
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"testing": true}"#).unwrap();
        assert!(config.testing);
        assert!(config.propagate_exceptions());
        assert_eq!(config.application_root, "/");
        assert_eq!(config.json_mimetype, "application/json");
    }
}
