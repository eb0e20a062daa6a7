//! Error types for application assembly.

use thiserror::Error;

/// Errors raised while registering routes, hooks and blueprints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    /// A setup method was called after the application started serving.
    #[error(
        "a setup function was called after the first request was handled; \
         make sure all routes, hooks and blueprints are registered before serving ({0})"
    )]
    LateRegistration(&'static str),

    /// An endpoint is already bound to a different handler.
    #[error("view function mapping is overwriting an existing endpoint function: {0}")]
    EndpointOverwrite(String),

    /// An error handler was registered for a status code with no known class.
    #[error("'{0}' is not a recognized HTTP error code; use an error class instead")]
    UnknownStatusCode(u16),

    /// Two different blueprints were registered under one name.
    #[error("a name collision occurred between blueprints named '{0}'")]
    BlueprintNameCollision(String),

    /// A route rule could not be parsed.
    #[error("invalid route rule '{rule}': {reason}")]
    InvalidRule {
        /// The offending rule.
        rule: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A blueprint name contained a dot.
    #[error("blueprint name '{0}' must not contain a dot")]
    DottedBlueprintName(String),

    /// A blueprint endpoint contained a dot.
    #[error("blueprint endpoint '{0}' must not contain a dot")]
    DottedEndpoint(String),
}

/// Result type for setup operations.
pub type SetupResult<T> = Result<T, SetupError>;
