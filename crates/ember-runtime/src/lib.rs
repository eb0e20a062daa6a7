//! Ember Runtime - configuration and logging for Ember applications.
//!
//! This crate provides:
//! - Layered configuration loading (`ConfigLoader`, `EmberConfig`)
//! - Configuration validation
//! - Logging setup on `tracing-subscriber` (`LoggingBuilder`, `SpanEvents`)
//! - `Runtime`, which applies both and creates configured applications
//!
//! ```ignore
//! use ember_runtime::Runtime;
//!
//! let runtime = Runtime::builder().profile("production").build()?;
//! let mut app = runtime.application("shop");
//! app.route("/", || "welcome")?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, EmberConfig, LoggingConfig, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{Runtime, RuntimeBuilder};

// Re-export tracing for use by applications
pub use tracing;
pub use tracing_subscriber;

/// Prelude module with the common logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
