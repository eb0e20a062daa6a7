//! # Ember
//!
//! A Flask-style request dispatch and context lifecycle framework for Rust.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐     ┌──────────────────────────────────────────────┐
//! │ Runtime │────▶│ Application                                  │
//! │ config  │     │  push contexts ─▶ before hooks ─▶ handler    │
//! │ logging │     │  ─▶ normalize ─▶ after hooks ─▶ pop/teardown │
//! └─────────┘     └──────────────────────────────────────────────┘
//! ```
//!
//! - **Runtime**: loads layered configuration and sets up logging
//! - **Application**: routes, hooks, error handlers and blueprints
//! - **Contexts**: per-thread application and request context stacks
//! - **Handlers**: plain functions whose arguments are extractors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ember::prelude::*;
//!
//! fn hello(Path(name): Path<String>) -> String {
//!     format!("Hello, {name}!")
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Runtime::builder().build()?;
//!     let mut app = runtime.application("hello");
//!     app.route("/hello/<name>", hello)?;
//!
//!     let app = Arc::new(app);
//!     let response = app.handle(Request::get("/hello/ember"))?;
//!     assert_eq!(response.text(), "Hello, ember!");
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use ember_core as core;
pub use ember_framework as framework;
pub use ember_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use ember::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use ember_runtime::{EmberConfig, Runtime};

    // Application setup
    pub use ember_framework::prelude::*;
    pub use ember_framework::{AppService, Escalation, Scope, SetupError};

    // Context access from inside handlers and hooks
    pub use ember_framework::{
        after_this_request, current_app, current_app_context, current_request,
        current_request_context, has_app_context, has_request_context,
    };
}
