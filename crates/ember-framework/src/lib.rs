//! # Ember Framework
//!
//! The request dispatch and context lifecycle engine of the Ember web
//! framework.
//!
//! This layer provides:
//! - [`Application`]: routes, handlers, hooks and configuration
//! - Per-thread application and request context stacks
//! - Hook registries for every request phase, global or per [`Blueprint`]
//! - Error handler lookup by status code and error class
//! - [`Application::handle`], which turns one [`Request`] into one [`Response`]
//! - Axum-style handlers with [`FromRequest`] extractors
//! - A tower [`Service`](tower::Service) boundary ([`AppService`])
//!
//! Transports, templates and URL building are not part of this crate.

pub mod app;
pub mod blueprint;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod error_dispatch;
pub mod extractor;
pub mod handler;
pub mod hooks;
pub mod routing;
pub mod service;
pub mod session;
pub mod signals;
pub mod testing;

pub use app::Application;
pub use blueprint::Blueprint;
pub use config::AppConfig;
pub use context::{
    AppContext, AppContextGuard, RequestContext, RequestContextGuard, after_this_request,
    current_app, current_app_context, current_request, current_request_context, has_app_context,
    has_request_context,
};
pub use dispatch::Escalation;
pub use error::{SetupError, SetupResult};
pub use extractor::{FromRequest, Json, Path};
pub use handler::{BoxedHandler, Handler, into_handler};
pub use hooks::{Hook, HookRegistry, IntoHookResult, Scope};
pub use routing::{RouteMatch, RouteOptions, Router, Rule, RuleMap, ViewArgs};
pub use service::AppService;
pub use session::{NullSessionInterface, Session, SessionInterface};
pub use signals::{Signal, Signals};
pub use testing::TestClient;

pub use ember_core::{Error, ErrorClass, Request, Response, ResponseValue};

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        AppConfig, Application, Blueprint, Error, ErrorClass, Json, Path, Request,
        RequestContext, Response, ResponseValue, RouteOptions, TestClient, ViewArgs,
    };
    pub use ember_core::{IntoResponseValue, Method, StatusCode};
    pub use http::HeaderValue;
    pub use std::sync::Arc;
}
