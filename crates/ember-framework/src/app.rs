//! The application object.
//!
//! An [`Application`] is assembled with `&mut self` setup methods and then
//! frozen behind an `Arc` for serving:
//!
//! ```rust,ignore
//! use ember_framework::prelude::*;
//!
//! fn index() -> &'static str {
//!     "Hello, Ember!"
//! }
//!
//! let mut app = Application::new("hello");
//! app.route("/", index)?;
//! app.after_request(|_ctx, mut response: Response| {
//!     response.headers_mut().insert("x-powered-by", HeaderValue::from_static("ember"));
//!     response
//! })?;
//!
//! let app = Arc::new(app);
//! let response = app.handle(Request::get("/"))?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use ember_core::{Error, ErrorClass, IntoResponseValue, Normalizer, Request, Response};

use crate::blueprint::Blueprint;
use crate::config::AppConfig;
use crate::context::{AppContext, RequestContext};
use crate::error::{SetupError, SetupResult};
use crate::handler::{BoxedHandler, Handler, handler_name, into_handler};
use crate::hooks::{
    Hook, HookRegistry, IntoHookResult, Scope, after_request_fn, before_first_request_fn,
    before_request_fn, error_handler_fn, teardown_fn, url_value_preprocessor_fn,
};
use crate::routing::{RouteOptions, Router, RuleMap, ViewArgs};
use crate::session::{NullSessionInterface, SessionInterface};
use crate::signals::Signals;
use crate::testing::TestClient;

/// A web application: routes, handlers, hooks and configuration.
pub struct Application {
    name: String,
    config: AppConfig,
    normalizer: Normalizer,
    hooks: HookRegistry,
    view_functions: HashMap<String, BoxedHandler>,
    router: Box<dyn Router>,
    blueprints: Vec<String>,
    session_interface: Arc<dyn SessionInterface>,
    signals: Signals,
    got_first_request: AtomicBool,
    before_first_request_lock: Mutex<()>,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, AppConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: AppConfig) -> Self {
        Self {
            name: name.into(),
            normalizer: config.normalizer(),
            config,
            hooks: HookRegistry::new(),
            view_functions: HashMap::new(),
            router: Box::new(RuleMap::new()),
            blueprints: Vec::new(),
            session_interface: Arc::new(NullSessionInterface),
            signals: Signals::default(),
            got_first_request: AtomicBool::new(false),
            before_first_request_lock: Mutex::new(()),
        }
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn debug(&self) -> bool {
        self.config.debug
    }

    pub fn testing(&self) -> bool {
        self.config.testing
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn router(&self) -> &dyn Router {
        self.router.as_ref()
    }

    pub fn session_interface(&self) -> &Arc<dyn SessionInterface> {
        &self.session_interface
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Names of registered blueprints, in registration order.
    pub fn blueprints(&self) -> &[String] {
        &self.blueprints
    }

    pub fn view_function(&self, endpoint: &str) -> Option<&BoxedHandler> {
        self.view_functions.get(endpoint)
    }

    /// Whether the first request has completed its before-first hooks.
    pub fn got_first_request(&self) -> bool {
        self.got_first_request.load(Ordering::Acquire)
    }

    // ─── Contexts ─────────────────────────────────────────────────────────────

    /// Creates an application context, for work outside of a request.
    pub fn app_context(self: &Arc<Self>) -> Arc<AppContext> {
        AppContext::new(self.clone())
    }

    /// Creates a request context for `request` without dispatching it.
    pub fn request_context(self: &Arc<Self>, request: Request) -> Arc<RequestContext> {
        RequestContext::new(self.clone(), request)
    }

    pub fn test_client(self: &Arc<Self>) -> TestClient {
        TestClient::new(self.clone())
    }

    // ─── Setup ────────────────────────────────────────────────────────────────

    /// Fails if serving has started. Only enforced in debug mode.
    fn check_setup(&self, method: &'static str) -> SetupResult<()> {
        if self.debug() && self.got_first_request() {
            return Err(SetupError::LateRegistration(method));
        }
        Ok(())
    }

    /// Replaces the configuration.
    pub fn set_config(&mut self, config: AppConfig) -> SetupResult<&mut Self> {
        self.check_setup("set_config")?;
        self.normalizer = config.normalizer();
        self.config = config;
        Ok(self)
    }

    /// Replaces the router. Rules registered so far are discarded.
    pub fn set_router(&mut self, router: impl Router) -> SetupResult<&mut Self> {
        self.check_setup("set_router")?;
        self.router = Box::new(router);
        Ok(self)
    }

    pub fn set_session_interface(
        &mut self,
        interface: impl SessionInterface,
    ) -> SetupResult<&mut Self> {
        self.check_setup("set_session_interface")?;
        self.session_interface = Arc::new(interface);
        Ok(self)
    }

    /// Routes `GET` requests for `rule` to `handler`.
    pub fn route<H, T>(&mut self, rule: &str, handler: H) -> SetupResult<&mut Self>
    where
        H: Handler<T>,
        T: 'static,
    {
        self.route_with(rule, RouteOptions::new(), handler)
    }

    pub fn route_with<H, T>(
        &mut self,
        rule: &str,
        options: RouteOptions,
        handler: H,
    ) -> SetupResult<&mut Self>
    where
        H: Handler<T>,
        T: 'static,
    {
        let options = match handler_name::<H>() {
            Some(name) if options.endpoint.is_none() => options.endpoint(name),
            _ => options,
        };
        self.add_url_rule(rule, options, Some(into_handler(handler)))
    }

    /// Registers a rule and, optionally, the handler for its endpoint.
    ///
    /// The endpoint defaults to the rule itself (dots replaced) when the
    /// options name none. Binding an endpoint that already has a handler fails.
    pub fn add_url_rule(
        &mut self,
        rule: &str,
        options: RouteOptions,
        handler: Option<BoxedHandler>,
    ) -> SetupResult<&mut Self> {
        self.check_setup("add_url_rule")?;
        let endpoint = options
            .endpoint
            .clone()
            .unwrap_or_else(|| default_endpoint(rule));

        if handler.is_some() && self.view_functions.contains_key(&endpoint) {
            return Err(SetupError::EndpointOverwrite(endpoint));
        }

        let rule = options.into_rule(rule, endpoint.clone());
        debug!(app = %self.name, rule = %rule, "Route registered");
        self.router.add_rule(rule)?;
        if let Some(handler) = handler {
            self.view_functions.insert(endpoint, handler);
        }
        Ok(self)
    }

    /// Binds a handler to an endpoint without adding a rule.
    pub fn endpoint<H, T>(&mut self, endpoint: &str, handler: H) -> SetupResult<&mut Self>
    where
        H: Handler<T>,
        T: 'static,
    {
        self.check_setup("endpoint")?;
        if self.view_functions.contains_key(endpoint) {
            return Err(SetupError::EndpointOverwrite(endpoint.to_string()));
        }
        self.view_functions
            .insert(endpoint.to_string(), into_handler(handler));
        Ok(self)
    }

    /// Appends a hook in `scope`.
    pub fn register_hook(&mut self, scope: Scope, hook: Hook) -> SetupResult<&mut Self> {
        self.check_setup("register_hook")?;
        self.hooks.register(scope, hook);
        Ok(self)
    }

    /// Runs once, before the first request is dispatched.
    pub fn before_first_request<F, R>(&mut self, f: F) -> SetupResult<&mut Self>
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoHookResult<()>,
    {
        self.register_hook(Scope::Global, Hook::BeforeFirstRequest(before_first_request_fn(f)))
    }

    /// Runs before every request. A non-empty result short-circuits the
    /// handler and is used as the response.
    pub fn before_request<F, R>(&mut self, f: F) -> SetupResult<&mut Self>
    where
        F: Fn(&RequestContext) -> R + Send + Sync + 'static,
        R: IntoResponseValue,
    {
        self.register_hook(Scope::Global, Hook::BeforeRequest(before_request_fn(f)))
    }

    /// Runs after every request with the response, returning a response.
    pub fn after_request<F, R>(&mut self, f: F) -> SetupResult<&mut Self>
    where
        F: Fn(&RequestContext, Response) -> R + Send + Sync + 'static,
        R: IntoHookResult<Response>,
    {
        self.register_hook(Scope::Global, Hook::AfterRequest(after_request_fn(f)))
    }

    /// Runs when a request context pops, with the unhandled error if any.
    pub fn teardown_request<F>(&mut self, f: F) -> SetupResult<&mut Self>
    where
        F: Fn(Option<&Error>) + Send + Sync + 'static,
    {
        self.register_hook(Scope::Global, Hook::TeardownRequest(teardown_fn(f)))
    }

    /// Runs when an application context is torn down.
    pub fn teardown_appcontext<F>(&mut self, f: F) -> SetupResult<&mut Self>
    where
        F: Fn(Option<&Error>) + Send + Sync + 'static,
    {
        self.register_hook(Scope::Global, Hook::TeardownAppContext(teardown_fn(f)))
    }

    /// Rewrites view args before any before-request hook runs.
    pub fn url_value_preprocessor<F>(&mut self, f: F) -> SetupResult<&mut Self>
    where
        F: Fn(Option<&str>, &mut ViewArgs) + Send + Sync + 'static,
    {
        self.register_hook(
            Scope::Global,
            Hook::UrlValuePreprocessor(url_value_preprocessor_fn(f)),
        )
    }

    /// Handles errors of `class` and its descendants.
    pub fn errorhandler<F, R>(&mut self, class: &'static ErrorClass, f: F) -> SetupResult<&mut Self>
    where
        F: Fn(&Error) -> R + Send + Sync + 'static,
        R: IntoResponseValue,
    {
        self.register_hook(Scope::Global, Hook::Error(class, error_handler_fn(f)))
    }

    /// Handles HTTP errors with status `code`.
    pub fn errorhandler_code<F, R>(&mut self, code: u16, f: F) -> SetupResult<&mut Self>
    where
        F: Fn(&Error) -> R + Send + Sync + 'static,
        R: IntoResponseValue,
    {
        let class = ErrorClass::for_code(code).ok_or(SetupError::UnknownStatusCode(code))?;
        self.errorhandler(class, f)
    }

    /// Applies everything recorded on `blueprint`.
    pub fn register_blueprint(&mut self, blueprint: Blueprint) -> SetupResult<&mut Self> {
        self.check_setup("register_blueprint")?;
        if blueprint.name().contains('.') {
            return Err(SetupError::DottedBlueprintName(blueprint.name().to_string()));
        }
        if self.blueprints.iter().any(|name| name == blueprint.name()) {
            return Err(SetupError::BlueprintNameCollision(blueprint.name().to_string()));
        }
        let name = blueprint.name().to_string();
        blueprint.register(self)?;
        debug!(app = %self.name, blueprint = %name, "Blueprint registered");
        self.blueprints.push(name);
        Ok(self)
    }

    // ─── Teardown ─────────────────────────────────────────────────────────────

    /// Runs teardown_request hooks and sends `request_tearing_down`.
    pub(crate) fn do_teardown_request(&self, ctx: &RequestContext, exc: Option<Arc<Error>>) {
        for hook in self.hooks.teardown_request(ctx.blueprint()) {
            hook(exc.as_deref());
        }
        self.signals.request_tearing_down.send(&exc);
    }

    /// Runs teardown_appcontext hooks and sends `appcontext_tearing_down`.
    pub(crate) fn do_teardown_appcontext(&self, exc: Option<Arc<Error>>) {
        for hook in self.hooks.teardown_appcontext() {
            hook(exc.as_deref());
        }
        self.signals.appcontext_tearing_down.send(&exc);
    }

    // ─── Internal (dispatch) ──────────────────────────────────────────────────

    pub(crate) fn mark_first_request_handled(&self) {
        self.got_first_request.store(true, Ordering::Release);
    }

    pub(crate) fn before_first_request_lock(&self) -> &Mutex<()> {
        &self.before_first_request_lock
    }
}

/// Endpoint name for a rule registered without one.
///
/// Dots separate blueprint names from endpoints, so they are replaced.
pub(crate) fn default_endpoint(rule: &str) -> String {
    rule.replace('.', "_")
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("debug", &self.config.debug)
            .field("endpoints", &self.view_functions.len())
            .field("blueprints", &self.blueprints)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn index() -> &'static str {
        "index"
    }

    #[test]
    fn test_endpoint_defaults_to_function_name() {
        let mut app = Application::new("test");
        app.route("/", index).unwrap();
        assert!(app.view_function("index").is_some());

        app.route("/closure", || "closure").unwrap();
        assert!(app.view_function("/closure").is_some());

        app.route("/robots.txt", || "").unwrap();
        assert!(app.view_function("/robots_txt").is_some());
    }

    #[test]
    fn test_endpoint_overwrite_is_rejected() {
        let mut app = Application::new("test");
        app.route("/", index).unwrap();
        let err = app.route("/again", index).err().unwrap();
        assert_eq!(err, SetupError::EndpointOverwrite("index".into()));
    }

    #[test]
    fn test_failed_blueprint_does_not_keep_its_name() {
        let mut app = Application::new("test");

        let mut broken = crate::Blueprint::new("shop");
        broken.route("/cart", || "cart");
        broken.route_with("/pay", RouteOptions::new().endpoint("pay.now"), || "pay");
        let err = app.register_blueprint(broken).err().unwrap();
        assert_eq!(err, SetupError::DottedEndpoint("pay.now".into()));
        assert!(app.blueprints().is_empty());

        let mut fixed = crate::Blueprint::new("shop");
        fixed.route("/checkout", || "checkout");
        app.register_blueprint(fixed).unwrap();
        assert_eq!(app.blueprints(), ["shop".to_string()]);
    }

    #[test]
    fn test_unknown_error_code_is_rejected() {
        let mut app = Application::new("test");
        let err = app.errorhandler_code(299, |_: &Error| "nope").err().unwrap();
        assert_eq!(err, SetupError::UnknownStatusCode(299));
    }

    #[test]
    fn test_options_added_unless_opted_out() {
        let mut app = Application::new("test");
        app.route_with(
            "/manual",
            RouteOptions::new()
                .methods([Method::GET])
                .provide_automatic_options(false),
            index,
        )
        .unwrap();
        let methods = app.router().allowed_methods("/manual", None);
        assert_eq!(methods, vec![Method::GET, Method::HEAD]);
    }

    #[test]
    fn test_late_registration_in_debug() {
        let mut app = Application::with_config(
            "test",
            AppConfig {
                debug: true,
                ..AppConfig::default()
            },
        );
        app.mark_first_request_handled();
        let err = app.before_request(|_: &RequestContext| ()).err().unwrap();
        assert!(matches!(err, SetupError::LateRegistration(_)));
    }
}
