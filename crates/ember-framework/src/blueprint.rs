//! Blueprints: named groups of routes and hooks.
//!
//! A blueprint records its registrations and replays them onto an
//! [`Application`] in [`Application::register_blueprint`]. Endpoints become
//! `"{blueprint}.{endpoint}"`, and hooks registered through the plain methods
//! only apply to requests whose endpoint belongs to the blueprint. The
//! `app_*` variants register into the global scope instead.
//!
//! ```rust,ignore
//! let mut admin = Blueprint::new("admin").url_prefix("/admin");
//! admin.route("/", dashboard);
//! admin.before_request(require_login);
//! app.register_blueprint(admin)?;
//! ```

use std::fmt;

use ember_core::{Error, ErrorClass, IntoResponseValue, Response};

use crate::app::{Application, default_endpoint};
use crate::context::RequestContext;
use crate::error::{SetupError, SetupResult};
use crate::handler::{BoxedHandler, Handler, handler_name, into_handler};
use crate::hooks::{
    Hook, IntoHookResult, Scope, after_request_fn, before_first_request_fn, before_request_fn,
    error_handler_fn, teardown_fn, url_value_preprocessor_fn,
};
use crate::routing::{RouteOptions, ViewArgs};

type Deferred = Box<dyn FnOnce(&mut Application, &SetupState) -> SetupResult<()> + Send>;

/// What a deferred registration knows about the blueprint it came from.
#[derive(Debug, Clone)]
struct SetupState {
    name: String,
    url_prefix: Option<String>,
}

impl SetupState {
    fn join(&self, rule: &str) -> String {
        match &self.url_prefix {
            None => rule.to_string(),
            Some(prefix) if rule.is_empty() => prefix.clone(),
            Some(prefix) => format!(
                "{}/{}",
                prefix.trim_end_matches('/'),
                rule.trim_start_matches('/')
            ),
        }
    }
}

/// A named, deferred set of routes and hooks.
pub struct Blueprint {
    name: String,
    url_prefix: Option<String>,
    deferred: Vec<Deferred>,
}

impl Blueprint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_prefix: None,
            deferred: Vec::new(),
        }
    }

    /// Prefixes every rule of this blueprint.
    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = Some(prefix.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> Scope {
        Scope::named(self.name.clone())
    }

    fn record<F>(&mut self, f: F) -> &mut Self
    where
        F: FnOnce(&mut Application, &SetupState) -> SetupResult<()> + Send + 'static,
    {
        self.deferred.push(Box::new(f));
        self
    }

    fn record_hook(&mut self, scope: Scope, hook: Hook) -> &mut Self {
        self.record(move |app, _| app.register_hook(scope, hook).map(|_| ()))
    }

    /// Replays every recorded registration onto `app`.
    pub(crate) fn register(self, app: &mut Application) -> SetupResult<()> {
        let state = SetupState {
            name: self.name,
            url_prefix: self.url_prefix,
        };
        for deferred in self.deferred {
            deferred(app, &state)?;
        }
        Ok(())
    }

    // ─── Routes ───────────────────────────────────────────────────────────────

    pub fn route<H, T>(&mut self, rule: &str, handler: H) -> &mut Self
    where
        H: Handler<T>,
        T: 'static,
    {
        self.route_with(rule, RouteOptions::new(), handler)
    }

    pub fn route_with<H, T>(&mut self, rule: &str, options: RouteOptions, handler: H) -> &mut Self
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

    /// Records a rule. The endpoint is namespaced with the blueprint name
    /// and must not contain a dot itself.
    pub fn add_url_rule(
        &mut self,
        rule: &str,
        options: RouteOptions,
        handler: Option<BoxedHandler>,
    ) -> &mut Self {
        let rule = rule.to_string();
        self.record(move |app, state| {
            let endpoint = options
                .endpoint
                .clone()
                .unwrap_or_else(|| default_endpoint(&rule));
            if endpoint.contains('.') {
                return Err(SetupError::DottedEndpoint(endpoint));
            }
            let options = options.endpoint(format!("{}.{endpoint}", state.name));
            app.add_url_rule(&state.join(&rule), options, handler)
                .map(|_| ())
        })
    }

    // ─── Blueprint-scoped hooks ───────────────────────────────────────────────

    pub fn before_request<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&RequestContext) -> R + Send + Sync + 'static,
        R: IntoResponseValue,
    {
        self.record_hook(self.scope(), Hook::BeforeRequest(before_request_fn(f)))
    }

    pub fn after_request<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&RequestContext, Response) -> R + Send + Sync + 'static,
        R: IntoHookResult<Response>,
    {
        self.record_hook(self.scope(), Hook::AfterRequest(after_request_fn(f)))
    }

    pub fn teardown_request<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Option<&Error>) + Send + Sync + 'static,
    {
        self.record_hook(self.scope(), Hook::TeardownRequest(teardown_fn(f)))
    }

    pub fn url_value_preprocessor<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Option<&str>, &mut ViewArgs) + Send + Sync + 'static,
    {
        self.record_hook(
            self.scope(),
            Hook::UrlValuePreprocessor(url_value_preprocessor_fn(f)),
        )
    }

    pub fn errorhandler<F, R>(&mut self, class: &'static ErrorClass, f: F) -> &mut Self
    where
        F: Fn(&Error) -> R + Send + Sync + 'static,
        R: IntoResponseValue,
    {
        self.record_hook(self.scope(), Hook::Error(class, error_handler_fn(f)))
    }

    /// Fails at registration when `code` has no built-in error class.
    pub fn errorhandler_code<F, R>(&mut self, code: u16, f: F) -> &mut Self
    where
        F: Fn(&Error) -> R + Send + Sync + 'static,
        R: IntoResponseValue,
    {
        let scope = self.scope();
        let handler = error_handler_fn(f);
        self.record(move |app, _| {
            let class = ErrorClass::for_code(code).ok_or(SetupError::UnknownStatusCode(code))?;
            app.register_hook(scope, Hook::Error(class, handler)).map(|_| ())
        })
    }

    // ─── Application-wide hooks ───────────────────────────────────────────────

    pub fn before_app_first_request<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoHookResult<()>,
    {
        self.record_hook(Scope::Global, Hook::BeforeFirstRequest(before_first_request_fn(f)))
    }

    pub fn before_app_request<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&RequestContext) -> R + Send + Sync + 'static,
        R: IntoResponseValue,
    {
        self.record_hook(Scope::Global, Hook::BeforeRequest(before_request_fn(f)))
    }

    pub fn after_app_request<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&RequestContext, Response) -> R + Send + Sync + 'static,
        R: IntoHookResult<Response>,
    {
        self.record_hook(Scope::Global, Hook::AfterRequest(after_request_fn(f)))
    }

    pub fn teardown_app_request<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Option<&Error>) + Send + Sync + 'static,
    {
        self.record_hook(Scope::Global, Hook::TeardownRequest(teardown_fn(f)))
    }

    pub fn app_url_value_preprocessor<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Option<&str>, &mut ViewArgs) + Send + Sync + 'static,
    {
        self.record_hook(
            Scope::Global,
            Hook::UrlValuePreprocessor(url_value_preprocessor_fn(f)),
        )
    }

    pub fn app_errorhandler<F, R>(&mut self, class: &'static ErrorClass, f: F) -> &mut Self
    where
        F: Fn(&Error) -> R + Send + Sync + 'static,
        R: IntoResponseValue,
    {
        self.record_hook(Scope::Global, Hook::Error(class, error_handler_fn(f)))
    }
}

impl fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blueprint")
            .field("name", &self.name)
            .field("url_prefix", &self.url_prefix)
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn state(prefix: Option<&str>) -> SetupState {
        SetupState {
            name: "bp".into(),
            url_prefix: prefix.map(str::to_string),
        }
    }

    #[test]
    fn test_prefix_join() {
        assert_eq!(state(None).join("/a"), "/a");
        assert_eq!(state(Some("/admin")).join("/a"), "/admin/a");
        assert_eq!(state(Some("/admin/")).join("/a"), "/admin/a");
        assert_eq!(state(Some("/admin")).join(""), "/admin");
        assert_eq!(state(Some("/admin")).join("/"), "/admin/");
    }

    fn list() -> &'static str {
        "list"
    }

    #[test]
    fn test_endpoints_are_namespaced() {
        let mut bp = Blueprint::new("users").url_prefix("/users");
        bp.route("/", list);

        let mut app = Application::new("test");
        app.register_blueprint(bp).unwrap();

        assert!(app.view_function("users.list").is_some());
        let route = app.router().resolve(&Method::GET, "/users/", None).unwrap();
        assert_eq!(route.endpoint, "users.list");
        assert_eq!(route.blueprint(), Some("users"));
    }

    #[test]
    fn test_dotted_names_are_rejected() {
        let mut bp = Blueprint::new("a");
        bp.route_with("/", RouteOptions::new().endpoint("x.y"), list);
        let mut app = Application::new("test");
        let err = app.register_blueprint(bp).err().unwrap();
        assert_eq!(err, SetupError::DottedEndpoint("x.y".into()));

        let err = app.register_blueprint(Blueprint::new("a.b")).err().unwrap();
        assert_eq!(err, SetupError::DottedBlueprintName("a.b".into()));
    }

    #[test]
    fn test_duplicate_name_collides() {
        let mut app = Application::new("test");
        app.register_blueprint(Blueprint::new("bp")).unwrap();
        let err = app.register_blueprint(Blueprint::new("bp")).err().unwrap();
        assert_eq!(err, SetupError::BlueprintNameCollision("bp".into()));
    }
}
