//! The request dispatch engine.
//!
//! [`Application::handle`] runs one request start to finish on the calling
//! thread:
//!
//! ```text
//! push request context
//!   └── full dispatch
//!         ├── before-first-request hooks (once per application)
//!         ├── request_started
//!         ├── route matching
//!         ├── url value preprocessors, before-request hooks
//!         ├── handler, or the automatic OPTIONS response
//!         ├── on error: user error handling
//!         └── finalize: normalize, after-request hooks, save session
//!   └── on unhandled error: escalate, or 500 (offered to a 500 handler)
//! pop request context (teardown hooks), even when unwinding
//! ```

use std::sync::Arc;

use http::Method;
use thiserror::Error as ThisError;
use tracing::{Level, debug, error, span};

use ember_core::error::{FORM_DATA_ROUTING_REDIRECT, REQUEST_REDIRECT};
use ember_core::{Error, Request, Response, ResponseValue};

use crate::app::Application;
use crate::context::RequestContext;

/// An error nothing handled while the application propagates exceptions,
/// or one raised during error recovery itself.
#[derive(Debug, Clone, ThisError)]
#[error("unhandled error while dispatching: {error}")]
pub struct Escalation {
    error: Arc<Error>,
}

impl Escalation {
    pub(crate) fn new(error: Arc<Error>) -> Self {
        Self { error }
    }

    pub fn error(&self) -> &Error {
        &self.error
    }

    pub fn into_error(self) -> Arc<Error> {
        self.error
    }

    /// A generic `500 Internal Server Error` with no detail.
    pub fn into_response(self) -> Response {
        Error::internal_server_error().to_response()
    }
}

impl Application {
    /// Dispatches `request` and returns its response.
    ///
    /// Fails only when an error is unhandled and exceptions propagate, or
    /// when error recovery itself fails. The request context is popped in
    /// every case, including panics.
    pub fn handle(self: &Arc<Self>, request: Request) -> Result<Response, Escalation> {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            method = %request.method(),
            path = %request.path()
        );
        let _enter = span.enter();

        let ctx = self.request_context(request);
        let guard = ctx.push();

        let (result, exc) = match self.full_dispatch_request(&ctx) {
            Ok(response) => (Ok(response), None),
            Err(err) => {
                let err = Arc::new(err);
                (self.handle_exception(&ctx, err.clone()), Some(err))
            }
        };

        if let Err(e) = guard.finish(exc) {
            error!("Failed to pop request context: {e}");
        }

        if let Ok(response) = &result {
            debug!(status = %response.status(), "Request handled");
        }
        result
    }

    /// Dispatches the request of `ctx`, which must be current, including
    /// user error handling and finalization.
    pub fn full_dispatch_request(&self, ctx: &RequestContext) -> Result<Response, Error> {
        self.try_trigger_before_first_request_functions()?;

        let rv = match self.run_request(ctx) {
            Ok(rv) => rv,
            Err(err) => self.handle_user_exception(ctx.blueprint(), err)?,
        };
        self.finalize_request(ctx, rv, false)
    }

    fn run_request(&self, ctx: &RequestContext) -> Result<ResponseValue, Error> {
        self.signals().request_started.send(ctx.request());
        ctx.match_request();

        let rv = self.preprocess_request(ctx)?;
        if !rv.is_empty() {
            return Ok(rv);
        }
        self.dispatch_request(ctx)
    }

    /// Runs the before-first-request hooks once, even under concurrent
    /// first requests. A failing hook leaves the flag unset.
    fn try_trigger_before_first_request_functions(&self) -> Result<(), Error> {
        if self.got_first_request() {
            return Ok(());
        }
        let _lock = self.before_first_request_lock().lock();
        if self.got_first_request() {
            return Ok(());
        }

        for hook in self.hooks().before_first_request() {
            hook()?;
        }
        self.mark_first_request_handled();
        debug!(app = %self.name(), "First request hooks completed");
        Ok(())
    }

    /// Runs URL value preprocessors and before-request hooks.
    ///
    /// Returns the first non-empty value a hook produced, or
    /// [`ResponseValue::Empty`] when dispatch should continue.
    pub fn preprocess_request(&self, ctx: &RequestContext) -> Result<ResponseValue, Error> {
        let blueprint = ctx.blueprint();

        // Preprocessors work on a copy so they may read the context's args.
        let preprocessors: Vec<_> = self.hooks().url_value_preprocessors(blueprint).collect();
        if !preprocessors.is_empty() {
            let mut view_args = ctx.view_args().clone();
            for preprocessor in preprocessors {
                preprocessor(ctx.endpoint(), &mut view_args);
            }
            *ctx.view_args() = view_args;
        }

        for hook in self.hooks().before_request(blueprint) {
            let rv = hook(ctx)?;
            if !rv.is_empty() {
                return Ok(rv);
            }
        }
        Ok(ResponseValue::Empty)
    }

    /// Raises the routing error, answers automatic `OPTIONS`, or calls the
    /// handler bound to the matched endpoint.
    pub fn dispatch_request(&self, ctx: &RequestContext) -> Result<ResponseValue, Error> {
        if let Some(err) = ctx.take_routing_error() {
            return Err(self.raise_routing_exception(ctx, err));
        }
        let route = ctx
            .route()
            .ok_or_else(|| Error::internal("request was dispatched before routing"))?;

        if route.provide_automatic_options && ctx.request().method() == Method::OPTIONS {
            return Ok(ResponseValue::Response(self.make_default_options_response(ctx)));
        }

        let handler = self.view_function(&route.endpoint).ok_or_else(|| {
            Error::internal(format!("no handler bound to endpoint '{}'", route.endpoint))
        })?;
        handler(ctx)
    }

    /// In debug mode, a slash redirect for a request that may carry a body
    /// is turned into a diagnostic error, since following it drops the body.
    fn raise_routing_exception(&self, ctx: &RequestContext, err: Error) -> Error {
        let method = ctx.request().method();
        if !self.debug()
            || !err.is_a(&REQUEST_REDIRECT)
            || [Method::GET, Method::HEAD, Method::OPTIONS].contains(method)
        {
            return err;
        }

        let location = err
            .headers()
            .get(http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Error::new(&FORM_DATA_ROUTING_REDIRECT)
            .with_description(format!(
                "A request was sent to '{}' but routing issued a redirect to '{location}'. \
                 The URL was defined with a trailing slash, so requests without it are \
                 redirected. Clients will not resend the {method} body after the redirect; \
                 send the request to the URL with the trailing slash instead.",
                ctx.request().path(),
            ))
            .with_original(Arc::new(err))
    }

    /// An empty `200` response whose `Allow` header lists every method the
    /// router accepts for the request path.
    pub fn make_default_options_response(&self, ctx: &RequestContext) -> Response {
        let request = ctx.request();
        let methods = self.router().allowed_methods(request.path(), request.host());
        let mut response = Response::default();
        response.set_allow(&methods);
        response
    }

    /// Normalizes `rv` and runs after-request processing.
    ///
    /// During error recovery a failure in processing is logged and the
    /// unprocessed response is returned instead.
    pub fn finalize_request(
        &self,
        ctx: &RequestContext,
        rv: ResponseValue,
        from_error_handler: bool,
    ) -> Result<Response, Error> {
        let response = self.normalizer().normalize(rv)?;
        let fallback = from_error_handler.then(|| response.clone());

        match self.process_response(ctx, response) {
            Ok(response) => {
                self.signals().request_finished.send(&response);
                Ok(response)
            }
            Err(err) => match fallback {
                Some(response) => {
                    error!(
                        "Request finalizing failed with an error while handling an error: {}",
                        err.chain()
                    );
                    Ok(response)
                }
                None => Err(err),
            },
        }
    }

    /// Runs this request's after hooks, then the scoped and global ones,
    /// then saves the session.
    pub fn process_response(
        &self,
        ctx: &RequestContext,
        response: Response,
    ) -> Result<Response, Error> {
        let mut response = response;
        for hook in ctx.after_request_functions().into_iter().rev() {
            response = hook(ctx, response)?;
        }
        for hook in self.hooks().after_request(ctx.blueprint()) {
            response = hook(ctx, response)?;
        }

        let interface = self.session_interface();
        let session = ctx.session();
        if !interface.is_empty(&session) {
            interface.save_session(self, &session, &mut response)?;
        }
        Ok(response)
    }

    /// Handles an error nothing else handled.
    ///
    /// Escalates when exceptions propagate. Otherwise logs it and answers
    /// with a 500, offered to a registered 500 handler first. The 500 error
    /// keeps `err` as its original.
    pub fn handle_exception(
        &self,
        ctx: &RequestContext,
        err: Arc<Error>,
    ) -> Result<Response, Escalation> {
        self.signals().got_request_exception.send(&err);

        if self.config().propagate_exceptions() {
            return Err(Escalation::new(err));
        }

        let request = ctx.request();
        error!(
            "Exception on {} [{}]: {}",
            request.path(),
            request.method(),
            err.chain()
        );

        let server_error = Error::internal_server_error().with_original(err);
        let rv = match self.find_error_handler(ctx.blueprint(), &server_error) {
            Some(handler) => handler(&server_error).map_err(|e| Escalation::new(Arc::new(e)))?,
            None => ResponseValue::Response(server_error.to_response()),
        };
        self.finalize_request(ctx, rv, true)
            .map_err(|e| Escalation::new(Arc::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use http::StatusCode;

    fn app(config: AppConfig) -> Arc<Application> {
        let mut app = Application::with_config("test", config);
        app.route("/", || "index").unwrap();
        app.route("/fail", || Err::<&str, _>(Error::internal("boom")))
            .unwrap();
        Arc::new(app)
    }

    #[test]
    fn test_unhandled_error_becomes_500() {
        let app = app(AppConfig::default());
        let response = app.handle(Request::get("/fail")).unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_unhandled_error_escalates_when_propagating() {
        let app = app(AppConfig {
            testing: true,
            ..AppConfig::default()
        });
        let escalation = app.handle(Request::get("/fail")).unwrap_err();
        assert!(escalation.error().chain().contains("boom"));
        assert_eq!(
            escalation.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_form_redirect_is_diagnosed_in_debug() {
        let mut app = Application::with_config(
            "test",
            AppConfig {
                debug: true,
                ..AppConfig::default()
            },
        );
        app.route_with(
            "/items/",
            crate::routing::RouteOptions::new().methods([Method::POST]),
            || "created",
        )
        .unwrap();
        let app = Arc::new(app);

        let escalation = app.handle(Request::post("/items")).unwrap_err();
        assert!(escalation.error().is_a(&FORM_DATA_ROUTING_REDIRECT));
    }

    #[test]
    fn test_redirect_without_debug() {
        let mut app = Application::new("test");
        app.route("/items/", || "items").unwrap();
        let app = Arc::new(app);

        let response = app.handle(Request::get("/items?page=2")).unwrap();
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(response.headers()["location"], "/items/?page=2");
    }
}
