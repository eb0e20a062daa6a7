//! Application and request context frames.
//!
//! Each thread owns two stacks: one of [`AppContext`] frames and one of
//! [`RequestContext`] frames. Pushing a request context implicitly pushes an
//! application context when none for the same application is active, and
//! popping the request context pops that implicit frame again.
//!
//! ```text
//!  push(request ctx)                         pop(request ctx)
//!  ├── pop preserved leftover, if any        ├── teardown_request hooks
//!  ├── push implicit app ctx, if needed      ├── request_tearing_down
//!  ├── push request frame                    ├── pop request frame
//!  └── open session                          └── pop implicit app ctx
//!                                                ├── teardown_appcontext hooks
//!                                                └── appcontext_tearing_down
//! ```
//!
//! Teardown runs exactly once per push/pop cycle. Nested pushes of the same
//! request context only tear down when the outermost push pops.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, MutexGuard};
use tracing::{error, trace};

use ember_core::{ContextError, ContextResult, Error, LocalStack, Namespace, Request};

use crate::app::Application;
use crate::hooks::AfterRequestFn;
use crate::routing::{RouteMatch, ViewArgs};
use crate::session::Session;

thread_local! {
    static APP_CTX_STACK: LocalStack<AppContext> =
        const { LocalStack::new("application context") };
    static REQUEST_CTX_STACK: LocalStack<RequestContext> =
        const { LocalStack::new("request context") };
}

type PanicPayload = Box<dyn Any + Send + 'static>;

// =============================================================================
// Accessors
// =============================================================================

/// The application context on top of this thread's stack.
pub fn current_app_context() -> ContextResult<Arc<AppContext>> {
    APP_CTX_STACK
        .with(LocalStack::top)
        .ok_or(ContextError::NoAppContext)
}

/// The request context on top of this thread's stack.
pub fn current_request_context() -> ContextResult<Arc<RequestContext>> {
    REQUEST_CTX_STACK
        .with(LocalStack::top)
        .ok_or(ContextError::NoRequestContext)
}

/// The application of the current application context.
pub fn current_app() -> ContextResult<Arc<Application>> {
    current_app_context().map(|ctx| ctx.app.clone())
}

/// The request being handled on this thread.
pub fn current_request() -> ContextResult<Arc<Request>> {
    current_request_context().map(|ctx| ctx.request.clone())
}

pub fn has_app_context() -> bool {
    APP_CTX_STACK.with(|stack| !stack.is_empty())
}

pub fn has_request_context() -> bool {
    REQUEST_CTX_STACK.with(|stack| !stack.is_empty())
}

/// Registers an after-request hook for the current request only.
pub fn after_this_request(hook: AfterRequestFn) -> ContextResult<()> {
    current_request_context()?.after_this_request(hook);
    Ok(())
}

fn resume(panic: Option<PanicPayload>) {
    if let Some(payload) = panic {
        panic::resume_unwind(payload);
    }
}

// =============================================================================
// AppContext
// =============================================================================

/// Application-level state for the lifetime of one push/pop cycle.
pub struct AppContext {
    app: Arc<Application>,
    g: Namespace,
    refcount: AtomicUsize,
}

impl AppContext {
    pub fn new(app: Arc<Application>) -> Arc<Self> {
        Arc::new(Self {
            app,
            g: Namespace::new(),
            refcount: AtomicUsize::new(0),
        })
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    /// Scratch storage that lives as long as this context.
    pub fn g(&self) -> &Namespace {
        &self.g
    }

    /// Makes this the current application context until the guard drops.
    pub fn push(self: &Arc<Self>) -> AppContextGuard {
        self.push_frame();
        AppContextGuard {
            ctx: Some(self.clone()),
        }
    }

    fn push_frame(self: &Arc<Self>) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
        APP_CTX_STACK.with(|stack| stack.push(self.clone()));
        trace!(app = %self.app.name(), "app context pushed");
        self.app.signals().appcontext_pushed.send(self);
    }

    /// Pops this context, which must be on top of the stack.
    ///
    /// When the last push is undone, teardown_appcontext hooks run with `exc`.
    pub fn pop(self: &Arc<Self>, exc: Option<Arc<Error>>) -> ContextResult<()> {
        let (result, panic) = self.pop_inner(exc);
        resume(panic);
        result
    }

    fn pop_inner(self: &Arc<Self>, exc: Option<Arc<Error>>) -> (ContextResult<()>, Option<PanicPayload>) {
        if let Err(e) = APP_CTX_STACK.with(|stack| stack.ensure_top(self)) {
            return (Err(e), None);
        }

        let remaining = self.refcount.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        let panic = if remaining == 0 {
            panic::catch_unwind(AssertUnwindSafe(|| {
                self.app.do_teardown_appcontext(exc);
            }))
            .err()
        } else {
            None
        };

        let result = APP_CTX_STACK.with(|stack| stack.pop_expected(self)).map(|_| ());
        trace!(app = %self.app.name(), "app context popped");
        self.app.signals().appcontext_popped.send(self);
        (result, panic)
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("app", &self.app.name())
            .field("refcount", &self.refcount.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Pops its application context when dropped.
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct AppContextGuard {
    ctx: Option<Arc<AppContext>>,
}

impl AppContextGuard {
    pub fn context(&self) -> Option<&Arc<AppContext>> {
        self.ctx.as_ref()
    }

    /// Pops now, passing `exc` to the teardown hooks.
    pub fn pop(mut self, exc: Option<Arc<Error>>) -> ContextResult<()> {
        match self.ctx.take() {
            Some(ctx) => ctx.pop(exc),
            None => Ok(()),
        }
    }
}

impl Drop for AppContextGuard {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            let (result, panic) = ctx.pop_inner(None);
            if let Err(e) = result {
                error!("Failed to pop application context: {e}");
            }
            if !std::thread::panicking() {
                resume(panic);
            }
        }
    }
}

// =============================================================================
// RequestContext
// =============================================================================

/// Everything known about one request while it is being handled.
pub struct RequestContext {
    app: Arc<Application>,
    request: Arc<Request>,
    route: OnceLock<Option<RouteMatch>>,
    routing_error: Mutex<Option<Error>>,
    view_args: Mutex<ViewArgs>,
    state: Namespace,
    session: Mutex<Option<Session>>,
    after_request_functions: Mutex<Vec<AfterRequestFn>>,
    implicit_app_ctx_stack: Mutex<Vec<Option<Arc<AppContext>>>>,
    preserved: AtomicBool,
    preserved_exc: Mutex<Option<Arc<Error>>>,
}

impl RequestContext {
    pub fn new(app: Arc<Application>, request: Request) -> Arc<Self> {
        Arc::new(Self {
            app,
            request: Arc::new(request),
            route: OnceLock::new(),
            routing_error: Mutex::new(None),
            view_args: Mutex::new(ViewArgs::new()),
            state: Namespace::new(),
            session: Mutex::new(None),
            after_request_functions: Mutex::new(Vec::new()),
            implicit_app_ctx_stack: Mutex::new(Vec::new()),
            preserved: AtomicBool::new(false),
            preserved_exc: Mutex::new(None),
        })
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// The matched route, once routing succeeded.
    pub fn route(&self) -> Option<&RouteMatch> {
        self.route.get().and_then(Option::as_ref)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.route().map(|route| route.endpoint.as_str())
    }

    /// The blueprint owning the matched endpoint. `None` is the global scope.
    pub fn blueprint(&self) -> Option<&str> {
        self.route().and_then(RouteMatch::blueprint)
    }

    /// Path parameters, as rewritten by URL value preprocessors.
    pub fn view_args(&self) -> MutexGuard<'_, ViewArgs> {
        self.view_args.lock()
    }

    /// Scratch storage that lives as long as this request.
    pub fn state(&self) -> &Namespace {
        &self.state
    }

    /// The session opened on push. Null before the first push.
    pub fn session(&self) -> parking_lot::MappedMutexGuard<'_, Session> {
        MutexGuard::map(self.session.lock(), |session| {
            session.get_or_insert_with(Session::null)
        })
    }

    /// Registers an after-request hook for this request only.
    pub fn after_this_request(&self, hook: AfterRequestFn) {
        self.after_request_functions.lock().push(hook);
    }

    /// Hooks stay registered, so a recovery pass runs them again.
    pub(crate) fn after_request_functions(&self) -> Vec<AfterRequestFn> {
        self.after_request_functions.lock().clone()
    }

    pub(crate) fn take_routing_error(&self) -> Option<Error> {
        self.routing_error.lock().take()
    }

    /// Resolves the request against the application's router.
    ///
    /// Only the first call resolves. A routing error is stored and raised
    /// when the request is dispatched.
    pub fn match_request(&self) {
        self.route.get_or_init(|| {
            let request = &self.request;
            match self
                .app
                .router()
                .resolve(request.method(), request.path(), request.host())
            {
                Ok(route) => {
                    *self.view_args.lock() = route.view_args.clone();
                    Some(route)
                }
                Err(err) => {
                    *self.routing_error.lock() = Some(with_query(err, request.query()));
                    None
                }
            }
        });
    }

    pub fn is_preserved(&self) -> bool {
        self.preserved.load(Ordering::Acquire)
    }

    /// Makes this the current request context.
    ///
    /// A context preserved by an earlier request on this thread is popped
    /// first. The returned guard pops again when finished or dropped.
    pub fn push(self: &Arc<Self>) -> RequestContextGuard {
        if let Some(top) = REQUEST_CTX_STACK.with(LocalStack::top)
            && top.is_preserved()
        {
            let exc = top.preserved_exc.lock().take();
            if let Err(e) = top.pop(exc) {
                error!("Failed to pop preserved request context: {e}");
            }
        }

        let reuse = APP_CTX_STACK
            .with(LocalStack::top)
            .is_some_and(|ctx| Arc::ptr_eq(&ctx.app, &self.app));
        if reuse {
            self.implicit_app_ctx_stack.lock().push(None);
        } else {
            let app_ctx = AppContext::new(self.app.clone());
            app_ctx.push_frame();
            self.implicit_app_ctx_stack.lock().push(Some(app_ctx));
        }

        REQUEST_CTX_STACK.with(|stack| stack.push(self.clone()));
        trace!(method = %self.request.method(), path = %self.request.path(), "request context pushed");

        let mut session = self.session.lock();
        if session.is_none() {
            let interface = self.app.session_interface();
            *session = Some(
                interface
                    .open_session(&self.app, &self.request)
                    .unwrap_or_else(Session::null),
            );
        }
        drop(session);

        RequestContextGuard {
            ctx: Some(self.clone()),
        }
    }

    /// Pops this context, which must be on top of the stack.
    ///
    /// The outermost pop runs teardown_request hooks with `exc`, sends
    /// `request_tearing_down` and pops the implicit application context.
    pub fn pop(self: &Arc<Self>, exc: Option<Arc<Error>>) -> ContextResult<()> {
        let (result, panic) = self.pop_inner(exc);
        resume(panic);
        result
    }

    fn pop_inner(self: &Arc<Self>, exc: Option<Arc<Error>>) -> (ContextResult<()>, Option<PanicPayload>) {
        if let Err(e) = REQUEST_CTX_STACK.with(|stack| stack.ensure_top(self)) {
            return (Err(e), None);
        }

        let (app_ctx, outermost) = {
            let mut implicit = self.implicit_app_ctx_stack.lock();
            let app_ctx = implicit.pop().flatten();
            (app_ctx, implicit.is_empty())
        };

        let mut panic = None;
        if outermost {
            self.preserved.store(false, Ordering::Release);
            self.preserved_exc.lock().take();
            panic = panic::catch_unwind(AssertUnwindSafe(|| {
                self.app.do_teardown_request(self, exc.clone());
            }))
            .err();
        }

        let mut result = REQUEST_CTX_STACK
            .with(|stack| stack.pop_expected(self))
            .map(|_| ());
        trace!(method = %self.request.method(), path = %self.request.path(), "request context popped");

        if let Some(app_ctx) = app_ctx {
            let (app_result, app_panic) = app_ctx.pop_inner(exc);
            result = result.and(app_result);
            panic = panic.or(app_panic);
        }
        (result, panic)
    }

    /// Pops unless the context should be kept for inspection.
    ///
    /// The context is kept when the request asked for it, or when `exc` is
    /// set and the application preserves contexts on errors.
    pub fn auto_pop(self: &Arc<Self>, exc: Option<Arc<Error>>) -> ContextResult<()> {
        if self.should_preserve(exc.is_some()) {
            self.preserve(exc);
            Ok(())
        } else {
            self.pop(exc)
        }
    }

    fn should_preserve(&self, failed: bool) -> bool {
        self.request.wants_preserved_context()
            || (failed && self.app.config().preserve_context_on_exception())
    }

    fn preserve(&self, exc: Option<Arc<Error>>) {
        trace!(path = %self.request.path(), "request context preserved");
        self.preserved.store(true, Ordering::Release);
        *self.preserved_exc.lock() = exc;
    }
}

fn with_query(err: Error, query: Option<&str>) -> Error {
    let Some(query) = query else { return err };
    if !err.is_a(&ember_core::error::REQUEST_REDIRECT) {
        return err;
    }
    match err.headers().get(http::header::LOCATION).and_then(|v| v.to_str().ok()) {
        Some(location) => Error::redirect(&format!("{location}?{query}")),
        None => err,
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", self.request.method())
            .field("path", &self.request.path())
            .field("endpoint", &self.endpoint())
            .field("preserved", &self.is_preserved())
            .finish_non_exhaustive()
    }
}

/// Pops its request context when finished or dropped.
///
/// Dropping the guard without calling [`finish`](Self::finish), for example
/// while unwinding, still pops the context and runs its teardown hooks.
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct RequestContextGuard {
    ctx: Option<Arc<RequestContext>>,
}

impl RequestContextGuard {
    pub fn context(&self) -> Option<&Arc<RequestContext>> {
        self.ctx.as_ref()
    }

    /// Ends the request, passing the unhandled error (if any) to teardown.
    pub fn finish(mut self, exc: Option<Arc<Error>>) -> ContextResult<()> {
        match self.ctx.take() {
            Some(ctx) => ctx.auto_pop(exc),
            None => Ok(()),
        }
    }
}

impl Drop for RequestContextGuard {
    fn drop(&mut self) {
        let Some(ctx) = self.ctx.take() else { return };
        if ctx.should_preserve(false) {
            ctx.preserve(None);
            return;
        }
        let (result, panic) = ctx.pop_inner(None);
        if let Err(e) = result {
            error!("Failed to pop request context: {e}");
        }
        if !std::thread::panicking() {
            resume(panic);
        }
    }
}
