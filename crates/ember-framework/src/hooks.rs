//! Hook registry.
//!
//! Hooks are grouped by phase and by [`Scope`]. A request's scope is the
//! blueprint that owns its matched endpoint, or the global scope when
//! routing failed or the endpoint belongs to the application itself.
//!
//! Retrieval order per phase:
//!
//! | phase                  | order                                             |
//! |------------------------|---------------------------------------------------|
//! | before first request   | registration order                                |
//! | url value preprocessor | global, then scope, each in registration order    |
//! | before request         | global, then scope, each in registration order    |
//! | after request          | scope, then global, each in reverse order         |
//! | teardown request       | scope, then global, each in reverse order         |
//! | teardown appcontext    | reverse registration order                        |
//!
//! Registries are append-only.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ember_core::{Error, ErrorClass, IntoResponseValue, Response, ResponseValue};

use crate::context::RequestContext;
use crate::routing::ViewArgs;

pub type BeforeFirstRequestFn = Arc<dyn Fn() -> Result<(), Error> + Send + Sync>;
/// Returns [`ResponseValue::Empty`] to continue, anything else short-circuits.
pub type BeforeRequestFn =
    Arc<dyn Fn(&RequestContext) -> Result<ResponseValue, Error> + Send + Sync>;
pub type AfterRequestFn =
    Arc<dyn Fn(&RequestContext, Response) -> Result<Response, Error> + Send + Sync>;
pub type TeardownFn = Arc<dyn Fn(Option<&Error>) + Send + Sync>;
pub type UrlValuePreprocessorFn = Arc<dyn Fn(Option<&str>, &mut ViewArgs) + Send + Sync>;
pub type ErrorHandlerFn = Arc<dyn Fn(&Error) -> Result<ResponseValue, Error> + Send + Sync>;

/// Return types accepted from hooks that produce a `T`.
pub trait IntoHookResult<T> {
    fn into_hook_result(self) -> Result<T, Error>;
}

impl IntoHookResult<()> for () {
    fn into_hook_result(self) -> Result<(), Error> {
        Ok(())
    }
}

impl IntoHookResult<Response> for Response {
    fn into_hook_result(self) -> Result<Response, Error> {
        Ok(self)
    }
}

impl<T, E: Into<Error>> IntoHookResult<T> for Result<T, E> {
    fn into_hook_result(self) -> Result<T, Error> {
        self.map_err(Into::into)
    }
}

pub fn before_first_request_fn<F, R>(f: F) -> BeforeFirstRequestFn
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoHookResult<()>,
{
    Arc::new(move || f().into_hook_result())
}

pub fn before_request_fn<F, R>(f: F) -> BeforeRequestFn
where
    F: Fn(&RequestContext) -> R + Send + Sync + 'static,
    R: IntoResponseValue,
{
    Arc::new(move |ctx| f(ctx).into_response_value())
}

pub fn after_request_fn<F, R>(f: F) -> AfterRequestFn
where
    F: Fn(&RequestContext, Response) -> R + Send + Sync + 'static,
    R: IntoHookResult<Response>,
{
    Arc::new(move |ctx, response| f(ctx, response).into_hook_result())
}

pub fn teardown_fn<F>(f: F) -> TeardownFn
where
    F: Fn(Option<&Error>) + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn url_value_preprocessor_fn<F>(f: F) -> UrlValuePreprocessorFn
where
    F: Fn(Option<&str>, &mut ViewArgs) + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn error_handler_fn<F, R>(f: F) -> ErrorHandlerFn
where
    F: Fn(&Error) -> R + Send + Sync + 'static,
    R: IntoResponseValue,
{
    Arc::new(move |err| f(err).into_response_value())
}

/// The owner of a hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    /// A blueprint, by name.
    Named(String),
}

impl Scope {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Global => None,
            Self::Named(name) => Some(name.as_str()),
        }
    }
}

impl From<Option<&str>> for Scope {
    fn from(name: Option<&str>) -> Self {
        name.map_or(Self::Global, Self::named)
    }
}

/// A hook ready to be registered, tagged with its phase.
pub enum Hook {
    BeforeFirstRequest(BeforeFirstRequestFn),
    BeforeRequest(BeforeRequestFn),
    AfterRequest(AfterRequestFn),
    TeardownRequest(TeardownFn),
    TeardownAppContext(TeardownFn),
    UrlValuePreprocessor(UrlValuePreprocessorFn),
    /// Handles errors of `class` and its descendants.
    Error(&'static ErrorClass, ErrorHandlerFn),
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::BeforeFirstRequest(_) => "BeforeFirstRequest",
            Self::BeforeRequest(_) => "BeforeRequest",
            Self::AfterRequest(_) => "AfterRequest",
            Self::TeardownRequest(_) => "TeardownRequest",
            Self::TeardownAppContext(_) => "TeardownAppContext",
            Self::UrlValuePreprocessor(_) => "UrlValuePreprocessor",
            Self::Error(class, _) => return write!(f, "Error({class})"),
        };
        f.write_str(phase)
    }
}

/// Hooks of one phase, split by scope.
struct Scoped<T> {
    global: Vec<T>,
    named: HashMap<String, Vec<T>>,
}

impl<T> Default for Scoped<T> {
    fn default() -> Self {
        Self {
            global: Vec::new(),
            named: HashMap::new(),
        }
    }
}

impl<T> Scoped<T> {
    fn push(&mut self, scope: Scope, item: T) {
        match scope {
            Scope::Global => self.global.push(item),
            Scope::Named(name) => self.named.entry(name).or_default().push(item),
        }
    }

    fn scoped(&self, scope: Option<&str>) -> &[T] {
        scope
            .and_then(|name| self.named.get(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Global first, then scope, in registration order.
    fn forward(&self, scope: Option<&str>) -> impl Iterator<Item = &T> {
        self.global.iter().chain(self.scoped(scope).iter())
    }

    /// Scope first, then global, each reversed.
    fn backward(&self, scope: Option<&str>) -> impl Iterator<Item = &T> {
        self.scoped(scope).iter().rev().chain(self.global.iter().rev())
    }

    fn len(&self) -> usize {
        self.global.len() + self.named.values().map(Vec::len).sum::<usize>()
    }
}

/// Error handlers keyed by status code (or `None`) and then class name.
type HandlerMap = HashMap<Option<u16>, HashMap<&'static str, ErrorHandlerFn>>;

/// Ordered hook collections for one application.
#[derive(Default)]
pub struct HookRegistry {
    before_first_request: Vec<BeforeFirstRequestFn>,
    before_request: Scoped<BeforeRequestFn>,
    after_request: Scoped<AfterRequestFn>,
    teardown_request: Scoped<TeardownFn>,
    teardown_appcontext: Vec<TeardownFn>,
    url_value_preprocessors: Scoped<UrlValuePreprocessorFn>,
    error_handlers: HashMap<Scope, HandlerMap>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hook for `scope`.
    ///
    /// First-request and appcontext teardown hooks are always global. A
    /// second error handler for the same scope and class replaces the first.
    pub fn register(&mut self, scope: Scope, hook: Hook) {
        match hook {
            Hook::BeforeFirstRequest(f) => self.before_first_request.push(f),
            Hook::BeforeRequest(f) => self.before_request.push(scope, f),
            Hook::AfterRequest(f) => self.after_request.push(scope, f),
            Hook::TeardownRequest(f) => self.teardown_request.push(scope, f),
            Hook::TeardownAppContext(f) => self.teardown_appcontext.push(f),
            Hook::UrlValuePreprocessor(f) => self.url_value_preprocessors.push(scope, f),
            Hook::Error(class, f) => {
                self.error_handlers
                    .entry(scope)
                    .or_default()
                    .entry(class.code())
                    .or_default()
                    .insert(class.name(), f);
            }
        }
    }

    pub fn before_first_request(&self) -> impl Iterator<Item = &BeforeFirstRequestFn> {
        self.before_first_request.iter()
    }

    pub fn before_request(&self, scope: Option<&str>) -> impl Iterator<Item = &BeforeRequestFn> {
        self.before_request.forward(scope)
    }

    pub fn url_value_preprocessors(
        &self,
        scope: Option<&str>,
    ) -> impl Iterator<Item = &UrlValuePreprocessorFn> {
        self.url_value_preprocessors.forward(scope)
    }

    pub fn after_request(&self, scope: Option<&str>) -> impl Iterator<Item = &AfterRequestFn> {
        self.after_request.backward(scope)
    }

    pub fn teardown_request(&self, scope: Option<&str>) -> impl Iterator<Item = &TeardownFn> {
        self.teardown_request.backward(scope)
    }

    pub fn teardown_appcontext(&self) -> impl Iterator<Item = &TeardownFn> {
        self.teardown_appcontext.iter().rev()
    }

    /// Handler registered for exactly `(scope, code)`, matched against the
    /// class of `error` and then each of its ancestors.
    pub(crate) fn error_handler(
        &self,
        scope: &Scope,
        code: Option<u16>,
        error: &Error,
    ) -> Option<&ErrorHandlerFn> {
        let handlers = self.error_handlers.get(scope)?.get(&code)?;
        error
            .class()
            .ancestors()
            .find_map(|class| handlers.get(class.name()))
    }

    /// Total number of registered hooks, error handlers included.
    pub fn len(&self) -> usize {
        let error_handlers: usize = self
            .error_handlers
            .values()
            .flat_map(HashMap::values)
            .map(HashMap::len)
            .sum();
        self.before_first_request.len()
            + self.before_request.len()
            + self.after_request.len()
            + self.teardown_request.len()
            + self.teardown_appcontext.len()
            + self.url_value_preprocessors.len()
            + error_handlers
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("before_first_request", &self.before_first_request.len())
            .field("before_request", &self.before_request.len())
            .field("after_request", &self.after_request.len())
            .field("teardown_request", &self.teardown_request.len())
            .field("teardown_appcontext", &self.teardown_appcontext.len())
            .field("url_value_preprocessors", &self.url_value_preprocessors.len())
            .finish_non_exhaustive()
    }
}
