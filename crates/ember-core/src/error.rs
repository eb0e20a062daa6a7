//! Error taxonomy for the Ember framework.
//!
//! Dispatch-time failures are represented by a single [`Error`] value that
//! points at a static [`ErrorClass`]. Classes form a single-parent hierarchy
//! that error handlers are matched against, nearest ancestor first:
//!
//! ```text
//! Exception
//! ├── HTTPException
//! │   ├── BadRequest (400)
//! │   │   └── BadRequestKeyError
//! │   ├── NotFound (404)
//! │   ├── ...
//! │   ├── InternalServerError (500)
//! │   └── RoutingException
//! │       └── RequestRedirect (308)
//! ├── FormDataRoutingRedirect
//! └── ResponseShapeError
//! ```
//!
//! Applications declare their own classes as statics:
//!
//! ```rust,ignore
//! use ember_core::error::{ErrorClass, EXCEPTION};
//!
//! pub static DATABASE_ERROR: ErrorClass = ErrorClass::new("DatabaseError").extends(&EXCEPTION);
//! pub static STALE_ROW: ErrorClass = ErrorClass::new("StaleRow").extends(&DATABASE_ERROR);
//! ```
//!
//! Class names are the identity used for handler lookup and must be unique
//! within an application.

use std::fmt;
use std::sync::Arc;

use http::header::{CONTENT_TYPE, HeaderName, HeaderValue, LOCATION};
use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;

use crate::response::Response;

/// A boxed, thread-safe standard error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// ErrorClass
// =============================================================================

/// A node in the error class hierarchy.
#[derive(Debug)]
pub struct ErrorClass {
    name: &'static str,
    parent: Option<&'static ErrorClass>,
    code: Option<u16>,
    description: &'static str,
}

impl ErrorClass {
    /// Creates a root class with no parent and no status code.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            parent: None,
            code: None,
            description: "",
        }
    }

    /// Sets the parent class.
    pub const fn extends(self, parent: &'static ErrorClass) -> Self {
        Self {
            parent: Some(parent),
            ..self
        }
    }

    /// Attaches an HTTP status code. Subclasses inherit it.
    pub const fn with_code(self, code: u16) -> Self {
        Self {
            code: Some(code),
            ..self
        }
    }

    /// Sets the default human readable description.
    pub const fn with_description(self, description: &'static str) -> Self {
        Self {
            description,
            ..self
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static ErrorClass> {
        self.parent
    }

    /// Returns the status code of this class or its nearest ancestor that has one.
    pub fn code(&self) -> Option<u16> {
        self.ancestors().find_map(|class| class.code)
    }

    /// Returns the description of this class or its nearest described ancestor.
    pub fn description(&self) -> &'static str {
        self.ancestors()
            .map(|class| class.description)
            .find(|d| !d.is_empty())
            .unwrap_or("")
    }

    /// Iterates over this class followed by each ancestor, nearest first.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }

    /// Returns `true` if `other` is this class or one of its ancestors.
    pub fn is_a(&self, other: &ErrorClass) -> bool {
        self.ancestors().any(|class| class.name == other.name)
    }

    /// Looks up the built-in HTTP error class registered for a status code.
    pub fn for_code(code: u16) -> Option<&'static ErrorClass> {
        HTTP_CLASSES
            .iter()
            .copied()
            .find(|class| class.code == Some(code))
    }
}

impl PartialEq for ErrorClass {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ErrorClass {}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Iterator returned by [`ErrorClass::ancestors`].
#[derive(Debug, Clone)]
pub struct Ancestors<'a> {
    next: Option<&'a ErrorClass>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a ErrorClass;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent;
        Some(current)
    }
}

// =============================================================================
// Built-in classes
// =============================================================================

pub static EXCEPTION: ErrorClass = ErrorClass::new("Exception");

pub static HTTP_EXCEPTION: ErrorClass = ErrorClass::new("HTTPException").extends(&EXCEPTION);

pub static BAD_REQUEST: ErrorClass = ErrorClass::new("BadRequest")
    .extends(&HTTP_EXCEPTION)
    .with_code(400)
    .with_description(
        "The browser (or proxy) sent a request that this server could not understand.",
    );

/// Raised when a required request key (form field, JSON member) is missing.
pub static BAD_REQUEST_KEY_ERROR: ErrorClass =
    ErrorClass::new("BadRequestKeyError").extends(&BAD_REQUEST);

pub static UNAUTHORIZED: ErrorClass = ErrorClass::new("Unauthorized")
    .extends(&HTTP_EXCEPTION)
    .with_code(401)
    .with_description(
        "The server could not verify that you are authorized to access the URL requested.",
    );

pub static FORBIDDEN: ErrorClass = ErrorClass::new("Forbidden")
    .extends(&HTTP_EXCEPTION)
    .with_code(403)
    .with_description(
        "You don't have the permission to access the requested resource. \
         It is either read-protected or not readable by the server.",
    );

pub static NOT_FOUND: ErrorClass = ErrorClass::new("NotFound")
    .extends(&HTTP_EXCEPTION)
    .with_code(404)
    .with_description(
        "The requested URL was not found on the server. \
         If you entered the URL manually please check your spelling and try again.",
    );

pub static METHOD_NOT_ALLOWED: ErrorClass = ErrorClass::new("MethodNotAllowed")
    .extends(&HTTP_EXCEPTION)
    .with_code(405)
    .with_description("The method is not allowed for the requested URL.");

pub static NOT_ACCEPTABLE: ErrorClass = ErrorClass::new("NotAcceptable")
    .extends(&HTTP_EXCEPTION)
    .with_code(406)
    .with_description(
        "The resource identified by the request is only capable of generating response \
         entities which have content characteristics not acceptable according to the \
         accept headers sent in the request.",
    );

pub static REQUEST_TIMEOUT: ErrorClass = ErrorClass::new("RequestTimeout")
    .extends(&HTTP_EXCEPTION)
    .with_code(408)
    .with_description(
        "The server closed the network connection because the browser didn't finish \
         the request within the specified time.",
    );

pub static CONFLICT: ErrorClass = ErrorClass::new("Conflict")
    .extends(&HTTP_EXCEPTION)
    .with_code(409)
    .with_description(
        "A conflict happened while processing the request. \
         The resource might have been modified while the request was being processed.",
    );

pub static GONE: ErrorClass = ErrorClass::new("Gone")
    .extends(&HTTP_EXCEPTION)
    .with_code(410)
    .with_description(
        "The requested URL is no longer available on this server and there is no \
         forwarding address.",
    );

pub static PAYLOAD_TOO_LARGE: ErrorClass = ErrorClass::new("RequestEntityTooLarge")
    .extends(&HTTP_EXCEPTION)
    .with_code(413)
    .with_description("The data value transmitted exceeds the capacity limit.");

pub static UNSUPPORTED_MEDIA_TYPE: ErrorClass = ErrorClass::new("UnsupportedMediaType")
    .extends(&HTTP_EXCEPTION)
    .with_code(415)
    .with_description("The server does not support the media type transmitted in the request.");

pub static UNPROCESSABLE_ENTITY: ErrorClass = ErrorClass::new("UnprocessableEntity")
    .extends(&HTTP_EXCEPTION)
    .with_code(422)
    .with_description(
        "The request was well-formed but was unable to be followed due to semantic errors.",
    );

pub static TOO_MANY_REQUESTS: ErrorClass = ErrorClass::new("TooManyRequests")
    .extends(&HTTP_EXCEPTION)
    .with_code(429)
    .with_description("This user has exceeded an allotted request count. Try again later.");

pub static INTERNAL_SERVER_ERROR: ErrorClass = ErrorClass::new("InternalServerError")
    .extends(&HTTP_EXCEPTION)
    .with_code(500)
    .with_description(
        "The server encountered an internal error and was unable to complete your request. \
         Either the server is overloaded or there is an error in the application.",
    );

pub static NOT_IMPLEMENTED: ErrorClass = ErrorClass::new("NotImplemented")
    .extends(&HTTP_EXCEPTION)
    .with_code(501)
    .with_description("The server does not support the action requested by the browser.");

pub static BAD_GATEWAY: ErrorClass = ErrorClass::new("BadGateway")
    .extends(&HTTP_EXCEPTION)
    .with_code(502)
    .with_description("The proxy server received an invalid response from an upstream server.");

pub static SERVICE_UNAVAILABLE: ErrorClass = ErrorClass::new("ServiceUnavailable")
    .extends(&HTTP_EXCEPTION)
    .with_code(503)
    .with_description(
        "The server is temporarily unable to service your request due to maintenance \
         downtime or capacity problems. Please try again later.",
    );

/// Internal routing control flow. Never handed to user error handlers.
pub static ROUTING_EXCEPTION: ErrorClass =
    ErrorClass::new("RoutingException").extends(&HTTP_EXCEPTION);

pub static REQUEST_REDIRECT: ErrorClass = ErrorClass::new("RequestRedirect")
    .extends(&ROUTING_EXCEPTION)
    .with_code(308)
    .with_description("The URL was redirected.");

/// Raised in debug mode instead of a redirect that would drop a request body.
pub static FORM_DATA_ROUTING_REDIRECT: ErrorClass =
    ErrorClass::new("FormDataRoutingRedirect").extends(&EXCEPTION);

/// A handler produced a value the response normalizer cannot convert.
pub static RESPONSE_SHAPE_ERROR: ErrorClass =
    ErrorClass::new("ResponseShapeError").extends(&EXCEPTION);

static HTTP_CLASSES: &[&ErrorClass] = &[
    &BAD_REQUEST,
    &UNAUTHORIZED,
    &FORBIDDEN,
    &NOT_FOUND,
    &METHOD_NOT_ALLOWED,
    &NOT_ACCEPTABLE,
    &REQUEST_TIMEOUT,
    &CONFLICT,
    &GONE,
    &PAYLOAD_TOO_LARGE,
    &UNSUPPORTED_MEDIA_TYPE,
    &UNPROCESSABLE_ENTITY,
    &TOO_MANY_REQUESTS,
    &INTERNAL_SERVER_ERROR,
    &NOT_IMPLEMENTED,
    &BAD_GATEWAY,
    &SERVICE_UNAVAILABLE,
];

// =============================================================================
// Error
// =============================================================================

/// An error raised while dispatching a request.
///
/// Every error carries a class. HTTP-level classes carry a status code and can
/// be rendered directly with [`Error::to_response`].
#[derive(Debug)]
pub struct Error {
    class: &'static ErrorClass,
    description: Option<String>,
    headers: HeaderMap,
    source: Option<BoxError>,
    original: Option<Arc<Error>>,
}

impl Error {
    /// Creates an error of the given class.
    pub fn new(class: &'static ErrorClass) -> Self {
        Self {
            class,
            description: None,
            headers: HeaderMap::new(),
            source: None,
            original: None,
        }
    }

    /// Wraps an arbitrary error as a generic application exception.
    pub fn internal(source: impl Into<BoxError>) -> Self {
        Self::new(&EXCEPTION).with_source(source)
    }

    /// Creates an error of the built-in class for `status`, falling back to
    /// `InternalServerError` for codes without one.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(ErrorClass::for_code(status.as_u16()).unwrap_or(&INTERNAL_SERVER_ERROR))
    }

    pub fn bad_request() -> Self {
        Self::new(&BAD_REQUEST)
    }

    /// A missing request key. `key` ends up in the description.
    pub fn bad_request_key(key: impl fmt::Display) -> Self {
        Self::new(&BAD_REQUEST_KEY_ERROR).with_description(format!("KeyError: '{key}'"))
    }

    pub fn not_found() -> Self {
        Self::new(&NOT_FOUND)
    }

    pub fn internal_server_error() -> Self {
        Self::new(&INTERNAL_SERVER_ERROR)
    }

    /// A `405` carrying the `Allow` header for the permitted methods.
    pub fn method_not_allowed(allowed: &[Method]) -> Self {
        let allow = allowed
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let mut error = Self::new(&METHOD_NOT_ALLOWED);
        if let Ok(value) = HeaderValue::from_str(&allow) {
            error.headers.insert(http::header::ALLOW, value);
        }
        error
    }

    /// A routing redirect to `location`.
    pub fn redirect(location: &str) -> Self {
        let mut error = Self::new(&REQUEST_REDIRECT)
            .with_description(format!("Redirecting to {location}"));
        if let Ok(value) = HeaderValue::from_str(location) {
            error.headers.insert(LOCATION, value);
        }
        error
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Drops a custom description, falling back to the class default.
    pub fn without_description(mut self) -> Self {
        self.description = None;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches the error this one was synthesized from.
    pub fn with_original(mut self, original: Arc<Error>) -> Self {
        self.original = Some(original);
        self
    }

    pub fn class(&self) -> &'static ErrorClass {
        self.class
    }

    /// Returns the status code this error carries, if any.
    pub fn code(&self) -> Option<StatusCode> {
        self.class
            .code()
            .and_then(|code| StatusCode::from_u16(code).ok())
    }

    pub fn is_a(&self, class: &ErrorClass) -> bool {
        self.class.is_a(class)
    }

    /// Returns `true` for errors that intrinsically describe an HTTP response.
    pub fn is_http(&self) -> bool {
        self.is_a(&HTTP_EXCEPTION)
    }

    /// Returns `true` for internal routing control flow such as redirects.
    pub fn is_routing(&self) -> bool {
        self.is_a(&ROUTING_EXCEPTION)
    }

    pub fn description(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or_else(|| self.class.description())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The error this one was synthesized from, e.g. the unhandled error behind
    /// a generic `500`.
    pub fn original(&self) -> Option<&Arc<Error>> {
        self.original.as_ref()
    }

    /// Renders this error as an HTML error page.
    ///
    /// Errors without a status code render as `500`; the description of a
    /// non-HTTP error is never leaked.
    pub fn to_response(&self) -> Response {
        let (status, description) = match self.code() {
            Some(status) if self.is_http() => (status, self.description()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                INTERNAL_SERVER_ERROR.description(),
            ),
        };
        let reason = status.canonical_reason().unwrap_or("Unknown Error");
        let body = format!(
            "<!doctype html>\n<html lang=en>\n<title>{code} {reason}</title>\n\
             <h1>{reason}</h1>\n<p>{description}</p>\n",
            code = status.as_u16(),
            description = escape_html(description),
        );

        let mut response = Response::new(status).with_body(body);
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        for (name, value) in &self.headers {
            response.headers_mut().insert(name.clone(), value.clone());
        }
        response
    }

    /// Formats the error and each of its causes, outermost first.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(status) if self.is_http() => write!(
                f,
                "{} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(self.class.name()),
                self.description()
            ),
            _ => match &self.description {
                Some(description) => write!(f, "{}: {description}", self.class.name()),
                None => f.write_str(self.class.name()),
            },
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Some(source) = &self.source {
            return Some(source.as_ref());
        }
        self.original
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

// =============================================================================
// Context Errors
// =============================================================================

/// Violations of context stack discipline. These are programming errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// No application context is active on this thread.
    #[error("working outside of application context")]
    NoAppContext,

    /// No request context is active on this thread.
    #[error("working outside of request context")]
    NoRequestContext,

    /// `pop` was called on an empty stack.
    #[error("cannot pop from an empty {stack} stack")]
    EmptyStack {
        /// Which stack was empty.
        stack: &'static str,
    },

    /// `pop` targeted a frame that is not the most recently pushed one.
    #[error("popped wrong {stack} context (expected {expected}, found {found})")]
    OutOfOrder {
        /// Which stack was affected.
        stack: &'static str,
        /// The frame the caller tried to pop.
        expected: String,
        /// The frame actually on top.
        found: String,
    },
}

// =============================================================================
// Response Shape Errors
// =============================================================================

/// Errors produced by the response normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseShapeError {
    /// The handler produced no value.
    #[error(
        "the handler did not return a valid response: it either returned nothing \
         or ended without producing a body"
    )]
    Empty,

    /// The status is neither a valid integer nor a string starting with one.
    #[error("invalid response status {0:?}")]
    InvalidStatus(String),

    /// A header name or value could not be represented.
    #[error("invalid response header {name:?}: {reason}")]
    InvalidHeader {
        /// Offending header name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The value has a shape handlers may not return.
    #[error("unsupported response value: {0}")]
    Unsupported(String),

    /// A mapping body failed to serialize.
    #[error("failed to serialize response body as JSON: {0}")]
    Json(String),
}

impl From<ResponseShapeError> for Error {
    fn from(err: ResponseShapeError) -> Self {
        Error::new(&RESPONSE_SHAPE_ERROR).with_source(err)
    }
}

/// Result type for context stack operations.
pub type ContextResult<T> = Result<T, ContextError>;

#[cfg(test)]
mod tests {
    use super::*;

    static APP_ERROR: ErrorClass = ErrorClass::new("AppError").extends(&EXCEPTION);
    static DB_ERROR: ErrorClass = ErrorClass::new("DbError").extends(&APP_ERROR);

    #[test]
    fn test_ancestor_walk_is_nearest_first() {
        let names: Vec<_> = DB_ERROR.ancestors().map(ErrorClass::name).collect();
        assert_eq!(names, ["DbError", "AppError", "Exception"]);
    }

    #[test]
    fn test_code_is_inherited() {
        assert_eq!(BAD_REQUEST_KEY_ERROR.code(), Some(400));
        assert_eq!(HTTP_EXCEPTION.code(), None);
        assert!(BAD_REQUEST_KEY_ERROR.is_a(&BAD_REQUEST));
        assert!(!BAD_REQUEST.is_a(&BAD_REQUEST_KEY_ERROR));
    }

    #[test]
    fn test_for_code_finds_builtin_class() {
        assert_eq!(ErrorClass::for_code(404), Some(&NOT_FOUND));
        assert_eq!(ErrorClass::for_code(299), None);
    }

    #[test]
    fn test_routing_errors_are_http() {
        let err = Error::redirect("/users/");
        assert!(err.is_http());
        assert!(err.is_routing());
        assert_eq!(err.code(), Some(StatusCode::PERMANENT_REDIRECT));

        let response = err.to_response();
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(response.headers()[LOCATION], "/users/");
    }

    #[test]
    fn test_non_http_error_renders_generic_500() {
        let err = Error::new(&DB_ERROR).with_description("password=hunter2");
        let response = err.to_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.text().contains("hunter2"));
    }

    #[test]
    fn test_chain_includes_sources() {
        let io = std::io::Error::other("disk on fire");
        let err = Error::internal(io);
        assert_eq!(err.chain(), "Exception: disk on fire");

        let wrapped = Error::internal_server_error().with_original(Arc::new(err));
        assert!(wrapped.chain().contains("disk on fire"));
    }

    #[test]
    fn test_method_not_allowed_sets_allow() {
        let err = Error::method_not_allowed(&[Method::GET, Method::HEAD]);
        assert_eq!(err.headers()[http::header::ALLOW], "GET, HEAD");
    }
}
