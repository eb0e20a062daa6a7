//! Error handler lookup and the user-error state machine.
//!
//! ```text
//! error raised while dispatching
//!   ├── HTTP error, trapped ─────────────────────────────> unhandled
//!   ├── HTTP error, not trapped ─┬─ routing control flow ──> rendered as-is
//!   │                            ├─ handler found ─────────> handler result
//!   │                            └─ no handler ────────────> rendered as-is
//!   └── anything else ───────────┬─ handler found ─────────> handler result
//!                                └─ no handler ────────────> unhandled
//! ```
//!
//! Unhandled errors are turned into a generic 500 (or escalated) by the
//! engine in [`dispatch`](crate::dispatch).

use ember_core::error::{BAD_REQUEST, BAD_REQUEST_KEY_ERROR};
use ember_core::{Error, ResponseValue};

use crate::app::Application;
use crate::hooks::{ErrorHandlerFn, Scope};

impl Application {
    /// Finds the handler for `error` raised in `blueprint`'s scope.
    ///
    /// Lookup order, first match wins:
    ///
    /// 1. blueprint handler for the error's status code
    /// 2. global handler for the status code
    /// 3. blueprint handler for the error's class, nearest ancestor first
    /// 4. global handler for the class, nearest ancestor first
    pub fn find_error_handler(
        &self,
        blueprint: Option<&str>,
        error: &Error,
    ) -> Option<&ErrorHandlerFn> {
        let code = error.class().code();
        let named = blueprint.map(Scope::named);
        let global = Scope::Global;
        let lookups = [
            (named.as_ref(), code),
            (Some(&global), code),
            (named.as_ref(), None),
            (Some(&global), None),
        ];

        lookups
            .into_iter()
            .find_map(|(scope, code)| self.hooks().error_handler(scope?, code, error))
    }

    /// Whether `error` bypasses its handlers and escalates instead.
    pub fn trap_http_exception(&self, error: &Error) -> bool {
        let config = self.config();
        if config.trap_http_exceptions {
            return true;
        }
        match config.trap_bad_request_errors {
            None => config.debug && error.is_a(&BAD_REQUEST_KEY_ERROR),
            Some(trap) => trap && error.is_a(&BAD_REQUEST),
        }
    }

    /// Runs the handler for an HTTP error, or renders the error itself.
    ///
    /// Routing control flow such as slash redirects never reaches user
    /// handlers.
    pub fn handle_http_exception(
        &self,
        blueprint: Option<&str>,
        error: Error,
    ) -> Result<ResponseValue, Error> {
        if error.code().is_none() || error.is_routing() {
            return Ok(ResponseValue::Response(error.to_response()));
        }
        match self.find_error_handler(blueprint, &error) {
            Some(handler) => handler(&error),
            None => Ok(ResponseValue::Response(error.to_response())),
        }
    }

    /// Routes an error raised by a hook or handler.
    ///
    /// Returns the error back when nothing handles it.
    pub fn handle_user_exception(
        &self,
        blueprint: Option<&str>,
        error: Error,
    ) -> Result<ResponseValue, Error> {
        let mut error = error;
        if error.is_a(&BAD_REQUEST_KEY_ERROR)
            && !(self.debug() || self.config().trap_bad_request_errors == Some(true))
        {
            // The missing key is only shown while debugging.
            error = error.without_description();
        }

        if error.is_http() {
            if self.trap_http_exception(&error) {
                return Err(error);
            }
            return self.handle_http_exception(blueprint, error);
        }

        match self.find_error_handler(blueprint, &error) {
            Some(handler) => handler(&error),
            None => Err(error),
        }
    }
}
