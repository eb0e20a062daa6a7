//! Handler argument extraction.
//!
//! Any type implementing [`FromRequest`] can be a handler parameter:
//!
//! ```rust,ignore
//! fn show_user(Path(id): Path<u64>, method: Method) -> String {
//!     format!("{method} user {id}")
//! }
//! ```

use std::sync::Arc;

use http::{HeaderMap, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use ember_core::error::EXCEPTION;
use ember_core::{Error, IntoResponseValue, Request, Response, ResponseShapeError, ResponseValue};

use crate::app::Application;
use crate::context::{AppContext, RequestContext, current_app_context, current_request_context};
use crate::routing::ViewArgs;

/// Types that can be extracted from the current request.
///
/// A failed extraction aborts the handler and goes through error handling
/// like any other error it could have raised.
pub trait FromRequest: Sized {
    fn from_request(ctx: &RequestContext) -> Result<Self, Error>;
}

impl<T: FromRequest> FromRequest for Option<T> {
    fn from_request(ctx: &RequestContext) -> Result<Self, Error> {
        Ok(T::from_request(ctx).ok())
    }
}

impl FromRequest for ViewArgs {
    fn from_request(ctx: &RequestContext) -> Result<Self, Error> {
        Ok(ctx.view_args().clone())
    }
}

impl FromRequest for Method {
    fn from_request(ctx: &RequestContext) -> Result<Self, Error> {
        Ok(ctx.request().method().clone())
    }
}

impl FromRequest for HeaderMap {
    fn from_request(ctx: &RequestContext) -> Result<Self, Error> {
        Ok(ctx.request().headers().clone())
    }
}

impl FromRequest for Arc<Request> {
    fn from_request(ctx: &RequestContext) -> Result<Self, Error> {
        Ok(ctx.request().clone())
    }
}

impl FromRequest for Arc<Application> {
    fn from_request(ctx: &RequestContext) -> Result<Self, Error> {
        Ok(ctx.app().clone())
    }
}

/// The current request context, taken from this thread's stack.
impl FromRequest for Arc<RequestContext> {
    fn from_request(_ctx: &RequestContext) -> Result<Self, Error> {
        current_request_context().map_err(Error::internal)
    }
}

impl FromRequest for Arc<AppContext> {
    fn from_request(_ctx: &RequestContext) -> Result<Self, Error> {
        current_app_context().map_err(Error::internal)
    }
}

/// Typed path parameters.
///
/// Deserializes all view args into `T`. When that fails and there is exactly
/// one view arg, its value alone is tried, so `Path<u64>` works for `/<int:id>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Path<T>(pub T);

impl<T: DeserializeOwned> FromRequest for Path<T> {
    fn from_request(ctx: &RequestContext) -> Result<Self, Error> {
        let args = ctx.view_args().clone().into_inner();
        let single = (args.len() == 1)
            .then(|| args.values().next().cloned())
            .flatten();
        match serde_json::from_value(Value::Object(args)) {
            Ok(value) => Ok(Path(value)),
            Err(err) => match single.map(serde_json::from_value) {
                Some(Ok(value)) => Ok(Path(value)),
                _ => Err(Error::new(&EXCEPTION)
                    .with_description("view arguments do not match the handler's Path type")
                    .with_source(err)),
            },
        }
    }
}

/// A JSON request body, or a JSON response.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> FromRequest for Json<T> {
    fn from_request(ctx: &RequestContext) -> Result<Self, Error> {
        ctx.request().json().map(Json)
    }
}

impl<T: Serialize> IntoResponseValue for Json<T> {
    fn into_response_value(self) -> Result<ResponseValue, Error> {
        let value = serde_json::to_value(&self.0)
            .map_err(|e| ResponseShapeError::Json(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(ResponseValue::Mapping(map)),
            Value::Array(list) => Ok(ResponseValue::List(list)),
            scalar => Ok(ResponseValue::adapted(move || {
                let mut body = serde_json::to_vec(&scalar)
                    .map_err(|e| ResponseShapeError::Json(e.to_string()))?;
                body.push(b'\n');
                Ok(Response::default()
                    .with_header(
                        http::header::CONTENT_TYPE,
                        http::HeaderValue::from_static("application/json"),
                    )
                    .with_body(body))
            })),
        }
    }
}
