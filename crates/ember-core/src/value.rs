//! Handler return values.
//!
//! Handlers may return any type implementing [`IntoResponseValue`]. The result
//! is a closed [`ResponseValue`] that the [`Normalizer`](crate::Normalizer)
//! turns into a [`Response`].
//!
//! ```rust,ignore
//! fn created() -> (&'static str, u16) {
//!     ("created", 201)
//! }
//!
//! fn with_headers() -> (&'static str, u16, [(&'static str, &'static str); 1]) {
//!     ("hello", 200, [("X-Greeting", "1")])
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bytes::Bytes;
use http::StatusCode;
use serde_json::{Map, Value};

use crate::error::{Error, ResponseShapeError};
use crate::response::Response;

/// Header pairs as given by a handler.
pub type HeaderList = Vec<(String, String)>;

/// A status as given by a handler: a bare code or a status line such as
/// `"404 Not Found"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Code(u16),
    Line(String),
}

/// The second element of a pair, which is either a status or headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOrHeaders {
    Status(Status),
    Headers(HeaderList),
}

/// Converts a foreign response-like object into a [`Response`].
pub trait ResponseAdapter: Send {
    fn adapt(self: Box<Self>) -> Result<Response, ResponseShapeError>;
}

impl<F> ResponseAdapter for F
where
    F: FnOnce() -> Result<Response, ResponseShapeError> + Send,
{
    fn adapt(self: Box<Self>) -> Result<Response, ResponseShapeError> {
        (*self)()
    }
}

/// Every shape a handler result may take.
pub enum ResponseValue {
    /// No value. Always rejected by the normalizer.
    Empty,
    Text(String),
    Bytes(Bytes),
    /// Serialized as a JSON object.
    Mapping(Map<String, Value>),
    /// Serialized as a JSON array.
    List(Vec<Value>),
    Response(Response),
    Pair(Box<ResponseValue>, StatusOrHeaders),
    Triple(Box<ResponseValue>, Status, HeaderList),
    Adapted(Box<dyn ResponseAdapter>),
}

impl ResponseValue {
    /// Wraps a custom conversion.
    pub fn adapted<F>(adapter: F) -> Self
    where
        F: FnOnce() -> Result<Response, ResponseShapeError> + Send + 'static,
    {
        Self::Adapted(Box::new(adapter))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "Empty",
            Self::Text(_) => "Text",
            Self::Bytes(_) => "Bytes",
            Self::Mapping(_) => "Mapping",
            Self::List(_) => "List",
            Self::Response(_) => "Response",
            Self::Pair(..) => "Pair",
            Self::Triple(..) => "Triple",
            Self::Adapted(_) => "Adapted",
        }
    }
}

impl fmt::Debug for ResponseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            Self::Mapping(map) => f.debug_tuple("Mapping").field(map).finish(),
            Self::List(list) => f.debug_tuple("List").field(list).finish(),
            Self::Response(response) => f.debug_tuple("Response").field(response).finish(),
            Self::Pair(body, tail) => f.debug_tuple("Pair").field(body).field(tail).finish(),
            Self::Triple(body, status, headers) => f
                .debug_tuple("Triple")
                .field(body)
                .field(status)
                .field(headers)
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}

// =============================================================================
// IntoResponseValue
// =============================================================================

/// Conversion from a handler's return type into a [`ResponseValue`].
pub trait IntoResponseValue {
    fn into_response_value(self) -> Result<ResponseValue, Error>;
}

macro_rules! impl_into_value {
    ($($ty:ty => |$v:ident| $body:expr;)*) => {
        $(
            impl IntoResponseValue for $ty {
                fn into_response_value(self) -> Result<ResponseValue, Error> {
                    let $v = self;
                    Ok($body)
                }
            }
        )*
    };
}

impl_into_value! {
    ResponseValue => |v| v;
    () => |_v| ResponseValue::Empty;
    String => |v| ResponseValue::Text(v);
    &'static str => |v| ResponseValue::Text(v.to_string());
    Vec<u8> => |v| ResponseValue::Bytes(Bytes::from(v));
    Bytes => |v| ResponseValue::Bytes(v);
    &'static [u8] => |v| ResponseValue::Bytes(Bytes::from_static(v));
    Response => |v| ResponseValue::Response(v);
    Map<String, Value> => |v| ResponseValue::Mapping(v);
    Vec<Value> => |v| ResponseValue::List(v);
    http::Response<Bytes> => |v| ResponseValue::Response(Response::from(v));
}

impl IntoResponseValue for Value {
    fn into_response_value(self) -> Result<ResponseValue, Error> {
        match self {
            Value::Object(map) => Ok(ResponseValue::Mapping(map)),
            Value::Array(list) => Ok(ResponseValue::List(list)),
            Value::String(text) => Ok(ResponseValue::Text(text)),
            Value::Null => Ok(ResponseValue::Empty),
            other => Err(ResponseShapeError::Unsupported(format!(
                "a bare JSON {} cannot be a response body",
                json_kind(&other)
            ))
            .into()),
        }
    }
}

impl<T: IntoResponseValue> IntoResponseValue for Option<T> {
    fn into_response_value(self) -> Result<ResponseValue, Error> {
        match self {
            Some(value) => value.into_response_value(),
            None => Ok(ResponseValue::Empty),
        }
    }
}

impl<T, E> IntoResponseValue for Result<T, E>
where
    T: IntoResponseValue,
    E: Into<Error>,
{
    fn into_response_value(self) -> Result<ResponseValue, Error> {
        self.map_err(Into::into)?.into_response_value()
    }
}

impl<B, T> IntoResponseValue for (B, T)
where
    B: IntoResponseValue,
    T: IntoPairTail,
{
    fn into_response_value(self) -> Result<ResponseValue, Error> {
        let body = self.0.into_response_value()?;
        Ok(ResponseValue::Pair(Box::new(body), self.1.into_pair_tail()))
    }
}

impl<B, S, H> IntoResponseValue for (B, S, H)
where
    B: IntoResponseValue,
    S: IntoStatus,
    H: IntoHeaderList,
{
    fn into_response_value(self) -> Result<ResponseValue, Error> {
        let body = self.0.into_response_value()?;
        Ok(ResponseValue::Triple(
            Box::new(body),
            self.1.into_status(),
            self.2.into_header_list(),
        ))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Status and header conversions
// =============================================================================

/// Types usable as a response status.
pub trait IntoStatus {
    fn into_status(self) -> Status;
}

/// Types usable as response headers.
pub trait IntoHeaderList {
    fn into_header_list(self) -> HeaderList;
}

/// Types usable as the second element of a `(body, _)` pair.
///
/// Header-like values become headers; everything else is a status.
pub trait IntoPairTail {
    fn into_pair_tail(self) -> StatusOrHeaders;
}

macro_rules! impl_status_int {
    ($($ty:ty),*) => {
        $(
            impl IntoStatus for $ty {
                fn into_status(self) -> Status {
                    Status::Code(u16::try_from(self).unwrap_or(0))
                }
            }

            impl IntoPairTail for $ty {
                fn into_pair_tail(self) -> StatusOrHeaders {
                    StatusOrHeaders::Status(self.into_status())
                }
            }
        )*
    };
}

impl_status_int!(u16, u32, u64, usize, i32, i64);

impl IntoStatus for StatusCode {
    fn into_status(self) -> Status {
        Status::Code(self.as_u16())
    }
}

impl IntoStatus for String {
    fn into_status(self) -> Status {
        Status::Line(self)
    }
}

impl IntoStatus for &str {
    fn into_status(self) -> Status {
        Status::Line(self.to_string())
    }
}

impl IntoStatus for Status {
    fn into_status(self) -> Status {
        self
    }
}

macro_rules! impl_pair_tail_status {
    ($($ty:ty),*) => {
        $(
            impl IntoPairTail for $ty {
                fn into_pair_tail(self) -> StatusOrHeaders {
                    StatusOrHeaders::Status(self.into_status())
                }
            }
        )*
    };
}

impl_pair_tail_status!(StatusCode, String, &str, Status);

impl<K: Into<String>, V: Into<String>> IntoHeaderList for Vec<(K, V)> {
    fn into_header_list(self) -> HeaderList {
        self.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> IntoHeaderList for [(K, V); N] {
    fn into_header_list(self) -> HeaderList {
        self.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
    }
}

impl<K: Into<String>, V: Into<String>> IntoHeaderList for HashMap<K, V> {
    fn into_header_list(self) -> HeaderList {
        self.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
    }
}

impl<K: Into<String>, V: Into<String>> IntoHeaderList for BTreeMap<K, V> {
    fn into_header_list(self) -> HeaderList {
        self.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
    }
}

impl IntoHeaderList for http::HeaderMap {
    fn into_header_list(self) -> HeaderList {
        self.iter()
            .filter_map(|(name, value)| {
                Some((name.as_str().to_string(), value.to_str().ok()?.to_string()))
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> IntoPairTail for Vec<(K, V)> {
    fn into_pair_tail(self) -> StatusOrHeaders {
        StatusOrHeaders::Headers(self.into_header_list())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> IntoPairTail for [(K, V); N] {
    fn into_pair_tail(self) -> StatusOrHeaders {
        StatusOrHeaders::Headers(self.into_header_list())
    }
}

impl<K: Into<String>, V: Into<String>> IntoPairTail for HashMap<K, V> {
    fn into_pair_tail(self) -> StatusOrHeaders {
        StatusOrHeaders::Headers(self.into_header_list())
    }
}

impl<K: Into<String>, V: Into<String>> IntoPairTail for BTreeMap<K, V> {
    fn into_pair_tail(self) -> StatusOrHeaders {
        StatusOrHeaders::Headers(self.into_header_list())
    }
}

impl IntoPairTail for http::HeaderMap {
    fn into_pair_tail(self) -> StatusOrHeaders {
        StatusOrHeaders::Headers(self.into_header_list())
    }
}
