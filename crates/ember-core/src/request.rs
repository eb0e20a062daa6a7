//! The incoming request as seen by the dispatch engine.

use bytes::Bytes;
use http::header::{HOST, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;

use crate::error::Error;

/// An incoming HTTP request.
///
/// Requests are immutable once a request context has been pushed for them.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    preserve_context: bool,
}

impl Request {
    /// Creates a request for `target`, which may include a query string.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        let path = if path.is_empty() { "/" } else { path };
        Self {
            method,
            path: path.to_string(),
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            preserve_context: false,
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: &str) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn put(target: &str) -> Self {
        Self::new(Method::PUT, target)
    }

    pub fn delete(target: &str) -> Self {
        Self::new(Method::DELETE, target)
    }

    pub fn head(target: &str) -> Self {
        Self::new(Method::HEAD, target)
    }

    pub fn options(target: &str) -> Self {
        Self::new(Method::OPTIONS, target)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_host(self, host: &str) -> Self {
        match HeaderValue::from_str(host) {
            Ok(value) => self.with_header(HOST, value),
            Err(_) => self,
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `value` as the JSON body and sets `Content-Type`.
    pub fn with_json<T: serde::Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .with_header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .with_body(body))
    }

    /// Asks the request context to stay on the stack after an unhandled error.
    pub fn preserve_context(mut self, preserve: bool) -> Self {
        self.preserve_context = preserve;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The `Host` header without a port.
    pub fn host(&self) -> Option<&str> {
        let host = self.headers.get(HOST)?.to_str().ok()?;
        Some(host.split(':').next().unwrap_or(host))
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn wants_preserved_context(&self) -> bool {
        self.preserve_context
    }

    /// Decodes the body as JSON, failing with `400 Bad Request`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(|err| {
            Error::bad_request()
                .with_description(format!("Failed to decode JSON object: {err}"))
                .with_source(err)
        })
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let mut out = Request::new(parts.method, target);
        out.headers = parts.headers;
        if out.host().is_none()
            && let Some(authority) = parts.uri.authority()
            && let Ok(value) = HeaderValue::from_str(authority.host())
        {
            out.headers.insert(HOST, value);
        }
        out.body = body;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_is_split_from_path() {
        let request = Request::get("/search?q=ember");
        assert_eq!(request.path(), "/search");
        assert_eq!(request.query(), Some("q=ember"));
    }

    #[test]
    fn test_host_strips_port() {
        let request = Request::get("/").with_host("example.com:8080");
        assert_eq!(request.host(), Some("example.com"));
    }

    #[test]
    fn test_bad_json_is_400() {
        let request = Request::post("/").with_body("{not json");
        let err = request.json::<serde_json::Value>().unwrap_err();
        assert_eq!(err.code(), Some(http::StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_with_json_sets_body_and_reports_failures() {
        let request = Request::post("/").with_json(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(request.body().as_ref(), br#"{"a":1}"#);
        assert_eq!(
            request.headers()[http::header::CONTENT_TYPE],
            "application/json"
        );

        let unkeyable = std::collections::BTreeMap::from([(vec![1u8], 1u8)]);
        assert!(Request::post("/").with_json(&unkeyable).is_err());
    }

    #[test]
    fn test_from_http_request() {
        let http = http::Request::builder()
            .method(Method::PUT)
            .uri("http://api.example.com/items/3?x=1")
            .body(Bytes::from_static(b"data"))
            .unwrap();
        let request = Request::from(http);
        assert_eq!(request.method(), Method::PUT);
        assert_eq!(request.path(), "/items/3");
        assert_eq!(request.query(), Some("x=1"));
        assert_eq!(request.host(), Some("api.example.com"));
        assert_eq!(request.body().as_ref(), b"data");
    }
}
