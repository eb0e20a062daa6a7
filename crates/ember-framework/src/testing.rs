//! In-process test client.

use std::sync::Arc;

use http::Method;

use ember_core::{Error, Request, Response};

use crate::app::Application;
use crate::dispatch::Escalation;

/// Drives [`Application::handle`] directly, without a transport.
///
/// With [`preserve_context`](Self::preserve_context) the request context of
/// each request stays pushed after dispatch, so it can be inspected through
/// [`current_request_context`](crate::current_request_context). It is popped
/// when the next request is pushed on the same thread.
#[derive(Debug, Clone)]
pub struct TestClient {
    app: Arc<Application>,
    preserve_context: bool,
}

impl TestClient {
    pub fn new(app: Arc<Application>) -> Self {
        Self {
            app,
            preserve_context: false,
        }
    }

    pub fn preserve_context(mut self, preserve: bool) -> Self {
        self.preserve_context = preserve;
        self
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    pub fn request(&self, request: Request) -> Result<Response, Escalation> {
        let request = request.preserve_context(self.preserve_context);
        self.app.handle(request)
    }

    pub fn open(&self, method: Method, target: &str) -> Result<Response, Escalation> {
        self.request(Request::new(method, target))
    }

    pub fn get(&self, target: &str) -> Result<Response, Escalation> {
        self.open(Method::GET, target)
    }

    pub fn head(&self, target: &str) -> Result<Response, Escalation> {
        self.open(Method::HEAD, target)
    }

    pub fn options(&self, target: &str) -> Result<Response, Escalation> {
        self.open(Method::OPTIONS, target)
    }

    pub fn delete(&self, target: &str) -> Result<Response, Escalation> {
        self.open(Method::DELETE, target)
    }

    /// Sends `body` as JSON. A body that fails to serialize is reported as
    /// an escalation without dispatching.
    pub fn post<T: serde::Serialize>(&self, target: &str, body: &T) -> Result<Response, Escalation> {
        self.request(json_request(Request::post(target), body)?)
    }

    /// Sends `body` as JSON.
    pub fn put<T: serde::Serialize>(&self, target: &str, body: &T) -> Result<Response, Escalation> {
        self.request(json_request(Request::put(target), body)?)
    }
}

fn json_request<T: serde::Serialize>(request: Request, body: &T) -> Result<Request, Escalation> {
    request
        .with_json(body)
        .map_err(|e| Escalation::new(Arc::new(Error::internal(e))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_unserializable_body_is_not_dispatched() {
        let mut app = Application::new("client");
        app.route_with(
            "/items",
            crate::RouteOptions::new().methods([Method::POST]),
            || "created",
        )
        .unwrap();
        let client = TestClient::new(Arc::new(app));

        let body = BTreeMap::from([(vec![1u8], 1u8)]);
        assert!(client.post("/items", &body).is_err());
        assert!(!client.app().got_first_request());

        let response = client.post("/items", &serde_json::json!({"ok": true})).unwrap();
        assert_eq!(response.text(), "created");
    }
}
