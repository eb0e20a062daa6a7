//! Tower service boundary.
//!
//! [`AppService`] lets any tower-based HTTP server drive an [`Application`].
//! Each call runs the synchronous engine on tokio's blocking pool, so the
//! per-thread context stacks are never shared between requests.
//!
//! ```rust,ignore
//! let svc = AppService::new(Arc::new(app));
//! let response = svc.oneshot(http::Request::new(Bytes::new())).await?;
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use tower::{BoxError, Service};

use ember_core::Request;

use crate::app::Application;

/// A tower [`Service`] dispatching `http` requests to an application.
///
/// Errors are an [`Escalation`](crate::Escalation) when the application
/// propagates exceptions, or a join error when the engine panicked.
#[derive(Debug, Clone)]
pub struct AppService {
    app: Arc<Application>,
}

impl AppService {
    pub fn new(app: Arc<Application>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }
}

impl From<Arc<Application>> for AppService {
    fn from(app: Arc<Application>) -> Self {
        AppService::new(app)
    }
}

impl Service<http::Request<Bytes>> for AppService {
    type Response = http::Response<Bytes>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<Bytes>) -> Self::Future {
        let app = self.app.clone();
        async move {
            let request = Request::from(request);
            let response = tokio::task::spawn_blocking(move || app.handle(request)).await??;
            Ok::<_, BoxError>(http::Response::from(response))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_oneshot_dispatches() {
        let mut app = Application::new("svc");
        app.route("/ping", || "pong").unwrap();
        let svc = AppService::new(Arc::new(app));

        let request = http::Request::get("/ping").body(Bytes::new()).unwrap();
        let response = svc.oneshot(request).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(&response.body()[..], b"pong");
    }
}
