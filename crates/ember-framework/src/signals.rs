//! Fire-and-forget notifications emitted during the request lifecycle.
//!
//! Listener failures are logged and never affect the response:
//!
//! ```rust,ignore
//! app.signals().request_finished.connect(|response| {
//!     tracing::info!(status = %response.status(), "finished");
//!     Ok(())
//! });
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use ember_core::{BoxError, Error, Request, Response};

use crate::context::AppContext;

type Listener<T> = Arc<dyn Fn(&T) -> Result<(), BoxError> + Send + Sync>;

/// A named notification point with any number of listeners.
pub struct Signal<T: ?Sized> {
    name: &'static str,
    listeners: RwLock<Vec<Listener<T>>>,
}

impl<T: ?Sized> Signal<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Adds a listener. Listeners are called in connection order.
    pub fn connect<F>(&self, listener: F)
    where
        F: Fn(&T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    pub fn receiver_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Notifies every listener. Errors and panics are logged and swallowed.
    pub fn send(&self, payload: &T) {
        // Snapshot so listeners may connect further listeners.
        let listeners: Vec<Listener<T>> = self.listeners.read().clone();
        for listener in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(signal = self.name, "Signal receiver failed: {e}"),
                Err(panic) => warn!(
                    signal = self.name,
                    "Signal receiver panicked: {}",
                    panic_message(panic.as_ref())
                ),
            }
        }
    }
}

impl<T: ?Sized> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("receivers", &self.receiver_count())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

/// Every signal an application emits.
#[derive(Debug)]
pub struct Signals {
    /// Before any request processing, once the context is set up.
    pub request_started: Signal<Request>,
    /// After the response is finalized.
    pub request_finished: Signal<Response>,
    /// When the request context pops, after teardown hooks.
    pub request_tearing_down: Signal<Option<Arc<Error>>>,
    /// When the application context pops, after its teardown hooks.
    pub appcontext_tearing_down: Signal<Option<Arc<Error>>>,
    pub appcontext_pushed: Signal<AppContext>,
    pub appcontext_popped: Signal<AppContext>,
    /// An error reached unhandled-error processing.
    pub got_request_exception: Signal<Error>,
}

impl Default for Signals {
    fn default() -> Self {
        Self {
            request_started: Signal::new("request-started"),
            request_finished: Signal::new("request-finished"),
            request_tearing_down: Signal::new("request-tearing-down"),
            appcontext_tearing_down: Signal::new("appcontext-tearing-down"),
            appcontext_pushed: Signal::new("appcontext-pushed"),
            appcontext_popped: Signal::new("appcontext-popped"),
            got_request_exception: Signal::new("got-request-exception"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_failing_receivers_are_isolated() {
        let signal: Signal<u32> = Signal::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        signal.connect(|_| Err("broken".into()));
        signal.connect(|_| panic!("receiver exploded"));
        let c = calls.clone();
        signal.connect(move |n| {
            c.fetch_add(*n as usize, Ordering::SeqCst);
            Ok(())
        });

        signal.send(&3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(signal.receiver_count(), 3);
    }
}
