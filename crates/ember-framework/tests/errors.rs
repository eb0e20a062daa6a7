//! Error handler lookup, trapping and unhandled-error recovery.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ember_core::error::{
    BAD_REQUEST, EXCEPTION, HTTP_EXCEPTION, NOT_FOUND, REQUEST_REDIRECT,
};
use ember_framework::prelude::*;

static TEAPOT_ERROR: ErrorClass = ErrorClass::new("TeapotError").extends(&EXCEPTION);
static EARL_GREY_ERROR: ErrorClass = ErrorClass::new("EarlGreyError").extends(&TEAPOT_ERROR);

fn config(f: impl FnOnce(&mut AppConfig)) -> AppConfig {
    let mut config = AppConfig::default();
    f(&mut config);
    config
}

#[test]
fn test_blueprint_handler_beats_global_handler() {
    let mut bp = Blueprint::new("tea").url_prefix("/tea");
    bp.route("/brew", || Err::<&str, _>(Error::new(&TEAPOT_ERROR)));
    bp.errorhandler(&TEAPOT_ERROR, |_: &Error| ("scoped", 418));

    let mut app = Application::new("errors");
    app.errorhandler(&TEAPOT_ERROR, |_: &Error| ("global", 418))
        .unwrap();
    app.register_blueprint(bp).unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/tea/brew")).unwrap();
    assert_eq!(response.status().as_u16(), 418);
    assert_eq!(response.text(), "scoped");
}

#[test]
fn test_handler_for_ancestor_class() {
    let mut app = Application::new("errors");
    app.route("/", || Err::<&str, _>(Error::new(&EARL_GREY_ERROR)))
        .unwrap();
    app.errorhandler(&TEAPOT_ERROR, |e: &Error| {
        format!("caught {}", e.class().name())
    })
    .unwrap();
    let app = Arc::new(app);

    assert_eq!(
        app.handle(Request::get("/")).unwrap().text(),
        "caught EarlGreyError"
    );
}

#[test]
fn test_code_handler_and_http_base_handler() {
    let mut app = Application::new("errors");
    app.route("/gone", || Err::<&str, _>(Error::from_status(StatusCode::GONE)))
        .unwrap();
    app.errorhandler_code(404, |_: &Error| ("no such page", 404))
        .unwrap();
    app.errorhandler(&HTTP_EXCEPTION, |e: &Error| {
        let status = e.code().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (format!("http {}", status.as_u16()), status)
    })
    .unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/missing")).unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text(), "no such page");

    let response = app.handle(Request::get("/gone")).unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(response.text(), "http 410");
}

#[test]
fn test_routing_redirect_never_reaches_handlers() {
    let mut app = Application::new("errors");
    app.route("/items/", || "items").unwrap();
    app.errorhandler(&HTTP_EXCEPTION, |_: &Error| "handled").unwrap();
    app.errorhandler(&REQUEST_REDIRECT, |_: &Error| "handled").unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/items")).unwrap();
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(response.headers()["location"], "/items/");
}

#[test]
fn test_unhandled_error_without_propagation() {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let mut app = Application::new("errors");
    app.route("/", || Err::<&str, _>(Error::internal("database is down")))
        .unwrap();
    {
        let teardowns = teardowns.clone();
        app.teardown_request(move |exc: Option<&Error>| {
            assert!(exc.is_some());
            teardowns.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    let app = Arc::new(app);

    let response = app.handle(Request::get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!response.text().contains("database is down"));
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_500_handler_sees_original_error() {
    let mut app = Application::new("errors");
    app.route("/", || Err::<&str, _>(Error::new(&TEAPOT_ERROR)))
        .unwrap();
    app.errorhandler_code(500, |e: &Error| {
        let original = e.original().map(|o| o.class().name()).unwrap_or("none");
        (format!("wrapped {original}"), 500)
    })
    .unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text(), "wrapped TeapotError");
}

#[test]
fn test_failing_500_handler_escalates() {
    let mut app = Application::new("errors");
    app.route("/", || Err::<&str, _>(Error::internal("first")))
        .unwrap();
    app.errorhandler_code(500, |_: &Error| Err::<&str, _>(Error::internal("second")))
        .unwrap();
    let app = Arc::new(app);

    let escalation = app.handle(Request::get("/")).unwrap_err();
    assert!(escalation.error().chain().contains("second"));
}

#[test]
fn test_finalize_failure_during_recovery_is_suppressed() {
    let mut app = Application::new("errors");
    app.route("/", || "fine").unwrap();
    app.after_request(|_: &RequestContext, _: Response| {
        Err::<Response, _>(Error::internal("after hook broke"))
    })
    .unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn test_trap_http_exceptions() {
    let mut app = Application::with_config(
        "errors",
        config(|c| {
            c.testing = true;
            c.trap_http_exceptions = true;
        }),
    );
    app.errorhandler_code(404, |_: &Error| "never").unwrap();
    let app = Arc::new(app);

    let escalation = app.handle(Request::get("/missing")).unwrap_err();
    assert!(escalation.error().is_a(&NOT_FOUND));
}

#[test]
fn test_bad_request_key_error() {
    fn needs_key() -> Result<&'static str, Error> {
        Err(Error::bad_request_key("name"))
    }

    let mut app = Application::new("errors");
    app.route("/", needs_key).unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!response.text().contains("KeyError: 'name'"));

    let mut app = Application::with_config("errors", config(|c| c.debug = true));
    app.route("/", needs_key).unwrap();
    let app = Arc::new(app);

    let escalation = app.handle(Request::get("/")).unwrap_err();
    assert!(escalation.error().is_a(&BAD_REQUEST));
    assert_eq!(escalation.error().description(), "KeyError: 'name'");
    ember_framework::current_request_context()
        .unwrap()
        .pop(None)
        .unwrap();

    let mut app = Application::with_config(
        "errors",
        config(|c| c.trap_bad_request_errors = Some(false)),
    );
    app.route("/", needs_key).unwrap();
    app.errorhandler(&BAD_REQUEST, |e: &Error| (e.description().to_string(), 400))
        .unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!response.text().contains("KeyError"));
}

#[test]
fn test_after_this_request_runs_again_during_recovery() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut app = Application::new("errors");
    {
        let calls = calls.clone();
        app.route("/", move |ctx: Arc<RequestContext>| {
            let calls = calls.clone();
            ctx.after_this_request(ember_framework::hooks::after_request_fn(
                move |_: &RequestContext, response: Response| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    response
                },
            ));
            "fine"
        })
        .unwrap();
    }
    app.after_request(|_: &RequestContext, _: Response| {
        Err::<Response, _>(Error::internal("after hook broke"))
    })
    .unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
