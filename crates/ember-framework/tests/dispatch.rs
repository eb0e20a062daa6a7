//! Routing, hooks and response shaping through `handle`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};

use ember_core::error::RESPONSE_SHAPE_ERROR;
use ember_framework::hooks::after_request_fn;
use ember_framework::prelude::*;
use ember_framework::{Session, SessionInterface};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[test]
fn test_after_request_hooks_run_in_reverse() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut app = Application::new("dispatch");
    app.route("/", || "ok").unwrap();
    for name in ["h1", "h2", "h3"] {
        let order = order.clone();
        app.after_request(move |_: &RequestContext, response: Response| {
            order.lock().push(name);
            response
        })
        .unwrap();
    }
    let app = Arc::new(app);

    app.handle(Request::get("/")).unwrap();
    assert_eq!(*order.lock(), ["h3", "h2", "h1"]);
}

#[test]
fn test_after_this_request_runs_before_app_hooks() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut app = Application::new("dispatch");
    {
        let order = order.clone();
        app.route("/", move |ctx: Arc<RequestContext>| {
            for name in ["r1", "r2"] {
                let order = order.clone();
                ctx.after_this_request(after_request_fn(
                    move |_: &RequestContext, response: Response| {
                        order.lock().push(name);
                        response
                    },
                ));
            }
            "ok"
        })
        .unwrap();
    }
    {
        let order = order.clone();
        app.after_request(move |_: &RequestContext, response: Response| {
            order.lock().push("app");
            response
        })
        .unwrap();
    }
    let app = Arc::new(app);

    app.handle(Request::get("/")).unwrap();
    assert_eq!(*order.lock(), ["r2", "r1", "app"]);
}

#[test]
fn test_after_request_can_replace_response() {
    let mut app = Application::new("dispatch");
    app.route("/", || "original").unwrap();
    app.after_request(|_: &RequestContext, response: Response| {
        response
            .with_status(StatusCode::ACCEPTED)
            .with_header("x-hooked".parse().unwrap(), HeaderValue::from_static("yes"))
    })
    .unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers()["x-hooked"], "yes");
    assert_eq!(response.text(), "original");
}

#[test]
fn test_json_mapping_round_trip() {
    let mut app = Application::new("dispatch");
    app.route("/", || json!({"a": 1})).unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.content_type(), Some("application/json"));
    assert_eq!(response.json::<Value>().unwrap(), json!({"a": 1}));
}

#[test]
fn test_body_and_status_tuple() {
    let mut app = Application::new("dispatch");
    app.route("/", || ("created", 201)).unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.text(), "created");
}

#[test]
fn test_empty_result_is_a_shape_error() {
    let mut app = Application::with_config(
        "dispatch",
        AppConfig {
            testing: true,
            ..AppConfig::default()
        },
    );
    app.route("/", || None::<&str>).unwrap();
    let app = Arc::new(app);

    let escalation = app.handle(Request::get("/")).unwrap_err();
    assert!(escalation.error().is_a(&RESPONSE_SHAPE_ERROR));
}

#[test]
fn test_unknown_path_is_404_without_calling_handlers() {
    let calls = counter();
    let mut app = Application::new("dispatch");
    {
        let calls = calls.clone();
        app.route("/", move || {
            calls.fetch_add(1, Ordering::SeqCst);
            "index"
        })
        .unwrap();
    }
    let app = Arc::new(app);

    let response = app.handle(Request::get("/missing")).unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_wrong_method_is_405_with_allow() {
    let mut app = Application::new("dispatch");
    app.route("/", || "index").unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::delete("/")).unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        response.allow(),
        vec![Method::GET, Method::HEAD, Method::OPTIONS]
    );
}

#[test]
fn test_automatic_options_skips_the_handler() {
    let calls = counter();
    let mut app = Application::new("dispatch");
    {
        let calls = calls.clone();
        app.route("/", move || {
            calls.fetch_add(1, Ordering::SeqCst);
            "index"
        })
        .unwrap();
    }
    let app = Arc::new(app);

    let response = app.handle(Request::options("/")).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.allow(),
        vec![Method::GET, Method::HEAD, Method::OPTIONS]
    );
    assert!(response.body().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_explicit_options_handler_is_called() {
    let mut app = Application::new("dispatch");
    app.route_with(
        "/",
        RouteOptions::new().methods([Method::GET, Method::OPTIONS]),
        |method: Method| format!("handled {method}"),
    )
    .unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::options("/")).unwrap();
    assert_eq!(response.text(), "handled OPTIONS");
}

#[test]
fn test_before_request_short_circuits() {
    let calls = counter();
    let after = counter();
    let mut app = Application::new("dispatch");
    {
        let calls = calls.clone();
        app.route("/", move || {
            calls.fetch_add(1, Ordering::SeqCst);
            "index"
        })
        .unwrap();
    }
    app.before_request(|_: &RequestContext| ()).unwrap();
    app.before_request(|_: &RequestContext| ("blocked", 403)).unwrap();
    {
        let after = after.clone();
        app.after_request(move |_: &RequestContext, response: Response| {
            after.fetch_add(1, Ordering::SeqCst);
            response
        })
        .unwrap();
    }
    let app = Arc::new(app);

    let response = app.handle(Request::get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.text(), "blocked");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

#[test]
fn test_url_value_preprocessor_rewrites_view_args() {
    let mut app = Application::new("dispatch");
    app.route("/<lang>/page", |args: ViewArgs| {
        format!("{}", args.get("language").cloned().unwrap_or(Value::Null))
    })
    .unwrap();
    app.url_value_preprocessor(|endpoint: Option<&str>, args: &mut ViewArgs| {
        assert!(endpoint.is_some());
        if let Some(Value::String(lang)) = args.remove("lang") {
            args.insert("language".into(), Value::String(lang.to_uppercase()));
        }
    })
    .unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/en/page")).unwrap();
    assert_eq!(response.text(), "\"EN\"");
}

#[test]
fn test_extractors() {
    let mut app = Application::new("dispatch");
    app.route("/users/<int:id>", |Path(id): Path<u64>| format!("user {id}"))
        .unwrap();
    app.route_with(
        "/echo",
        RouteOptions::new().methods([Method::POST]),
        |Json(body): Json<Value>| Json(json!({ "echo": body })),
    )
    .unwrap();
    let app = Arc::new(app);
    let client = app.test_client();

    assert_eq!(client.get("/users/42").unwrap().text(), "user 42");
    assert_eq!(
        client.get("/users/abc").unwrap().status(),
        StatusCode::NOT_FOUND
    );

    let response = client.post("/echo", &json!({"x": 1})).unwrap();
    assert_eq!(response.json::<Value>().unwrap(), json!({"echo": {"x": 1}}));

    let response = app
        .handle(Request::post("/echo").with_body("not json"))
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[test]
fn test_head_is_answered_by_get_handler() {
    let mut app = Application::new("dispatch");
    app.route("/", |method: Method| method.to_string()).unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::head("/")).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text(), "HEAD");
}

struct HeaderSessions;

impl SessionInterface for HeaderSessions {
    fn open_session(&self, _app: &Application, request: &Request) -> Option<Session> {
        let data: serde_json::Map<String, Value> = request
            .headers()
            .get("x-session")
            .and_then(|v| serde_json::from_slice(v.as_bytes()).ok())
            .unwrap_or_default();
        Some(Session::from_data(data))
    }

    fn save_session(
        &self,
        _app: &Application,
        session: &Session,
        response: &mut Response,
    ) -> Result<(), Error> {
        let data = serde_json::to_string(session.data()).map_err(Error::internal)?;
        let value = HeaderValue::from_str(&data).map_err(Error::internal)?;
        response.headers_mut().insert("x-session", value);
        Ok(())
    }
}

#[test]
fn test_session_is_saved_only_when_not_empty() {
    let mut app = Application::new("dispatch");
    app.set_session_interface(HeaderSessions).unwrap();
    app.route("/login", |ctx: Arc<RequestContext>| {
        ctx.session().insert("user", "ann");
        "logged in"
    })
    .unwrap();
    app.route("/anonymous", || "hello").unwrap();
    app.route("/whoami", |ctx: Arc<RequestContext>| {
        ctx.session()
            .get("user")
            .and_then(Value::as_str)
            .unwrap_or("nobody")
            .to_string()
    })
    .unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/login")).unwrap();
    let cookie = response.headers()["x-session"].clone();
    assert_eq!(cookie, r#"{"user":"ann"}"#);

    let response = app.handle(Request::get("/anonymous")).unwrap();
    assert!(response.headers().get("x-session").is_none());

    let response = app
        .handle(Request::get("/whoami").with_header("x-session".parse().unwrap(), cookie))
        .unwrap();
    assert_eq!(response.text(), "ann");
}

#[test]
fn test_json_pretty_print_setting() {
    let mut app = Application::with_config(
        "dispatch",
        AppConfig {
            json_pretty_print: true,
            ..AppConfig::default()
        },
    );
    app.route("/", || json!({"a": 1})).unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/")).unwrap();
    assert_eq!(response.text(), "{\n  \"a\": 1\n}\n");
}

#[test]
fn test_slash_redirect_requires_matching_method() {
    let mut app = Application::new("dispatch");
    app.route_with(
        "/items/",
        RouteOptions::new().methods([Method::POST]),
        || "created",
    )
    .unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/items")).unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.allow(), vec![Method::OPTIONS, Method::POST]);

    let response = app.handle(Request::post("/items")).unwrap();
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(response.headers()["location"], "/items/");
}

#[test]
fn test_url_value_preprocessor_can_read_context_args() {
    let mut app = Application::new("dispatch");
    app.route("/<lang>/page", |args: ViewArgs| format!("{} args", args.len()))
        .unwrap();
    app.url_value_preprocessor(|_: Option<&str>, args: &mut ViewArgs| {
        let ctx = ember_framework::current_request_context().unwrap();
        let seen = ctx.view_args().len();
        args.insert("seen".into(), Value::from(seen));
    })
    .unwrap();
    let app = Arc::new(app);

    let response = app.handle(Request::get("/en/page")).unwrap();
    assert_eq!(response.text(), "2 args");
}
