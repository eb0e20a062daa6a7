//! Blueprint scoping of routes and hooks.

use std::sync::Arc;

use parking_lot::Mutex;

use ember_framework::prelude::*;

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(log: &Log, entry: &str) {
    log.lock().push(entry.to_string());
}

fn app_with_blueprint(log: &Log) -> Arc<Application> {
    let mut admin = Blueprint::new("admin").url_prefix("/admin");
    admin.route("/", || "dashboard");
    {
        let log = log.clone();
        admin.before_request(move |_: &RequestContext| push(&log, "admin.before"));
    }
    {
        let log = log.clone();
        admin.after_request(move |_: &RequestContext, response: Response| {
            push(&log, "admin.after");
            response
        });
    }
    {
        let log = log.clone();
        admin.teardown_request(move |_: Option<&Error>| push(&log, "admin.teardown"));
    }
    {
        let log = log.clone();
        admin.before_app_request(move |_: &RequestContext| push(&log, "app-wide.before"));
    }

    let mut app = Application::new("blueprints");
    app.route("/", || "home").unwrap();
    {
        let log = log.clone();
        app.before_request(move |_: &RequestContext| push(&log, "global.before"))
            .unwrap();
    }
    {
        let log = log.clone();
        app.after_request(move |_: &RequestContext, response: Response| {
            push(&log, "global.after");
            response
        })
        .unwrap();
    }
    {
        let log = log.clone();
        app.teardown_request(move |_: Option<&Error>| push(&log, "global.teardown"))
            .unwrap();
    }
    app.register_blueprint(admin).unwrap();
    Arc::new(app)
}

#[test]
fn test_blueprint_hooks_only_run_for_its_routes() {
    let log = log();
    let app = app_with_blueprint(&log);

    assert_eq!(app.handle(Request::get("/")).unwrap().text(), "home");
    assert_eq!(
        *log.lock(),
        [
            "global.before",
            "app-wide.before",
            "global.after",
            "global.teardown"
        ]
    );
}

#[test]
fn test_blueprint_hook_order() {
    let log = log();
    let app = app_with_blueprint(&log);

    assert_eq!(app.handle(Request::get("/admin/")).unwrap().text(), "dashboard");
    assert_eq!(
        *log.lock(),
        [
            "global.before",
            "app-wide.before",
            "admin.before",
            "admin.after",
            "global.after",
            "admin.teardown",
            "global.teardown",
        ]
    );
}

#[test]
fn test_routing_failure_uses_global_scope() {
    let log = log();
    let app = app_with_blueprint(&log);

    let response = app.handle(Request::get("/admin/missing")).unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!log.lock().iter().any(|entry| entry.starts_with("admin.")));
}

#[test]
fn test_blueprint_current_context_names_blueprint() {
    let mut bp = Blueprint::new("api").url_prefix("/api/");
    bp.route("/users/<int:id>", |ctx: Arc<RequestContext>| {
        format!(
            "{} {}",
            ctx.endpoint().unwrap_or_default(),
            ctx.blueprint().unwrap_or_default()
        )
    });
    bp.route_with(
        "/status",
        RouteOptions::new().endpoint("health"),
        || "up",
    );

    let mut app = Application::new("blueprints");
    app.register_blueprint(bp).unwrap();
    let app = Arc::new(app);

    assert_eq!(
        app.handle(Request::get("/api/users/7")).unwrap().text(),
        "api./users/<int:id> api"
    );
    assert!(app.view_function("api.health").is_some());
    assert_eq!(app.handle(Request::get("/api/status")).unwrap().text(), "up");
}

#[test]
fn test_blueprint_url_value_preprocessor_is_scoped() {
    let mut bp = Blueprint::new("lang").url_prefix("/<lang>");
    bp.route("/hello", |args: ViewArgs| {
        format!("{} args", args.len())
    });
    bp.url_value_preprocessor(|_: Option<&str>, args: &mut ViewArgs| {
        args.remove("lang");
    });

    let mut app = Application::new("blueprints");
    app.route("/<page>/index", |args: ViewArgs| format!("{} args", args.len()))
        .unwrap();
    app.register_blueprint(bp).unwrap();
    let app = Arc::new(app);

    assert_eq!(app.handle(Request::get("/en/hello")).unwrap().text(), "0 args");
    assert_eq!(app.handle(Request::get("/x/index")).unwrap().text(), "1 args");
}
