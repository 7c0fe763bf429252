//! Session lifecycle through the full middleware stack.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::http::{Method, StatusCode};
use portal_runtime::config::SessionConfig;
use portal_runtime::http::{body, HttpError};
use portal_runtime::session::{cookie_parser, session, Session, SessionRecord};
use portal_runtime::{App, Flow, Request};
use serde_json::{Map, Value};
use tokio::sync::Notify;

use common::{get, get_with_cookie, post_form, request, send};

fn session_of(req: &mut Request) -> Result<&mut Session, HttpError> {
    req.session
        .as_mut()
        .ok_or_else(|| {
            HttpError::with_status(StatusCode::INTERNAL_SERVER_ERROR, "session middleware missing")
        })
}

/// A portal with a login form, a protected dashboard and a few session probes.
fn portal() -> App {
    let users: Arc<HashMap<String, String>> = Arc::new(HashMap::from([(
        "ana@example.com".to_string(),
        "hunter2".to_string(),
    )]));

    let mut app = App::new();
    app.use_handler("/", cookie_parser())
        .unwrap()
        .use_handler("/", session(SessionConfig::default()))
        .unwrap()
        .use_handler("/", body::urlencoded())
        .unwrap();

    app.post("/login", move |req, res| {
        let users = Arc::clone(&users);
        Box::pin(async move {
            let email = req.body["email"].as_str().unwrap_or_default().to_string();
            let password = req.body["password"].as_str().unwrap_or_default();
            if users.get(&email).map(String::as_str) != Some(password) {
                res.status(StatusCode::UNAUTHORIZED).send("Invalid credentials");
                return Ok(Flow::Done);
            }
            let session = session_of(req)?;
            session.regenerate();
            session.set("user", email);
            res.redirect("/dashboard");
            Ok(Flow::Done)
        })
    })
    .unwrap();

    app.get("/dashboard", |req, res| {
        Box::pin(async move {
            match req.session.as_ref().and_then(|s| s.get("user")).and_then(Value::as_str) {
                Some(user) => res.send(format!("Welcome {user}")),
                None => res.redirect("/login"),
            }
            Ok(Flow::Done)
        })
    })
    .unwrap();

    app.get("/whoami", |req, res| {
        Box::pin(async move {
            let user = req
                .session
                .as_ref()
                .and_then(|s| s.get_as::<String>("user"))
                .unwrap_or_else(|| "anonymous".to_string());
            res.send(user);
            Ok(Flow::Done)
        })
    })
    .unwrap();

    app.post("/note", |req, res| {
        Box::pin(async move {
            session_of(req)?.set("note", "hello");
            res.send_status(StatusCode::CREATED);
            Ok(Flow::Done)
        })
    })
    .unwrap();

    app.get("/touch", |req, res| {
        Box::pin(async move {
            let session = session_of(req)?;
            session.touch();
            session.touch();
            res.end();
            Ok(Flow::Done)
        })
    })
    .unwrap();

    app.post("/logout", |req, res| {
        Box::pin(async move {
            session_of(req)?.destroy();
            res.redirect("/login");
            Ok(Flow::Done)
        })
    })
    .unwrap();

    app
}

async fn login(app: &App) -> String {
    let response = send(app, post_form("/login", "email=ana%40example.com&password=hunter2")).await;
    assert_eq!(response.status, StatusCode::FOUND);
    response.cookie().expect("login issues a session cookie")
}

#[tokio::test]
async fn test_login_then_dashboard() {
    let app = portal();

    let login = post_form("/login", "email=ana%40example.com&password=hunter2");
    let response = send(&app, login).await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(response.header("location"), Some("/dashboard"));
    let set_cookies = response.set_cookies();
    assert_eq!(set_cookies.len(), 1);
    assert!(set_cookies[0].starts_with("sid="));
    assert!(set_cookies[0].ends_with("; Path=/; Max-Age=1800; HttpOnly"));

    let cookie = response.cookie().unwrap();
    let response = send(&app, get_with_cookie("/dashboard", &cookie)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, "Welcome ana@example.com");
    assert_eq!(app.runtime().sessions().len(), 1);
}

#[tokio::test]
async fn test_bad_credentials_issue_no_session() {
    let app = portal();
    let response = send(&app, post_form("/login", "email=ana%40example.com&password=wrong")).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(response.set_cookies().is_empty());
    assert!(app.runtime().sessions().is_empty());
}

#[tokio::test]
async fn test_anonymous_requests_emit_no_cookie() {
    let app = portal();
    for uri in ["/missing-route", "/whoami", "/dashboard"] {
        let response = send(&app, get(uri)).await;
        assert!(response.set_cookies().is_empty(), "{uri}");
    }
    assert!(app.runtime().sessions().is_empty());
}

#[tokio::test]
async fn test_touch_twice_emits_one_cookie() {
    let app = portal();
    let cookie = login(&app).await;

    let response = send(&app, get_with_cookie("/touch", &cookie)).await;
    let set_cookies = response.set_cookies();
    assert_eq!(set_cookies.len(), 1);
    assert!(set_cookies[0].starts_with(&format!("{cookie};")));
}

#[tokio::test]
async fn test_expired_session_is_absent() {
    let app = portal();
    let mut data = Map::new();
    data.insert("user".into(), "ana@example.com".into());
    app.runtime().sessions().insert(
        "stale".into(),
        SessionRecord {
            data,
            expires_at: SystemTime::now() - Duration::from_secs(1),
        },
    );

    let response = send(&app, get_with_cookie("/whoami", "sid=stale")).await;
    assert_eq!(response.body, "anonymous");
    assert!(response.set_cookies().is_empty());
    assert!(!app.runtime().sessions().contains("stale"));

    // A write after expiry starts a brand-new session.
    let response = send(&app, {
        let mut req = request(Method::POST, "/note");
        req.headers_mut().insert("cookie", "sid=stale".parse().unwrap());
        req
    })
    .await;
    assert_eq!(response.status, StatusCode::CREATED);
    let cookie = response.cookie().unwrap();
    assert!(cookie.starts_with("sid="));
    assert_ne!(cookie, "sid=stale");
    assert_eq!(cookie.len(), "sid=".len() + 32);
}

#[tokio::test]
async fn test_unknown_id_is_not_adopted() {
    let app = portal();
    let response = send(&app, {
        let mut req = request(Method::POST, "/note");
        req.headers_mut().insert("cookie", "sid=chosen-by-client".parse().unwrap());
        req
    })
    .await;
    let cookie = response.cookie().unwrap();
    assert_ne!(cookie, "sid=chosen-by-client");
    assert!(!app.runtime().sessions().contains("chosen-by-client"));
}

#[tokio::test]
async fn test_logout_expires_cookie() {
    let app = portal();
    let cookie = login(&app).await;

    let response = send(&app, {
        let mut req = request(Method::POST, "/logout");
        req.headers_mut().insert("cookie", cookie.parse().unwrap());
        req
    })
    .await;
    assert_eq!(response.set_cookies(), vec!["sid=; Path=/; Max-Age=0".to_string()]);
    assert!(app.runtime().sessions().is_empty());

    let response = send(&app, get_with_cookie("/dashboard", &cookie)).await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(response.header("location"), Some("/login"));
}

#[tokio::test]
async fn test_login_regenerates_id() {
    let app = portal();
    let first = login(&app).await;

    let response = send(&app, {
        let mut req = post_form("/login", "email=ana%40example.com&password=hunter2");
        req.headers_mut().insert("cookie", first.parse().unwrap());
        req
    })
    .await;
    let second = response.cookie().unwrap();
    assert_ne!(first, second);
    assert_eq!(app.runtime().sessions().len(), 1);
}

#[tokio::test]
async fn test_logout_during_slow_request_stays_logged_out() {
    let gate = Arc::new(Notify::new());
    let mut app = portal();
    let slow_gate = Arc::clone(&gate);
    app.get("/slow", move |req, res| {
        let gate = Arc::clone(&slow_gate);
        Box::pin(async move {
            gate.notified().await;
            let user = req.session.as_ref().and_then(|s| s.get_as::<String>("user"));
            res.send(user.unwrap_or_default());
            Ok(Flow::Done)
        })
    })
    .unwrap();
    let cookie = login(&app).await;

    let slow = send(&app, get_with_cookie("/slow", &cookie));
    let logout = async {
        let mut req = request(Method::POST, "/logout");
        req.headers_mut().insert("cookie", cookie.parse().unwrap());
        let response = send(&app, req).await;
        gate.notify_one();
        response
    };
    let (slow, logout) = tokio::join!(slow, logout);

    assert_eq!(logout.set_cookies(), vec!["sid=; Path=/; Max-Age=0".to_string()]);
    assert_eq!(slow.status, StatusCode::OK);
    assert!(slow.set_cookies().is_empty());
    assert!(app.runtime().sessions().is_empty());

    let response = send(&app, get_with_cookie("/dashboard", &cookie)).await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(response.header("location"), Some("/login"));
}

#[tokio::test]
async fn test_read_only_request_keeps_concurrent_write() {
    let gate = Arc::new(Notify::new());
    let mut app = portal();
    let slow_gate = Arc::clone(&gate);
    app.get("/slow", move |_req, res| {
        let gate = Arc::clone(&slow_gate);
        Box::pin(async move {
            gate.notified().await;
            res.end();
            Ok(Flow::Done)
        })
    })
    .unwrap();
    let cookie = login(&app).await;

    let slow = send(&app, get_with_cookie("/slow", &cookie));
    let note = async {
        let mut req = request(Method::POST, "/note");
        req.headers_mut().insert("cookie", cookie.parse().unwrap());
        let response = send(&app, req).await;
        gate.notify_one();
        response
    };
    let (_, note) = tokio::join!(slow, note);
    assert_eq!(note.status, StatusCode::CREATED);

    let id = cookie.trim_start_matches("sid=");
    let record = app.runtime().sessions().get(id).unwrap();
    assert_eq!(record.data["note"], "hello");
    assert_eq!(record.data["user"], "ana@example.com");
}
