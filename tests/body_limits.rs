//! Body parsing and the request size cap.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use futures_util::{stream, StreamExt};
use portal_runtime::http::{body, HttpError};
use portal_runtime::{App, Flow};

use common::{post, send};

fn echo_app() -> App {
    let mut app = App::new();
    app.use_handler("/", body::json())
        .unwrap()
        .use_handler("/", body::urlencoded())
        .unwrap()
        .post("/echo", |req, res| {
            Box::pin(async move {
                res.json(&req.body)?;
                Ok(Flow::Done)
            })
        })
        .unwrap();
    app
}

#[tokio::test]
async fn test_json_and_form_bodies() {
    let app = echo_app();

    let request = post("/echo", "application/json", r#"{"email":"ana@example.com"}"#);
    let response = send(&app, request).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, r#"{"email":"ana@example.com"}"#);

    let response = send(
        &app,
        post("/echo", "application/x-www-form-urlencoded", "tag=a&tag=b"),
    )
    .await;
    assert_eq!(response.body, r#"{"tag":["a","b"]}"#);
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let app = echo_app();
    let response = send(&app, post("/echo", "application/json", "{\"email\":")).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body, "Bad Request");
}

#[tokio::test]
async fn test_oversized_body_is_413_and_closes() {
    let app = echo_app();
    let response = send(
        &app,
        post("/echo", "application/json", vec![b' '; 1_000_001]),
    )
    .await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.body, "Payload Too Large");
    assert_eq!(response.header("connection"), Some("close"));
}

#[tokio::test]
async fn test_oversized_stream_is_not_read_to_the_end() {
    let polled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&polled);
    let chunks = stream::iter(0..10).map(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<_, std::io::Error>(Bytes::from(vec![b' '; 400_000]))
    });

    let app = echo_app();
    let response = send(&app, post("/echo", "application/json", Body::from_stream(chunks))).await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.header("connection"), Some("close"));
    assert_eq!(polled.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_error_layer_sees_payload_too_large() {
    let mut app = App::new();
    app.use_handler("/", body::json().limit(8))
        .unwrap()
        .post("/echo", |_req, res| {
            Box::pin(async move {
                res.send("unreachable");
                Ok(Flow::Done)
            })
        })
        .unwrap()
        .use_error("/", |err, _req, res| {
            Box::pin(async move {
                let message = match err {
                    HttpError::PayloadTooLarge => "upload too big",
                    _ => "other",
                };
                res.status(StatusCode::PAYLOAD_TOO_LARGE).send(message);
                Ok(Flow::Done)
            })
        })
        .unwrap();

    let response = send(&app, post("/echo", "application/json", r#"{"a":"0123456789"}"#)).await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.body, "upload too big");
    assert_eq!(response.header("connection"), Some("close"));
}
