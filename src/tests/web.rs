use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::{
    tests::{harness, DASHBOARD_URL},
    web,
};

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();

    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/message")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_save_then_list() {
    let h = harness().await;
    let app = web::router(h.engine.clone());

    let (status, body) = call(
        app.clone(),
        post(json!({"type": "SAVE_LINK", "payload": {"url": "https://example.com"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    let (status, links) = call(app.clone(), get("/api/links")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(links.as_array().unwrap().len(), 1);
    assert_eq!(links[0]["id"], body["linkId"]);

    let (_, queue) = call(app, get("/api/queue")).await;
    assert_eq!(queue["pending"].as_array().unwrap().len(), 1);
    assert_eq!(queue["pending"][0]["payload"]["type"], json!("UPSERT_LINK"));
    assert_eq!(queue["dropped"], json!(0));
}

#[tokio::test]
async fn test_message_without_reply_returns_null() {
    let h = harness().await;
    h.browser.open_tab("1", DASHBOARD_URL);
    let app = web::router(h.engine.clone());

    let (status, body) = call(app, post(json!({"type": "DATA_UPDATED"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_validation_error_over_http() {
    let h = harness().await;
    let app = web::router(h.engine.clone());

    let (status, body) = call(app, post(json!({"type": "SAVE_LINK", "payload": {}}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("ValidationError"));
}

#[tokio::test]
async fn test_ping_over_http() {
    let h = harness().await;
    let app = web::router(h.engine.clone());

    let (_, body) = call(app, post(json!({"action": "ping"}))).await;

    assert_eq!(body["status"], json!("ok"));
}
