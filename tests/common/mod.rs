#![allow(dead_code)]

pub mod db;

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Drive the full router in-process
pub async fn send(method: Method, uri: &str, body: Option<Value>) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    dispatch(builder.body(body).expect("request builds")).await
}

/// Raw body with an explicit content type, for malformed-input cases
pub async fn send_raw(method: Method, uri: &str, content_type: &str, body: &str) -> TestResponse {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body.to_string()))
        .expect("request builds");
    dispatch(request).await
}

pub async fn send_with_token(method: Method, uri: &str, token: &str) -> TestResponse {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .expect("request builds");
    dispatch(request).await
}

async fn dispatch(request: Request<Body>) -> TestResponse {
    let response = atlas::app().oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    TestResponse { status, headers, body }
}

pub fn assert_error(response: &TestResponse, status: StatusCode, code: &str) {
    assert_eq!(response.status, status, "unexpected status, body: {}", response.body);
    assert_eq!(response.body["error"], Value::Bool(true), "body: {}", response.body);
    assert_eq!(response.body["code"], code, "body: {}", response.body);
}
