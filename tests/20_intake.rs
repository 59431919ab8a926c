mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

#[tokio::test]
async fn intake_requires_contact_and_address() {
    let res = common::send(Method::POST, "/api/intake", Some(json!({ "first_name": "Dana" }))).await;
    common::assert_error(&res, StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE_ENTITY");
    let errors = &res.body["field_errors"];
    assert_eq!(errors["contact"], "email or phone is required");
    assert_eq!(errors["cats_address"], "is required");
}

#[tokio::test]
async fn intake_checks_email_and_cat_count() {
    let body = json!({
        "email": "not-an-email",
        "cats_address": "12 Orchard Ln, Petaluma CA",
        "cat_count_estimate": 501,
    });
    let res = common::send(Method::POST, "/api/intake", Some(body)).await;
    assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
    let errors = &res.body["field_errors"];
    assert_eq!(errors["email"], "must be a valid email address");
    assert_eq!(errors["cat_count_estimate"], "must be between 0 and 500");
    assert!(errors.get("contact").is_none());
}

#[tokio::test]
async fn intake_rejects_malformed_json() {
    let res = common::send_raw(Method::POST, "/api/intake", "application/json", "{not json").await;
    common::assert_error(&res, StatusCode::BAD_REQUEST, "INVALID_JSON");
}

#[tokio::test]
async fn intake_requires_json_content_type() {
    let res = common::send_raw(Method::POST, "/api/intake", "text/plain", "{}").await;
    common::assert_error(&res, StatusCode::BAD_REQUEST, "INVALID_JSON");
}

#[tokio::test]
async fn intake_queue_is_not_public() {
    let res = common::send(Method::GET, "/api/intake", None).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}
