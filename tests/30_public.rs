mod common;

use axum::http::{Method, StatusCode};

#[tokio::test]
async fn root_describes_service() {
    let res = common::send(Method::GET, "/", None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["success"], true);
    assert_eq!(res.body["data"]["name"], "Atlas");
    assert_eq!(res.body["data"]["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn health_reports_database_state() {
    let res = common::send(Method::GET, "/health", None).await;
    assert!(
        res.status == StatusCode::OK || res.status == StatusCode::SERVICE_UNAVAILABLE,
        "got {}",
        res.status
    );
    let expected = if res.status == StatusCode::OK { "ok" } else { "degraded" };
    assert_eq!(res.body["data"]["status"], expected);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let res = common::send(Method::GET, "/api/nope", None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}
