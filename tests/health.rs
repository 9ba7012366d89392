mod common;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
};
use storefront_payments::routes::health::health_check;

#[tokio::test]
async fn health_check_returns_ok() {
    let app = common::setup().await;
    let response = health_check(State(app.state.clone())).await;
    assert_eq!(response.0.message, "Health check");

    let data = response.0.data.expect("health data");
    assert_eq!(data.status, "ok");
    assert_eq!(data.database, "up");
}

#[tokio::test]
async fn health_route_and_request_id() {
    let app = common::setup().await;
    let response = tower::ServiceExt::oneshot(
        app.router(),
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let (status, body) = app
        .request(Request::get("/nope").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["data"]["path"], "/nope");
}
