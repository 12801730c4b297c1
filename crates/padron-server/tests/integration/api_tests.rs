use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::common::setup_test_app;

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
    assert!(json["breaker"].is_null());
}

#[tokio::test]
async fn create_and_get_job() {
    let app = setup_test_app().await;

    let create_body = serde_json::json!({
        "citizen_id": "V-12345678",
        "priority": 3
    });

    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/v1/jobs")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&create_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "queued");
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let response = app
        .router
        .oneshot(
            Request::get(format!("/v1/jobs/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["citizen_id"], "V-12345678");
    assert_eq!(json["priority"], 3);
    assert_eq!(json["attempts"], 0);
    assert_eq!(json["max_attempts"], 3);
}

#[tokio::test]
async fn create_job_rejects_empty_citizen_id() {
    let app = setup_test_app().await;

    let create_body = serde_json::json!({ "citizen_id": "   " });

    let response = app
        .router
        .oneshot(
            Request::post("/v1/jobs")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&create_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn get_unknown_job_returns_404() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::get(format!("/v1/jobs/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_jobs_filters_by_status() {
    let app = setup_test_app().await;

    for n in 0..2 {
        let create_body = serde_json::json!({ "citizen_id": format!("V-0000000{n}") });
        let response = app
            .router
            .clone()
            .oneshot(
                Request::post("/v1/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&create_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/v1/jobs?status=queued")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total"], 2);

    let response = app
        .router
        .oneshot(
            Request::get("/v1/jobs?status=done")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total"], 0);
}

#[tokio::test]
async fn stats_without_dispatcher_reports_queue_only() {
    let app = setup_test_app().await;

    let create_body = serde_json::json!({ "citizen_id": "V-12345678" });
    app.router
        .clone()
        .oneshot(
            Request::post("/v1/jobs")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&create_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(Request::get("/v1/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["queue"]["queued"], 1);
    assert_eq!(json["queue"]["done"], 0);
    assert!(json["pool"].is_null());
}

#[tokio::test]
async fn breaker_reset_without_dispatcher_conflicts() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::post("/v1/breaker/reset")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}
