//! API integration tests against a live Redis.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use vproc_api::{create_router, ApiConfig, AppState};
use vproc_queue::JobQueue;

async fn app() -> axum::Router {
    dotenvy::dotenv().ok();
    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");
    create_router(AppState::new(ApiConfig::default(), Arc::new(queue)), None)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is JSON")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_ready_endpoint() {
    let response = app()
        .await
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_submit_then_lookup() {
    let app = app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/process_video")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"video_url": "https://www.youtube.com/watch?v=test"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let task_id = body_json(response).await["task_id"]
        .as_str()
        .expect("task_id")
        .to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/process_video/{}", task_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["task_id"], task_id);
}
