mod common;

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use common::{app, Call, Harness};
use http_body_util::BodyExt;
use keystone::{
    domain::{
        model::{AppId, AppStatus},
        notice::NoticeSource,
        registry::Ownership,
    },
    errors::BackendError,
    infra::web::router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(h: &Harness, method: &str, uri: &str, body: Option<Value>) -> Response {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();
    router(h.dashboard.clone()).oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn list_renders_step_and_actions() {
    let h = Harness::new();
    h.seed(app("1", AppStatus::Running));

    let response = send(&h, "GET", "/apps", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body[0]["id"], "1");
    assert_eq!(body[0]["status"], "running");
    assert_eq!(body[0]["step"], 3);
    assert_eq!(
        body[0]["actions"],
        json!(["redeploy", "stop", "view_logs", "delete"])
    );
}

#[tokio::test]
async fn import_returns_the_created_application() {
    let h = Harness::new();

    let response = send(
        &h,
        "POST",
        "/apps",
        Some(json!({"name": "My App", "git_url": "https://github.com/u/my-app.git"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    assert_eq!(body["slug"], "my-app");
    assert_eq!(body["branch"], "main");
    assert_eq!(body["step"], 1);
    assert_eq!(body["actions"], json!(["prepare", "delete"]));
}

#[tokio::test]
async fn import_without_a_name_is_unprocessable() {
    let h = Harness::new();

    let response = send(
        &h,
        "POST",
        "/apps",
        Some(json!({"name": "  ", "git_url": "https://github.com/u/x.git"})),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["error"], "App name is required");
    assert_eq!(h.backend.count(|call| matches!(call, Call::Import(_))), 0);
}

#[tokio::test]
async fn unknown_application_is_not_found() {
    let h = Harness::new();

    let response = send(&h, "GET", "/apps/42", None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deploying_an_imported_application_conflicts() {
    let h = Harness::new();
    h.seed(app("1", AppStatus::Imported));

    let response = send(&h, "POST", "/apps/1/deploy", None).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(h.backend.count(|call| matches!(call, Call::Deploy(_))), 0);
}

#[tokio::test]
async fn deploy_sends_the_posted_settings() {
    let h = Harness::new();
    h.seed(app("1", AppStatus::Prepared));

    let response = send(
        &h,
        "POST",
        "/apps/1/deploy",
        Some(json!({"container_port": 3000, "env_vars": {"DEBUG": "1"}})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "running");
    assert_eq!(body["container_port"], 3000);
    assert_eq!(body["env_vars"]["DEBUG"], "1");
}

#[tokio::test]
async fn failed_operation_is_recorded_on_the_application() {
    let h = Harness::new();
    h.seed(app("1", AppStatus::Imported));
    h.backend.fail(
        "prepare",
        BackendError::Rejected {
            status: 500,
            message: "clone failed".to_string(),
        },
    );

    let response = send(&h, "POST", "/apps/1/prepare", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error_message"], "clone failed");
    assert_eq!(body["step"], 1);
    assert_eq!(body["actions"], json!(["prepare", "delete"]));
}

#[tokio::test]
async fn delete_waits_for_confirmation() {
    let h = Harness::new();
    h.seed(app("1", AppStatus::Running));

    let response = send(&h, "DELETE", "/apps/1", None).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let confirmation = json_body(response).await;
    let token = confirmation["token"].as_str().unwrap().to_string();
    assert_eq!(confirmation["app_id"], "1");

    let response = send(
        &h,
        "POST",
        &format!("/confirmations/{token}"),
        Some(json!({"accept": false})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["outcome"], "declined");
    assert_eq!(h.backend.count(|call| matches!(call, Call::Delete(_))), 0);

    let response = send(&h, "DELETE", "/apps/1", None).await;
    let token = json_body(response).await["token"].as_str().unwrap().to_string();
    let response = send(
        &h,
        "POST",
        &format!("/confirmations/{token}"),
        Some(json!({"accept": true})),
    )
    .await;
    assert_eq!(json_body(response).await["outcome"], "deleted");
    assert_eq!(send(&h, "GET", "/apps/1", None).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn import_rejected_by_the_backend_is_a_bad_gateway() {
    let h = Harness::new();
    h.backend.fail(
        "import",
        BackendError::Rejected {
            status: 500,
            message: "Internal server error".to_string(),
        },
    );

    let response = send(
        &h,
        "POST",
        "/apps",
        Some(json!({"name": "demo", "git_url": "https://github.com/u/demo.git"})),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error"], "Internal server error");
}

#[tokio::test]
async fn logs_fall_back_to_a_placeholder() {
    let h = Harness::new();
    h.seed(app("1", AppStatus::Running));

    let response = send(&h, "GET", "/apps/1/logs", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["logs"], "No logs available");
}

#[tokio::test]
async fn notices_can_be_dismissed() {
    let h = Harness::new();
    let id = h.dashboard.notices.push(NoticeSource::Poll, "Request failed: 502");

    let body = json_body(send(&h, "GET", "/notices", None).await).await;
    assert_eq!(body[0]["source"], "poll");
    assert_eq!(body[0]["message"], "Request failed: 502");

    let uri = format!("/notices/{id}");
    assert_eq!(send(&h, "DELETE", &uri, None).await.status(), StatusCode::NO_CONTENT);
    assert_eq!(send(&h, "DELETE", &uri, None).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_hides_the_registry_until_the_next_login() {
    let h = Harness::new();
    h.seed(app("1", AppStatus::Running));

    let response = send(&h, "POST", "/logout", None).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!h.dashboard.session.is_authenticated());
    assert!(h.dashboard.registry.list().is_empty());
    assert_eq!(send(&h, "GET", "/apps", None).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(send(&h, "GET", "/apps/1", None).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        send(&h, "GET", "/apps/1/logs", None).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let response = send(
        &h,
        "POST",
        "/login",
        Some(json!({"username": "admin", "password": "wrong"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &h,
        "POST",
        "/login",
        Some(json!({"username": "admin", "password": "secret"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["username"], "admin");
    assert!(h.dashboard.is_mounted());

    h.dashboard.synchronizer().sync_once().await;
    let body = json_body(send(&h, "GET", "/apps", None).await).await;
    assert_eq!(body[0]["id"], "1");
    h.dashboard.unmount().await;
}

#[tokio::test]
async fn deploy_completes_after_the_request_is_dropped() {
    let h = Harness::new();
    h.seed(app("1", AppStatus::Prepared));
    let id = AppId::new("1");
    let gate = h.backend.hold("deploy");

    let request = Request::builder()
        .method("POST")
        .uri("/apps/1/deploy")
        .body(Body::empty())
        .unwrap();
    let client = tokio::spawn(router(h.dashboard.clone()).oneshot(request));
    gate.entered().await;
    client.abort();
    assert!(matches!(client.await, Err(e) if e.is_cancelled()));
    gate.release();

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.dashboard.registry.get(&id).map(|entry| entry.ownership) != Some(Ownership::Idle) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    let entry = h.dashboard.registry.get(&id).unwrap();
    assert_eq!(entry.app.status, AppStatus::Running);
    assert_eq!(h.backend.count(|call| matches!(call, Call::Deploy(_))), 1);
}
