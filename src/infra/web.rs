use std::{future::Future, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use log::error;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    domain::{
        lifecycle::{DeleteConfirmation, DeleteOutcome},
        model::{AppId, DeployConfig, NewApplication},
        AppView, Dashboard,
    },
    errors::{LifecycleError, SessionError},
};

type Rejection = (StatusCode, Json<serde_json::Value>);

pub fn router(dashboard: Arc<Dashboard>) -> Router {
    Router::new()
        .route("/apps", get(list_applications).post(import_application))
        .route("/apps/:id", get(get_application).delete(request_delete))
        .route("/apps/:id/prepare", post(prepare_application))
        .route("/apps/:id/deploy", post(deploy_application))
        .route("/apps/:id/redeploy", post(redeploy_application))
        .route("/apps/:id/stop", post(stop_application))
        .route("/apps/:id/logs", get(application_logs))
        .route("/confirmations/:token", post(confirm_delete))
        .route("/notices", get(list_notices))
        .route("/notices/:id", delete(dismiss_notice))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .with_state(dashboard)
}

fn reject(operation: &str, e: LifecycleError) -> Rejection {
    let status = match &e {
        LifecycleError::NotFound(_) | LifecycleError::UnknownConfirmation => StatusCode::NOT_FOUND,
        LifecycleError::Busy { .. } | LifecycleError::InvalidTransition { .. } => StatusCode::CONFLICT,
        LifecycleError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LifecycleError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        LifecycleError::Backend(_) => {
            error!("Error during {} {:?}", operation, e);
            StatusCode::BAD_GATEWAY
        }
    };
    (status, Json(json!({ "error": e.to_string() })))
}

/// Runs a lifecycle operation on its own task so a dropped request does not
/// abandon it halfway.
async fn detached<T, F>(operation: &str, future: F) -> Result<T, Rejection>
where
    T: Send + 'static,
    F: Future<Output = Result<T, LifecycleError>> + Send + 'static,
{
    match tokio::spawn(future).await {
        Ok(result) => result.map_err(|e| reject(operation, e)),
        Err(e) => {
            error!("Error during {} {:?}", operation, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Something went wrong: {e}") })),
            ))
        }
    }
}

fn authenticated(dashboard: &Dashboard) -> Result<(), Rejection> {
    if dashboard.session.is_authenticated() {
        Ok(())
    } else {
        Err(reject("view", LifecycleError::NotAuthenticated))
    }
}

fn view(dashboard: &Dashboard, id: &AppId) -> Result<Json<AppView>, Rejection> {
    authenticated(dashboard)?;
    dashboard
        .view_app(id)
        .map(Json)
        .ok_or_else(|| reject("view", LifecycleError::NotFound(id.clone())))
}

async fn list_applications(
    State(dashboard): State<Arc<Dashboard>>,
) -> Result<Json<Vec<AppView>>, Rejection> {
    authenticated(&dashboard)?;
    Ok(Json(dashboard.view()))
}

async fn get_application(
    State(dashboard): State<Arc<Dashboard>>,
    Path(id): Path<String>,
) -> Result<Json<AppView>, Rejection> {
    view(&dashboard, &AppId::new(id))
}

async fn import_application(
    State(dashboard): State<Arc<Dashboard>>,
    Json(payload): Json<NewApplication>,
) -> Result<(StatusCode, Json<AppView>), Rejection> {
    let controller = dashboard.controller.clone();
    let app = detached("import_application", async move { controller.import(payload).await }).await?;
    view(&dashboard, &app.id).map(|view| (StatusCode::CREATED, view))
}

async fn prepare_application(
    State(dashboard): State<Arc<Dashboard>>,
    Path(id): Path<String>,
) -> Result<Json<AppView>, Rejection> {
    let id = AppId::new(id);
    let controller = dashboard.controller.clone();
    let target = id.clone();
    detached("prepare_application", async move { controller.prepare(&target).await }).await?;
    view(&dashboard, &id)
}

async fn deploy_application(
    State(dashboard): State<Arc<Dashboard>>,
    Path(id): Path<String>,
    payload: Option<Json<DeployConfig>>,
) -> Result<Json<AppView>, Rejection> {
    let id = AppId::new(id);
    let config = resolve_config(&dashboard, &id, payload);
    let controller = dashboard.controller.clone();
    let target = id.clone();
    detached("deploy_application", async move {
        controller.deploy(&target, config?).await
    })
    .await?;
    view(&dashboard, &id)
}

async fn redeploy_application(
    State(dashboard): State<Arc<Dashboard>>,
    Path(id): Path<String>,
    payload: Option<Json<DeployConfig>>,
) -> Result<Json<AppView>, Rejection> {
    let id = AppId::new(id);
    let config = resolve_config(&dashboard, &id, payload);
    let controller = dashboard.controller.clone();
    let target = id.clone();
    detached("redeploy_application", async move {
        controller.redeploy(&target, config?).await
    })
    .await?;
    view(&dashboard, &id)
}

/// Without a body, deploy with the settings currently stored on the application.
fn resolve_config(
    dashboard: &Dashboard,
    id: &AppId,
    payload: Option<Json<DeployConfig>>,
) -> Result<DeployConfig, LifecycleError> {
    match payload {
        Some(Json(config)) => Ok(config),
        None => dashboard
            .registry
            .get(id)
            .map(|entry| entry.app.deploy_config())
            .ok_or_else(|| LifecycleError::NotFound(id.clone())),
    }
}

async fn stop_application(
    State(dashboard): State<Arc<Dashboard>>,
    Path(id): Path<String>,
) -> Result<Json<AppView>, Rejection> {
    let id = AppId::new(id);
    let controller = dashboard.controller.clone();
    let target = id.clone();
    detached("stop_application", async move { controller.stop(&target).await }).await?;
    view(&dashboard, &id)
}

async fn application_logs(
    State(dashboard): State<Arc<Dashboard>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, Rejection> {
    dashboard
        .controller
        .fetch_logs(&AppId::new(id))
        .await
        .map(|logs| Json(json!({ "logs": logs })))
        .map_err(|e| reject("application_logs", e))
}

async fn request_delete(
    State(dashboard): State<Arc<Dashboard>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<DeleteConfirmation>), Rejection> {
    dashboard
        .controller
        .request_delete(&AppId::new(id))
        .map(|confirmation| (StatusCode::ACCEPTED, Json(confirmation)))
        .map_err(|e| reject("request_delete", e))
}

#[derive(Deserialize)]
struct ConfirmPayload {
    accept: bool,
}

async fn confirm_delete(
    State(dashboard): State<Arc<Dashboard>>,
    Path(token): Path<Uuid>,
    Json(payload): Json<ConfirmPayload>,
) -> Result<Json<DeleteOutcome>, Rejection> {
    let controller = dashboard.controller.clone();
    detached("confirm_delete", async move {
        controller.confirm_delete(token, payload.accept).await
    })
    .await
    .map(Json)
}

async fn list_notices(State(dashboard): State<Arc<Dashboard>>) -> impl IntoResponse {
    Json(dashboard.notices.list())
}

async fn dismiss_notice(
    State(dashboard): State<Arc<Dashboard>>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    if dashboard.notices.dismiss(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

async fn login(
    State(dashboard): State<Arc<Dashboard>>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<serde_json::Value>, Rejection> {
    match dashboard.login(&payload.username, &payload.password).await {
        Ok(()) => Ok(Json(json!({
            "username": dashboard.session.username().unwrap_or(payload.username)
        }))),
        Err(e) => {
            let status = match &e {
                SessionError::InvalidCredentials(_) | SessionError::NotAuthenticated => {
                    StatusCode::UNAUTHORIZED
                }
                SessionError::Backend(_) => {
                    error!("Error during login {:?}", e);
                    StatusCode::BAD_GATEWAY
                }
            };
            Err((status, Json(json!({ "error": e.to_string() }))))
        }
    }
}

async fn logout(State(dashboard): State<Arc<Dashboard>>) -> impl IntoResponse {
    dashboard.logout().await;
    StatusCode::NO_CONTENT
}
