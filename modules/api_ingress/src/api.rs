//! Versioned business routes, mounted under `/api/v1` behind authentication.

use apikit::api::{Endpoint, NoPayload, Validatable};
use apikit::RequestContext;
use apikit_errors::AppError;
use axum::{
    http::StatusCode,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use jobs::new_welcome_email_task;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::middleware::require_permission;
use crate::AppState;

pub const PERMISSION_SEND_EMAILS: &str = "emails:send";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(Endpoint::json(StatusCode::OK, current_user)))
        .route(
            "/emails/welcome",
            post(Endpoint::json(StatusCode::ACCEPTED, queue_welcome_email))
                .route_layer(from_fn(require_permission(PERMISSION_SEND_EMAILS))),
        )
}

#[derive(Debug, Serialize)]
pub struct CurrentUser {
    pub user_id: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub request_id: String,
}

async fn current_user(
    _state: AppState,
    ctx: RequestContext,
    _req: NoPayload,
) -> anyhow::Result<CurrentUser> {
    let identity = ctx
        .identity
        .ok_or_else(|| AppError::unauthorized("Unauthorized"))?;
    Ok(CurrentUser {
        user_id: identity.subject,
        role: identity.role,
        permissions: identity.permissions,
        request_id: ctx.request_id,
    })
}

#[derive(Debug, Deserialize, Validate)]
pub struct WelcomeEmailRequest {
    #[validate(required, email)]
    pub email: Option<String>,
    #[validate(required, length(min = 1, max = 100))]
    pub first_name: Option<String>,
}

impl Validatable for WelcomeEmailRequest {}

#[derive(Debug, Serialize)]
pub struct QueuedTask {
    pub task_id: String,
    pub task_type: String,
    pub queue: String,
}

async fn queue_welcome_email(
    state: AppState,
    ctx: RequestContext,
    req: WelcomeEmailRequest,
) -> anyhow::Result<QueuedTask> {
    let Some(jobs) = state.jobs.as_ref() else {
        return Err(AppError::service_unavailable("Background jobs are not available").into());
    };
    let email = req.email.unwrap_or_default();
    let first_name = req.first_name.unwrap_or_default();

    let info = jobs.enqueue(new_welcome_email_task(&email, &first_name)?)?;
    tracing::info!(
        task_id = %info.id,
        user_id = ctx.user_id().unwrap_or_default(),
        "welcome email queued"
    );
    Ok(QueuedTask {
        task_id: info.id,
        task_type: info.kind,
        queue: info.queue,
    })
}
