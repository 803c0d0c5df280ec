use apikit::api::error_response;
use apikit_errors::AppError;
use axum::{
    extract::{Path, State},
    response::{Html, IntoResponse, Response},
};
use jobs::email::{preview_data, Template};

use crate::AppState;

/// Render a template with sample data. Not mounted in production.
pub async fn preview_email(
    State(state): State<AppState>,
    Path(template): Path<String>,
) -> Response {
    let Some(template) = Template::from_name(&template) else {
        return AppError::not_found("Email template not found").into_response();
    };
    match state.templates.render(template, &preview_data(template)).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => error_response(e.into(), None),
    }
}
