use axum::{
    http::{header, HeaderValue},
    response::{Html, IntoResponse, Response},
};
use tower_http::services::ServeDir;

/// API reference page; loads the OpenAPI document from `/static/openapi.json`.
pub async fn serve_docs() -> Response {
    (
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))],
        Html(DOCS_PAGE),
    )
        .into_response()
}

/// Files under `dir`, mounted at `/static`.
pub fn static_files(dir: &str) -> ServeDir {
    ServeDir::new(dir)
}

const DOCS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8"/>
  <title>API Docs</title>
  <script src="https://unpkg.com/@stoplight/elements@latest/web-components.min.js"></script>
  <link rel="stylesheet" href="https://unpkg.com/@stoplight/elements@latest/styles.min.css">
</head>
<body>
  <elements-api apiDescriptionUrl="/static/openapi.json" router="hash" layout="sidebar"></elements-api>
</body>
</html>"#;
