//! End-to-end behaviour of `Endpoint` mounted on a router.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use apikit::api::{panic_response, Endpoint, NoPayload, Validatable};
use apikit::{AttrValue, RequestContext, Transaction};
use apikit_db::NoRows;
use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header, StatusCode},
    response::Response,
    routing::{get, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::error::{DatabaseError, ErrorKind};
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tracing_test::traced_test;
use validator::Validate;

#[derive(Clone, Default)]
struct Deps {
    calls: Arc<AtomicUsize>,
}

#[derive(Debug, Deserialize, Validate)]
struct CreateUser {
    #[validate(required, email)]
    email: Option<String>,
    #[validate(length(min = 1, max = 50))]
    first_name: String,
}

impl Validatable for CreateUser {}

#[derive(Debug, Serialize)]
struct User {
    id: u32,
    email: String,
    first_name: String,
}

#[derive(Debug, Deserialize, Validate)]
struct UserPath {
    id: String,
}

impl Validatable for UserPath {}

/// Unique violation as the PostgreSQL driver would report it.
#[derive(Debug)]
struct UniqueViolation;

impl fmt::Display for UniqueViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("duplicate key value violates unique constraint \"unique_users_email\"")
    }
}

impl std::error::Error for UniqueViolation {}

impl DatabaseError for UniqueViolation {
    fn message(&self) -> &str {
        "duplicate key value violates unique constraint \"unique_users_email\""
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed("23505"))
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn constraint(&self) -> Option<&str> {
        Some("unique_users_email")
    }

    fn table(&self) -> Option<&str> {
        Some("users")
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::UniqueViolation
    }
}

async fn create_user(deps: Deps, _ctx: RequestContext, req: CreateUser) -> anyhow::Result<User> {
    deps.calls.fetch_add(1, Ordering::SeqCst);
    let email = req.email.unwrap_or_default();
    if email == "taken@example.com" {
        return Err(sqlx::Error::Database(Box::new(UniqueViolation)).into());
    }
    Ok(User {
        id: 1,
        email,
        first_name: req.first_name,
    })
}

async fn get_user(_deps: Deps, _ctx: RequestContext, req: UserPath) -> anyhow::Result<User> {
    match req.id.as_str() {
        "gone" => Err(anyhow::Error::new(NoRows::in_table("users")).context("loading user")),
        "lost" => Err(sqlx::Error::RowNotFound.into()),
        _ => Ok(User {
            id: 2,
            email: "ada@example.com".into(),
            first_name: "Ada".into(),
        }),
    }
}

async fn delete_user(deps: Deps, _ctx: RequestContext, _req: UserPath) -> anyhow::Result<()> {
    deps.calls.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

async fn export(_deps: Deps, ctx: RequestContext, _req: NoPayload) -> anyhow::Result<Vec<u8>> {
    Ok(format!("request,{}\n", ctx.request_id).into_bytes())
}

async fn explode(_deps: Deps, _ctx: RequestContext, _req: NoPayload) -> anyhow::Result<User> {
    Err(anyhow::anyhow!("ledger table corrupted at page 0x1f"))
}

async fn boom(_deps: Deps, _ctx: RequestContext, _req: NoPayload) -> anyhow::Result<User> {
    panic!("secret panic detail")
}

fn app(deps: Deps) -> Router {
    Router::new()
        .route("/users", post(Endpoint::json(StatusCode::CREATED, create_user)))
        .route(
            "/users/{id}",
            get(Endpoint::json(StatusCode::OK, get_user)).delete(Endpoint::no_content(delete_user)),
        )
        .route("/export", get(Endpoint::file("users.csv", "text/csv", export)))
        .route("/explode", get(Endpoint::json(StatusCode::OK, explode)))
        .route("/boom", get(Endpoint::json(StatusCode::OK, boom)))
        .with_state(deps)
        .layer(CatchPanicLayer::custom(panic_response))
}

fn json_post(uri: &str, body: Value) -> Request {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty(method: &str, uri: &str) -> Request {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(resp: Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
#[traced_test]
async fn creates_user_with_configured_status() {
    let deps = Deps::default();
    let resp = app(deps.clone())
        .oneshot(json_post(
            "/users",
            json!({"email": "ada@example.com", "first_name": "Ada"}),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["email"], "ada@example.com");
    assert_eq!(deps.calls.load(Ordering::SeqCst), 1);
    assert!(logs_contain("handling request"));
    assert!(logs_contain("request completed successfully"));
}

#[tokio::test]
#[traced_test]
async fn missing_email_fails_validation_without_calling_handler() {
    let deps = Deps::default();
    let resp = app(deps.clone())
        .oneshot(json_post("/users", json!({"first_name": "Ada"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(body["override"], true);
    assert_eq!(body["errors"], json!([{"field": "email", "error": "is required"}]));
    assert_eq!(deps.calls.load(Ordering::SeqCst), 0);
    assert!(logs_contain("request validation failed"));
}

#[tokio::test]
async fn malformed_body_is_bad_request_without_calling_handler() {
    let deps = Deps::default();
    let req = Request::builder()
        .method("POST")
        .uri("/users")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"email\": "))
        .unwrap();
    let resp = app(deps.clone()).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["code"], "BAD_REQUEST");
    assert_eq!(body["override"], false);
    assert_eq!(deps.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unique_email_maps_to_already_exists() {
    let resp = app(Deps::default())
        .oneshot(json_post(
            "/users",
            json!({"email": "taken@example.com", "first_name": "Bo"}),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["code"], "USER_ALREADY_EXISTS");
    assert_eq!(body["message"], "A User with this Email already exists");
    assert_eq!(body["override"], true);
}

#[tokio::test]
async fn missing_row_maps_to_entity_not_found() {
    let resp = app(Deps::default())
        .oneshot(empty("GET", "/users/gone"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_json(resp).await;
    assert_eq!(body["message"], "User not found");
}

#[tokio::test]
async fn missing_row_without_table_is_generic() {
    let resp = app(Deps::default())
        .oneshot(empty("GET", "/users/lost"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_json(resp).await;
    assert_eq!(body["message"], "Resource not found");
}

#[tokio::test]
async fn path_params_bind_for_get_and_delete() {
    let deps = Deps::default();
    let resp = app(deps.clone())
        .oneshot(empty("GET", "/users/42"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app(deps.clone())
        .oneshot(empty("DELETE", "/users/42"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());
    assert_eq!(deps.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn file_download_records_transaction_attributes() {
    let txn = Transaction::start("GET /export");
    let resp = app(Deps::default())
        .layer(Extension(txn.clone()))
        .oneshot(empty("GET", "/export"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=users.csv"
    );
    assert_eq!(txn.attribute("file.name"), Some(AttrValue::Str("users.csv".into())));
    assert_eq!(
        txn.attribute("file.content_type"),
        Some(AttrValue::Str("text/csv".into()))
    );
    assert!(matches!(txn.attribute("file.size_bytes"), Some(AttrValue::UInt(n)) if n > 0));
    assert_eq!(
        txn.attribute("validation.status"),
        Some(AttrValue::Str("success".into()))
    );
    assert_eq!(
        txn.attribute("handler.status"),
        Some(AttrValue::Str("success".into()))
    );
    assert!(txn.attribute("total.duration_ms").is_some());
}

#[tokio::test]
#[traced_test]
async fn unclassified_error_is_generic_500() {
    let txn = Transaction::start("GET /explode");
    let resp = app(Deps::default())
        .layer(Extension(txn.clone()))
        .oneshot(empty("GET", "/explode"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp).await;
    assert_eq!(body["message"], "Internal Server Error");
    assert!(!body.to_string().contains("ledger"));

    assert_eq!(
        txn.attribute("handler.status"),
        Some(AttrValue::Str("error".into()))
    );
    assert_eq!(txn.errors().len(), 1);
    assert!(logs_contain("handler execution failed"));
}

#[tokio::test]
async fn panicking_handler_is_generic_500() {
    let resp = app(Deps::default())
        .oneshot(empty("GET", "/boom"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp).await;
    assert_eq!(body["code"], "INTERNAL_SERVER_ERROR");
    assert!(!body.to_string().contains("secret"));
}

#[tokio::test]
async fn validation_failure_is_recorded_on_transaction() {
    let txn = Transaction::start("POST /users");
    let _ = app(Deps::default())
        .layer(Extension(txn.clone()))
        .oneshot(json_post("/users", json!({"email": "nope", "first_name": ""})))
        .await
        .unwrap();

    assert_eq!(
        txn.attribute("validation.status"),
        Some(AttrValue::Str("failed".into()))
    );
    assert!(txn.attribute("handler.status").is_none());
    assert_eq!(txn.attribute("http.status_code"), Some(AttrValue::UInt(400)));
}
