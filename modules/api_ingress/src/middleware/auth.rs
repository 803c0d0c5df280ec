//! Bearer-token authentication and permission checks.

use std::future::Future;
use std::pin::Pin;

use apikit::{Identity, Transaction};
use apikit_errors::AppError;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::request_id::request_id_of;

/// Token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

impl From<Claims> for Identity {
    fn from(c: Claims) -> Self {
        Identity {
            subject: c.sub,
            role: c.role,
            permissions: c.permissions,
        }
    }
}

/// HS256 signer/verifier sharing one secret.
#[derive(Clone)]
pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn issue(&self, claims: &Claims) -> jsonwebtoken::errors::Result<String> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> jsonwebtoken::errors::Result<Claims> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation).map(|d| d.claims)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn unauthorized() -> Response {
    AppError::unauthorized("Unauthorized").into_response()
}

/// Verify the bearer token and expose the caller as [`Identity`].
pub async fn require_auth(State(auth): State<JwtAuth>, mut req: Request, next: Next) -> Response {
    let request_id = request_id_of(&req);
    let claims = match bearer_token(req.headers()).map(|t| auth.verify(t)) {
        Some(Ok(claims)) => claims,
        Some(Err(e)) => {
            tracing::warn!(request_id = %request_id, error = %e, "token verification failed");
            return unauthorized();
        }
        None => {
            tracing::warn!(request_id = %request_id, "missing bearer token");
            return unauthorized();
        }
    };
    let identity = Identity::from(claims);

    tracing::info!(
        user_id = %identity.subject,
        request_id = %request_id,
        "user authenticated successfully"
    );

    let span = tracing::Span::current();
    span.record("user_id", identity.subject.as_str());
    span.record("user_role", identity.role.as_str());
    if let Some(txn) = req.extensions().get::<Transaction>() {
        txn.add_attribute("user.id", identity.subject.as_str());
        txn.add_attribute("user.role", identity.role.as_str());
    }

    req.extensions_mut().insert(identity.clone());
    let mut response = next.run(req).await;
    // outer layers (access log) read the caller from the response
    response.extensions_mut().insert(identity);
    response
}

type MiddlewareFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Reject callers lacking `permission` with 403. Mount after [`require_auth`]:
/// `axum::middleware::from_fn(require_permission("emails:send"))`.
pub fn require_permission(
    permission: &'static str,
) -> impl Fn(Request, Next) -> MiddlewareFuture + Clone + Send + Sync + 'static {
    move |req: Request, next: Next| Box::pin(check_permission(permission, req, next))
}

async fn check_permission(permission: &'static str, req: Request, next: Next) -> Response {
    let Some(identity) = req.extensions().get::<Identity>() else {
        return unauthorized();
    };
    if !identity.has_permission(permission) {
        tracing::warn!(
            user_id = %identity.subject,
            permission,
            "permission denied"
        );
        return AppError::forbidden("Forbidden").into_response();
    }
    next.run(req).await
}
