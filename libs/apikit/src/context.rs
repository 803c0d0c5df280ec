use std::convert::Infallible;

use axum::extract::{FromRequestParts, MatchedPath};
use http::{request::Parts, HeaderMap, Method};

use crate::telemetry::Transaction;

/// Request id assigned by the HTTP layer (`X-Request-ID`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Authenticated caller, populated by the auth middleware.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub role: String,
    pub permissions: Vec<String>,
}

impl Identity {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Read-only view of the inbound request handed to business handlers.
///
/// Everything here was placed in the request by middleware before the
/// pipeline runs; the pipeline never writes back into it.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub identity: Option<Identity>,
    pub method: Method,
    pub path: String,
    /// Route template (`/api/v1/users/{id}`), falls back to the raw path.
    pub route: String,
    pub headers: HeaderMap,
    pub transaction: Option<Transaction>,
}

impl RequestContext {
    pub fn from_parts(parts: &Parts) -> Self {
        let path = parts.uri.path().to_owned();
        let route = parts
            .extensions
            .get::<MatchedPath>()
            .map(|m| m.as_str().to_owned())
            .unwrap_or_else(|| path.clone());

        Self {
            request_id: parts
                .extensions
                .get::<RequestId>()
                .map(|r| r.0.clone())
                .unwrap_or_else(|| "n/a".to_owned()),
            identity: parts.extensions.get::<Identity>().cloned(),
            method: parts.method.clone(),
            path,
            route,
            headers: parts.headers.clone(),
            transaction: parts.extensions.get::<Transaction>().cloned(),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.subject.as_str())
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    #[test]
    fn context_reads_middleware_extensions() {
        let mut req = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/users?x=1")
            .body(())
            .unwrap();
        req.extensions_mut().insert(RequestId("rid-1".into()));
        req.extensions_mut().insert(Identity {
            subject: "u-1".into(),
            role: "admin".into(),
            permissions: vec!["users:write".into()],
        });
        let (parts, _) = req.into_parts();

        let ctx = RequestContext::from_parts(&parts);
        assert_eq!(ctx.request_id, "rid-1");
        assert_eq!(ctx.user_id(), Some("u-1"));
        assert_eq!(ctx.path, "/api/v1/users");
        assert_eq!(ctx.route, "/api/v1/users");
        assert!(ctx.identity.unwrap().has_permission("users:write"));
        assert!(ctx.transaction.is_none());
    }

    #[test]
    fn missing_request_id_is_marked() {
        let (parts, _) = Request::builder().uri("/").body(()).unwrap().into_parts();
        let ctx = RequestContext::from_parts(&parts);
        assert_eq!(ctx.request_id, "n/a");
        assert!(ctx.identity.is_none());
    }
}
