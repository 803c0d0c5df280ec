use apikit::RequestId;
use axum::http::{HeaderName, Request};
use axum::{body::Body, middleware::Next, response::Response};
use tower_http::request_id::{MakeRequestId, RequestId as HeaderRequestId};

pub fn header() -> HeaderName {
    HeaderName::from_static("x-request-id")
}

/// Generates a UUID v4 when the client did not send `X-Request-ID`.
#[derive(Clone, Default)]
pub struct MakeReqId;

impl MakeRequestId for MakeReqId {
    fn make_request_id<B>(&mut self, _req: &Request<B>) -> Option<HeaderRequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        Some(HeaderRequestId::new(id.parse().ok()?))
    }
}

/// Middleware that stores the request id in request extensions for handlers.
pub async fn push_req_id_to_extensions(mut req: Request<Body>, next: Next) -> Response {
    let rid = request_id_of(&req);
    req.extensions_mut().insert(RequestId(rid));
    next.run(req).await
}

pub(crate) fn request_id_of<B>(req: &Request<B>) -> String {
    if let Some(rid) = req.extensions().get::<RequestId>() {
        return rid.0.clone();
    }
    req.headers()
        .get(header())
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| "n/a".to_string())
}
