use apikit::api::{error_mapping_middleware, panic_response};
use axum::{
    http::HeaderValue,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};

use crate::middleware::{
    access_log, create_trace_layer, enhance_context, push_req_id_to_extensions, rate_limit,
    request_id_header, require_auth, secure_headers, IpRateLimiter, JwtAuth, MakeReqId,
};
use crate::{api, health, preview, web, AppState};

/// Build the full HTTP surface.
///
/// Middleware order (outermost to innermost):
/// CatchPanic -> error mapping -> CORS -> secure headers -> SetRequestId ->
/// PropagateRequestId -> push_req_id_to_extensions -> Trace -> context
/// enhancer -> access log -> rate limit -> BodyLimit -> Timeout
pub fn build_router(state: AppState, limiter: Option<IpRateLimiter>) -> Router {
    let config = state.config.clone();
    let auth = JwtAuth::new(&config.auth.secret_key);
    let x_request_id = request_id_header();

    let mut router = Router::new()
        .route("/status", get(health::check_health))
        .route("/docs", get(web::serve_docs))
        .nest_service("/static", web::static_files(&config.server.static_dir))
        .nest(
            "/api/v1",
            api::routes().route_layer(from_fn_with_state(auth, require_auth)),
        );
    if !config.is_production() {
        router = router.route("/emails/preview/{template}", get(preview::preview_email));
    }

    let middleware = ServiceBuilder::new()
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn(error_mapping_middleware))
        .layer(cors_layer(&config.server.cors_allowed_origins))
        .layer(secure_headers())
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeReqId))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .layer(from_fn(push_req_id_to_extensions))
        .layer(create_trace_layer())
        .layer(from_fn_with_state(
            config.observability.tracing_enabled,
            enhance_context,
        ))
        .layer(from_fn(access_log))
        .layer(from_fn_with_state(limiter, rate_limit))
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .layer(TimeoutLayer::new(config.server.write_timeout));

    router.with_state(state).layer(middleware)
}

/// Any origin when none are configured (or `*` is listed).
fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([request_id_header()]);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| {
            HeaderValue::from_str(o)
                .map_err(|_| tracing::warn!(origin = %o, "ignoring invalid CORS origin"))
                .ok()
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
}
