//! HTTP middleware, listed in the order the router applies them
//! (outermost first, after panic recovery, error mapping and CORS).

pub mod secure;
pub mod request_id;
pub mod trace;
pub mod access_log;
pub mod rate_limit;
pub mod auth;

pub use access_log::access_log;
pub use auth::{require_auth, require_permission, Claims, JwtAuth};
pub use rate_limit::{rate_limit, IpRateLimiter};
pub use request_id::{header as request_id_header, push_req_id_to_extensions, MakeReqId};
pub use secure::secure_headers;
pub use trace::{create_trace_layer, enhance_context, real_ip, ClientIp};
