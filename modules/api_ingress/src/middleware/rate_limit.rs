use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use apikit::Transaction;
use apikit_errors::AppError;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use runtime::RateLimitConfig;

use super::request_id::request_id_of;
use super::trace::real_ip;

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// Per-client-IP token bucket.
#[derive(Clone)]
pub struct IpRateLimiter {
    limiter: Arc<KeyedLimiter>,
}

impl IpRateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> anyhow::Result<Self> {
        let rate = NonZeroU32::new(cfg.requests_per_second)
            .ok_or_else(|| anyhow::anyhow!("rate_limit.requests_per_second must be > 0"))?;
        let burst = NonZeroU32::new(cfg.burst.max(1)).unwrap_or(rate);
        let quota = Quota::per_second(rate).allow_burst(burst);
        Ok(Self {
            limiter: Arc::new(RateLimiter::dashmap(quota)),
        })
    }

    /// `Err` carries how long the caller should wait.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.limiter
            .check_key(&key.to_string())
            .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }

    /// Forget clients whose bucket is full again.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}

/// `None` disables limiting.
pub async fn rate_limit(
    State(limiter): State<Option<IpRateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(limiter) = limiter else {
        return next.run(req).await;
    };

    let ip = real_ip(&req);
    let Err(wait) = limiter.check(&ip) else {
        return next.run(req).await;
    };

    let path = req.uri().path();
    tracing::warn!(
        request_id = %request_id_of(&req),
        identifier = %ip,
        path = %path,
        method = %req.method(),
        ip = %ip,
        "rate limit exceeded"
    );
    if let Some(txn) = req.extensions().get::<Transaction>() {
        txn.add_attribute("rate_limit.hit", true);
        txn.add_attribute("rate_limit.endpoint", path);
    }

    let mut response = AppError::too_many_requests("Rate limit exceeded").into_response();
    let retry_after = wait.as_secs().max(1).to_string();
    if let Ok(value) = HeaderValue::from_str(&retry_after) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(rps: u32, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_second: rps,
            burst,
        }
    }

    #[test]
    fn burst_then_reject() {
        let limiter = IpRateLimiter::new(&cfg(1, 2)).unwrap();
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_ok());
        let wait = limiter.check("10.0.0.1").unwrap_err();
        assert!(wait <= Duration::from_secs(1));
    }

    #[test]
    fn clients_are_limited_independently() {
        let limiter = IpRateLimiter::new(&cfg(1, 1)).unwrap();
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_err());
        assert!(limiter.check("10.0.0.2").is_ok());
        limiter.retain_recent();
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(IpRateLimiter::new(&cfg(0, 5)).is_err());
    }
}
