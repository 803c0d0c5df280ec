use std::collections::BTreeMap;
use std::time::Instant;

use apikit_errors::mark_rendered;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub environment: String,
    pub checks: BTreeMap<String, CheckResult>,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub status: &'static str,
    pub response_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ping every configured dependency, each bounded by the health-check timeout.
pub async fn check_health(State(state): State<AppState>) -> Response {
    let start = Instant::now();
    let cfg = &state.config.observability.health_checks;

    let mut checks = BTreeMap::new();
    if cfg.enabled {
        for probe in state.probes() {
            let name = probe.name();
            if !cfg.checks.iter().any(|c| c == name) {
                continue;
            }

            let probe_start = Instant::now();
            let outcome = match tokio::time::timeout(cfg.timeout, probe.ping(cfg.timeout)).await {
                Ok(res) => res,
                Err(_) => Err(anyhow::anyhow!("timed out after {:?}", cfg.timeout)),
            };
            let elapsed = probe_start.elapsed();

            let result = match outcome {
                Ok(()) => {
                    tracing::debug!(check = name, response_time = ?elapsed, "health check passed");
                    CheckResult {
                        status: "healthy",
                        response_time: format!("{elapsed:?}"),
                        error: None,
                    }
                }
                Err(e) => {
                    let error = format!("{e:#}");
                    tracing::error!(
                        check = name,
                        response_time = ?elapsed,
                        error = %error,
                        "dependency health check failed"
                    );
                    CheckResult {
                        status: "unhealthy",
                        response_time: format!("{elapsed:?}"),
                        error: Some(error),
                    }
                }
            };
            checks.insert(name.to_owned(), result);
        }
    }

    let failed: Vec<&str> = checks
        .iter()
        .filter(|(_, c)| c.status != "healthy")
        .map(|(name, _)| name.as_str())
        .collect();
    let healthy = failed.is_empty();
    if !healthy {
        tracing::warn!(
            failed = ?failed,
            total_duration = ?start.elapsed(),
            "health check failed"
        );
    }

    let report = HealthReport {
        status: if healthy { "healthy" } else { "unhealthy" },
        timestamp: Utc::now(),
        environment: environment(&state),
        checks,
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    // The 503 report is the response body; keep it out of error mapping.
    mark_rendered((status, Json(report)).into_response())
}

fn environment(state: &AppState) -> String {
    let env = &state.config.observability.environment;
    if env.is_empty() {
        state.config.primary.env.clone()
    } else {
        env.clone()
    }
}
