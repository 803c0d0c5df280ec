//! HTTP ingress for the service: middleware stack, system routes
//! (`/status`, `/docs`, `/static`), the versioned API and the server loop.

pub mod api;
pub mod deps;
mod health;
pub mod middleware;
mod preview;
pub mod router;
pub mod server;
mod state;
pub mod web;

pub use deps::{Cache, DatabaseProbe, Probe, Unavailable};
pub use health::{CheckResult, HealthReport};
pub use router::build_router;
pub use server::{serve, serve_listener, spawn_limiter_cleanup, wait_for_shutdown};
pub use state::AppState;
