//! Process-wide runtime concerns: layered configuration and logging setup.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, AuthConfig, CacheConfig, CliArgs, DatabaseConfig, EmailConfig,
    HealthChecksConfig, JobsConfig, LoggingConfig, ObservabilityConfig, PrimaryConfig,
    RateLimitConfig, ServerConfig, StartupPolicy,
};
