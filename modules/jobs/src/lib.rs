//! Background jobs and outbound email.
//!
//! Producers enqueue [`Task`]s through a [`JobClient`]; the [`JobService`]
//! runs them on a bounded worker pool with per-task timeouts and
//! exponential-backoff retries. Task types are routed to [`TaskHandler`]s
//! registered at construction.
//!
//! ```rust,no_run
//! # async fn demo(cfg: &runtime::AppConfig) -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use jobs::{email::EmailClient, new_welcome_email_task, register_email_handlers, JobService};
//!
//! let email = Arc::new(EmailClient::from_config(&cfg.email)?);
//! let service = register_email_handlers(JobService::new(&cfg.jobs), email);
//! service.start();
//! service.client().enqueue(new_welcome_email_task("ada@example.com", "Ada")?)?;
//! service.stop().await;
//! # Ok(())
//! # }
//! ```

mod broker;
pub mod email;
mod error;
mod service;
mod task;
mod welcome;

pub use broker::JobClient;
pub use error::JobError;
pub use service::{retry_delay, JobService, TaskHandler, MAX_RETRY_DELAY};
pub use task::{Task, TaskInfo, TaskOptions, DEFAULT_MAX_RETRY, DEFAULT_QUEUE, DEFAULT_TIMEOUT};
pub use welcome::{
    new_welcome_email_task, register_email_handlers, WelcomeEmailHandler, WelcomeEmailPayload,
    TYPE_WELCOME_EMAIL,
};
