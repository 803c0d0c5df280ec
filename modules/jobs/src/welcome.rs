use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::email::EmailClient;
use crate::{JobError, JobService, Task, TaskHandler};

pub const TYPE_WELCOME_EMAIL: &str = "email:welcome";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeEmailPayload {
    pub to: String,
    pub first_name: String,
}

/// Three retries on the default queue, 30s per attempt.
pub fn new_welcome_email_task(to: &str, first_name: &str) -> Result<Task, JobError> {
    let payload = WelcomeEmailPayload {
        to: to.to_owned(),
        first_name: first_name.to_owned(),
    };
    Ok(Task::json(TYPE_WELCOME_EMAIL, &payload)?
        .max_retry(3)
        .queue("default")
        .timeout(Duration::from_secs(30)))
}

pub struct WelcomeEmailHandler {
    email: Arc<EmailClient>,
}

impl WelcomeEmailHandler {
    pub fn new(email: Arc<EmailClient>) -> Self {
        Self { email }
    }
}

#[async_trait]
impl TaskHandler for WelcomeEmailHandler {
    async fn process(&self, task: &Task) -> anyhow::Result<()> {
        let p: WelcomeEmailPayload = task
            .decode()
            .context("failed to decode welcome email payload")?;

        tracing::info!(email_type = "welcome", to = %p.to, "processing welcome email task");

        if let Err(e) = self.email.send_welcome_email(&p.to, &p.first_name).await {
            tracing::error!(email_type = "welcome", to = %p.to, error = %e, "failed to send welcome email");
            return Err(e.into());
        }

        tracing::info!(email_type = "welcome", to = %p.to, "successfully sent welcome email");
        Ok(())
    }
}

/// Register every email task handler on `service`.
pub fn register_email_handlers(service: JobService, email: Arc<EmailClient>) -> JobService {
    service.with_handler(TYPE_WELCOME_EMAIL, Arc::new(WelcomeEmailHandler::new(email)))
}
