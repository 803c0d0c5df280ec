//! Outbound email: provider-agnostic [`Mailer`], the Resend HTTP
//! implementation and file-backed HTML templates.

mod resend;
mod templates;

pub use resend::ResendMailer;
pub use templates::{escape_html, fill, preview_data, Template, TemplateStore};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use runtime::EmailConfig;
use serde::Serialize;
use thiserror::Error;

pub const WELCOME_SUBJECT: &str = "Welcome to Boilerplate!";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("failed to load email template {name} from {}", path.display())]
    Template {
        name: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send email: {0}")]
    Http(#[from] reqwest::Error),

    #[error("email provider rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Message as accepted by the provider API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// Renders templates and hands the result to a [`Mailer`].
#[derive(Clone)]
pub struct EmailClient {
    mailer: Arc<dyn Mailer>,
    templates: TemplateStore,
    from: String,
}

impl EmailClient {
    pub fn new(mailer: Arc<dyn Mailer>, templates: TemplateStore, from: impl Into<String>) -> Self {
        Self {
            mailer,
            templates,
            from: from.into(),
        }
    }

    /// Resend-backed client.
    pub fn from_config(cfg: &EmailConfig) -> Result<Self, MailError> {
        let mailer = ResendMailer::new(&cfg.base_url, &cfg.api_key)?;
        Ok(Self::new(
            Arc::new(mailer),
            TemplateStore::new(&cfg.templates_dir),
            cfg.from_address.clone(),
        ))
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub async fn send_email(
        &self,
        to: &str,
        subject: &str,
        template: Template,
        data: &BTreeMap<String, String>,
    ) -> Result<(), MailError> {
        let html = self.templates.render(template, data).await?;
        let email = OutgoingEmail {
            from: self.from.clone(),
            to: vec![to.to_owned()],
            subject: subject.to_owned(),
            html,
        };
        self.mailer.send(&email).await
    }

    pub async fn send_welcome_email(&self, to: &str, first_name: &str) -> Result<(), MailError> {
        let data = BTreeMap::from([("UserFirstName".to_string(), first_name.to_string())]);
        self.send_email(to, WELCOME_SUBJECT, Template::Welcome, &data)
            .await
    }
}
