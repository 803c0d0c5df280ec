use std::time::Duration;

use async_trait::async_trait;
use tracing::{field::Empty, Instrument};

use super::{MailError, Mailer, OutgoingEmail};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Sends through the Resend HTTP API (`POST {base_url}/emails`).
#[derive(Debug, Clone)]
pub struct ResendMailer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl ResendMailer {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, MailError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/emails", base_url.trim_end_matches('/')),
            api_key: api_key.to_owned(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let span = tracing::info_span!(
            "outgoing_http",
            http.method = "POST",
            http.url = %self.endpoint,
            http.status_code = Empty,
        );
        async {
            let response = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(email)
                .send()
                .await?;

            let status = response.status();
            tracing::Span::current().record("http.status_code", status.as_u16());
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(MailError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }
            tracing::debug!(subject = %email.subject, "email accepted by provider");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            from: "Boilerplate <onboarding@resend.dev>".into(),
            to: vec!["ada@example.com".into()],
            subject: "Welcome to Boilerplate!".into(),
            html: "<p>Hi</p>".into(),
        }
    }

    #[tokio::test]
    async fn posts_email_with_bearer_key() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/emails")
                    .header("authorization", "Bearer re_test")
                    .json_body(json!({
                        "from": "Boilerplate <onboarding@resend.dev>",
                        "to": ["ada@example.com"],
                        "subject": "Welcome to Boilerplate!",
                        "html": "<p>Hi</p>"
                    }));
                then.status(200).json_body(json!({"id": "email_1"}));
            })
            .await;

        let mailer = ResendMailer::new(&server.base_url(), "re_test").unwrap();
        mailer.send(&email()).await.unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn provider_rejection_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/emails");
                then.status(422).body("invalid from address");
            })
            .await;

        let mailer = ResendMailer::new(&format!("{}/", server.base_url()), "re_test").unwrap();
        let err = mailer.send(&email()).await.unwrap_err();
        assert!(
            matches!(err, MailError::Rejected { status: 422, ref body } if body == "invalid from address")
        );
    }
}
