use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;

use crate::domain::{OutgoingMail, SubscriberEmail};
use crate::mail_dispatcher::{MailTransport, TransportError};

/// HTTP mail transport speaking the Postmark `/email` API.
#[derive(Debug)]
pub struct EmailClient {
    http_client: Client,
    base_url: String,
    sender: SubscriberEmail,
    authorization_token: Secret<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: String,
    subject: &'a str,
    html_body: &'a str,
    text_body: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<AttachmentBody<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AttachmentBody<'a> {
    name: &'a str,
    content: String,
    content_type: &'a str,
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: SubscriberEmail,
        authorization_token: Secret<String>,
        timeout: Duration,
    ) -> Result<Self, anyhow::Error> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url,
            sender,
            authorization_token,
        })
    }

    pub async fn send_email(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        let url = format!("{}/email", self.base_url);
        let to = mail
            .recipients()
            .iter()
            .map(|recipient| recipient.as_ref())
            .collect::<Vec<&str>>()
            .join(", ");
        let attachments = mail
            .attachments()
            .iter()
            .map(|a| AttachmentBody {
                name: &a.name,
                content: base64::engine::general_purpose::STANDARD.encode(&a.content),
                content_type: &a.content_type,
            })
            .collect();
        let request_body = SendEmailRequest {
            from: self.sender.as_ref(),
            to,
            subject: mail.subject(),
            html_body: mail.html_body(),
            text_body: mail.text_body(),
            attachments,
        };

        let response = self
            .http_client
            .post(&url)
            .header(
                "X-Postmark-Server-Token",
                self.authorization_token.expose_secret(),
            )
            .json(&request_body)
            .send()
            .await
            .map_err(TransportError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected(status));
        }
        Ok(())
    }
}

#[async_trait]
impl MailTransport for EmailClient {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        self.send_email(mail).await
    }
}
