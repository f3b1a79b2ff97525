use crate::domain::{DomainError, SubscriberEmail};

/// A file attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// A message waiting to be handed to the mail transport.
///
/// Once built it is never mutated; the handler that creates it gives it up
/// to the dispatcher, which sends it at most once.
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    recipients: Vec<SubscriberEmail>,
    subject: String,
    html_body: String,
    text_body: String,
    attachments: Vec<Attachment>,
}

impl OutgoingMail {
    pub fn new(
        recipient: SubscriberEmail,
        subject: impl Into<String>,
        html_body: impl Into<String>,
        text_body: impl Into<String>,
    ) -> Self {
        Self {
            recipients: vec![recipient],
            subject: subject.into(),
            html_body: html_body.into(),
            text_body: text_body.into(),
            attachments: Vec::new(),
        }
    }

    pub fn to_many(
        recipients: Vec<SubscriberEmail>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
        text_body: impl Into<String>,
    ) -> Result<Self, DomainError> {
        if recipients.is_empty() {
            return Err(DomainError::NoRecipients);
        }
        Ok(Self {
            recipients,
            subject: subject.into(),
            html_body: html_body.into(),
            text_body: text_body.into(),
            attachments: Vec::new(),
        })
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn recipients(&self) -> &[SubscriberEmail] {
        &self.recipients
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn html_body(&self) -> &str {
        &self.html_body
    }

    pub fn text_body(&self) -> &str {
        &self.text_body
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }
}
