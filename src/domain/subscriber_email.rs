use validator::ValidateEmail;

use crate::domain::DomainError;

/// An address mail can be dispatched to, either a subscriber or the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberEmail(String);

impl std::fmt::Display for SubscriberEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubscriberEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl SubscriberEmail {
    pub fn parse(email: impl Into<String>) -> Result<Self, DomainError> {
        let email = email.into();
        let email = email.trim();
        if !email.validate_email() {
            return Err(DomainError::InvalidEmail(email.to_owned()));
        }
        Ok(Self(email.to_owned()))
    }
}
