use unicode_segmentation::UnicodeSegmentation;

use crate::domain::{DomainError, MAX_NAME_GRAPHEMES};

const FORBIDDEN_CHARACTERS: &[char] = &['/', '(', ')', '"', '<', '>', '\\', '{', '}'];

/// Display name of a subscriber, trimmed of surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberName(String);

impl AsRef<str> for SubscriberName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl SubscriberName {
    pub fn parse(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::BlankName);
        }
        if trimmed.graphemes(true).count() > MAX_NAME_GRAPHEMES {
            return Err(DomainError::NameTooLong);
        }
        if let Some(c) = trimmed.chars().find(|c| FORBIDDEN_CHARACTERS.contains(c)) {
            return Err(DomainError::ForbiddenCharacter(c));
        }
        Ok(Self(trimmed.to_owned()))
    }
}
