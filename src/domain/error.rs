/// Why a piece of subscriber or mail input was refused.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0:?} is not a valid email address")]
    InvalidEmail(String),
    #[error("A subscriber name cannot be blank")]
    BlankName,
    #[error("A subscriber name cannot be longer than {} characters", MAX_NAME_GRAPHEMES)]
    NameTooLong,
    #[error("A subscriber name cannot contain {0:?}")]
    ForbiddenCharacter(char),
    #[error("A message needs at least one recipient")]
    NoRecipients,
}

pub const MAX_NAME_GRAPHEMES: usize = 256;
