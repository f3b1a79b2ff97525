mod error;
mod new_subscriber;
mod outgoing_mail;
mod subscriber_email;
mod subscriber_name;

pub use error::{DomainError, MAX_NAME_GRAPHEMES};
pub use new_subscriber::NewSubscriber;
pub use outgoing_mail::{Attachment, OutgoingMail};
pub use subscriber_email::SubscriberEmail;
pub use subscriber_name::SubscriberName;
