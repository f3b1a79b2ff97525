use crate::domain::{DomainError, SubscriberEmail, SubscriberName};
use crate::routes::FormData;

pub struct NewSubscriber {
    pub name: SubscriberName,
    pub email: SubscriberEmail,
}

impl TryFrom<FormData> for NewSubscriber {
    type Error = DomainError;

    fn try_from(form: FormData) -> Result<NewSubscriber, Self::Error> {
        Ok(NewSubscriber {
            name: SubscriberName::parse(form.name)?,
            email: SubscriberEmail::parse(form.email)?,
        })
    }
}
