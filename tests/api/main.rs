mod backoff;
mod helpers;
mod lifecycle;
mod mail_dispatcher;
