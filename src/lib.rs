pub mod backoff;
pub mod configuration;
pub mod domain;
pub mod email_client;
pub mod in_flight;
pub mod lifecycle;
pub mod mail_dispatcher;
pub mod routes;
pub mod startup;
pub mod telemetry;
