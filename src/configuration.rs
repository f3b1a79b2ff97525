use std::str::FromStr;
use std::time::Duration;

use config::{Config, ConfigError, File, FileFormat};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::backoff::BackoffPolicy;
use crate::domain::{DomainError, SubscriberEmail};
use crate::email_client::EmailClient;

#[derive(Clone, Deserialize, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub email_client: EmailClientSettings,
    pub mailer: MailerSettings,
    pub redis_uri: Secret<String>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub base_url: String,
    pub hmac_secret: Secret<String>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub require_ssl: bool,
    /// Full connection string, takes precedence over the individual fields.
    #[serde(default)]
    pub url: Option<Secret<String>>,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_retry_delay_milliseconds")]
    pub retry_delay_milliseconds: u64,
}

fn default_connect_retries() -> u32 {
    10
}

fn default_retry_delay_milliseconds() -> u64 {
    1000
}

impl DatabaseSettings {
    pub fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
    }

    pub fn with_db(&self) -> Result<PgConnectOptions, sqlx::Error> {
        match &self.url {
            Some(url) => parse_connection_string(url.expose_secret()),
            None => Ok(self.without_db().database(&self.database_name)),
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.connect_retries,
            delay: Duration::from_millis(self.retry_delay_milliseconds),
        }
    }
}

/// Accepts both `postgres://` URLs and libpq `key=value` strings.
fn parse_connection_string(dsn: &str) -> Result<PgConnectOptions, sqlx::Error> {
    if dsn.contains("://") {
        return PgConnectOptions::from_str(dsn);
    }

    let mut options = PgConnectOptions::new();
    for (key, value) in keyword_value_pairs(dsn).map_err(invalid_connection_string)? {
        options = match key.as_str() {
            "host" => options.host(&value),
            "port" => options.port(
                value
                    .parse()
                    .map_err(|_| invalid_connection_string(format!("invalid port {value:?}")))?,
            ),
            "user" => options.username(&value),
            "password" => options.password(&value),
            "dbname" => options.database(&value),
            "sslmode" => options.ssl_mode(value.parse::<PgSslMode>()?),
            "application_name" => options.application_name(&value),
            _ => {
                tracing::warn!(keyword = %key, "Ignoring unsupported connection string keyword");
                options
            }
        };
    }
    Ok(options)
}

fn invalid_connection_string(message: String) -> sqlx::Error {
    sqlx::Error::Configuration(format!("Invalid connection string: {message}").into())
}

/// Split `host=db port=5432 password='a b'` style input. Values may be
/// single-quoted, with `\` escaping the next character.
fn keyword_value_pairs(dsn: &str) -> Result<Vec<(String, String)>, String> {
    let mut pairs = Vec::new();
    let mut chars = dsn.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            return Ok(pairs);
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if key.is_empty() || chars.next() != Some('=') {
            return Err(format!("expected `keyword=value`, found {key:?}"));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\'') => break,
                    Some('\\') => match chars.next() {
                        Some(c) => value.push(c),
                        None => return Err(format!("dangling escape in the value of {key:?}")),
                    },
                    Some(c) => value.push(c),
                    None => return Err(format!("unterminated quote in the value of {key:?}")),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                value.push(c);
            }
        }
        pairs.push((key, value));
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    pub authorization_token: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

impl EmailClientSettings {
    pub fn sender(&self) -> Result<SubscriberEmail, DomainError> {
        SubscriberEmail::parse(&self.sender_email)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }

    pub fn client(&self) -> Result<EmailClient, anyhow::Error> {
        let sender = self.sender()?;
        EmailClient::new(
            self.base_url.clone(),
            sender,
            self.authorization_token.clone(),
            self.timeout(),
        )
    }
}

impl Settings {
    /// Session store URL. A bare `host:port` address is taken as plain
    /// `redis://`.
    pub fn redis_url(&self) -> Secret<String> {
        let address = self.redis_uri.expose_secret();
        if address.contains("://") {
            self.redis_uri.clone()
        } else {
            Secret::new(format!("redis://{address}"))
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct MailerSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub queue_capacity: usize,
}

#[derive(Debug)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local` or `production`."
            )),
        }
    }
}

/// Reads `configuration/base.yaml`, the file for `APP_ENVIRONMENT` and then
/// `APP_*` variables (`APP_DATABASE__PORT=5433` sets `database.port`).
///
/// `DSN` and `REDIS` are honoured last so the database connection string and
/// the session store address can come straight from the process environment.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| ConfigError::Foreign(Box::new(e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = Config::builder()
        .add_source(File::from(configuration_directory.join("base.yaml")).format(FileFormat::Yaml))
        .add_source(
            File::from(configuration_directory.join(environment_filename)).format(FileFormat::Yaml),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .set_override_option("database.url", std::env::var("DSN").ok())?
        .set_override_option("redis_uri", std::env::var("REDIS").ok())?
        .build()?;

    settings.try_deserialize::<Settings>()
}
