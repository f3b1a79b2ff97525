use claims::assert_err;
use secrecy::Secret;
use subscriber_service::configuration::DatabaseSettings;
use subscriber_service::startup::connect_to_database;

#[tokio::test]
async fn unreachable_database_is_fatal_after_the_retry_budget() {
    let settings = DatabaseSettings {
        username: "postgres".into(),
        password: Secret::new("password".into()),
        // Nothing listens on the discard port.
        port: 9,
        host: "127.0.0.1".into(),
        database_name: "subscribers".into(),
        require_ssl: false,
        url: None,
        connect_retries: 1,
        retry_delay_milliseconds: 10,
    };

    let error = assert_err!(connect_to_database(&settings).await);
    assert!(format!("{error:?}").contains("Gave up connecting after 2 attempts"));
}
