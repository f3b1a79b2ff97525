use subscriber_service::configuration::get_configuration;
use subscriber_service::startup::Application;
use subscriber_service::telemetry::{get_subscriber, init_subscriber};

#[actix_web::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("subscriber_service".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    let configuration = get_configuration()?;
    let application = match Application::build(configuration).await {
        Ok(application) => application,
        Err(e) => {
            tracing::error!(error.cause_chain = ?e, "Failed to start the application");
            return Err(e);
        }
    };
    tracing::info!(port = application.port(), "Starting server");
    application.run_until_stopped().await?;
    std::process::exit(0)
}
