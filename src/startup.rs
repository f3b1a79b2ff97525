use std::net::TcpListener;
use std::time::Duration;

use actix_session::SessionMiddleware;
use actix_session::config::PersistentSession;
use actix_session::storage::{RedisSessionStore, SessionStore};
use actix_web::cookie::{Key, SameSite};
use actix_web::dev::Server;
use actix_web::{App, HttpServer, web};
use anyhow::Context;
use secrecy::{ExposeSecret, Secret};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgPool};
use tracing_actix_web::TracingLogger;

use crate::backoff::connect_with_backoff;
use crate::configuration::{DatabaseSettings, Settings};
use crate::in_flight::WorkTracker;
use crate::lifecycle::Lifecycle;
use crate::mail_dispatcher::{MailTransport, Mailer, mail_dispatcher};
use crate::routes::{confirm, health_check, subscribe};

pub struct ApplicationBaseUrl(pub String);

pub struct Application {
    port: u16,
    server: Server,
    lifecycle: Lifecycle,
}

impl Application {
    pub async fn build(configuration: Settings) -> Result<Self, anyhow::Error> {
        let db_pool = connect_to_database(&configuration.database).await?;
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        let email_client = configuration.email_client.client()?;
        Self::build_with_transport(configuration, db_pool, email_client).await
    }

    /// Assemble the service around an already connected pool and any mail
    /// transport.
    pub async fn build_with_transport<T: MailTransport>(
        configuration: Settings,
        db_pool: PgPool,
        transport: T,
    ) -> Result<Self, anyhow::Error> {
        let address = format!(
            "{}:{}",
            configuration.application.host, configuration.application.port
        );
        let listener = TcpListener::bind(&address)
            .with_context(|| format!("Failed to bind to {address}"))?;
        let port = listener.local_addr()?.port();

        let tracker = WorkTracker::new();
        let (mailer, worker, signal) =
            mail_dispatcher(transport, configuration.mailer.queue_capacity);
        let worker = tokio::spawn(worker.run());
        let lifecycle = Lifecycle::new(tracker.clone(), signal, worker);

        let redis_url = configuration.redis_url();
        let server = run(
            listener,
            db_pool,
            mailer,
            tracker,
            configuration.application.base_url,
            configuration.application.hmac_secret,
            redis_url,
        )
        .await?;

        Ok(Self {
            port,
            server,
            lifecycle,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until the lifecycle coordinator has finished shutting down,
    /// then stop the HTTP server.
    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        let server_handle = self.server.handle();
        let server_task = tokio::spawn(self.server);
        let lifecycle_task = tokio::spawn(self.lifecycle.run_until_terminated());

        tokio::select! {
            outcome = server_task => {
                outcome
                    .context("HTTP server task failed")?
                    .context("HTTP server stopped unexpectedly")?;
                anyhow::bail!("HTTP server stopped before a termination request")
            }
            outcome = lifecycle_task => {
                outcome
                    .context("Lifecycle task failed")?
                    .context("Failed to listen for termination signals")?;
                server_handle.stop(false).await;
                tracing::info!("Shutting down");
                Ok(())
            }
        }
    }
}

/// Open the database, retrying with the configured backoff. A failure here
/// is fatal to startup.
pub async fn connect_to_database(configuration: &DatabaseSettings) -> Result<PgPool, anyhow::Error> {
    let options = configuration
        .with_db()
        .context("Invalid database connection settings")?;
    let pool = connect_with_backoff(configuration.backoff(), || open_database(options.clone()))
        .await
        .context("Could not connect to the database")?;
    Ok(pool)
}

async fn open_database(options: PgConnectOptions) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .acquire_timeout(Duration::from_secs(2))
        .connect_with(options)
        .await?;
    let mut connection = pool.acquire().await?;
    connection.ping().await?;
    Ok(pool)
}

async fn run(
    listener: TcpListener,
    db_pool: PgPool,
    mailer: Mailer,
    tracker: WorkTracker,
    base_url: String,
    hmac_secret: Secret<String>,
    redis_url: Secret<String>,
) -> Result<Server, anyhow::Error> {
    let db_pool = web::Data::new(db_pool);
    let mailer = web::Data::new(mailer);
    let tracker = web::Data::new(tracker);
    let base_url = web::Data::new(ApplicationBaseUrl(base_url));
    let secret_key = Key::try_from(hmac_secret.expose_secret().as_bytes())
        .map_err(|e| anyhow::anyhow!("The HMAC secret cannot be used as a cookie key: {e:?}"))?;
    let redis_store = RedisSessionStore::new(redis_url.expose_secret())
        .await
        .context("Failed to connect to the session store")?;

    let server = HttpServer::new(move || {
        App::new()
            .wrap(session_middleware(redis_store.clone(), secret_key.clone()))
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .route("/subscriptions", web::post().to(subscribe))
            .route("/subscriptions/confirm", web::get().to(confirm))
            .app_data(db_pool.clone())
            .app_data(mailer.clone())
            .app_data(tracker.clone())
            .app_data(base_url.clone())
    })
    // Termination signals belong to the lifecycle coordinator.
    .disable_signals()
    .listen(listener)?
    .run();
    Ok(server)
}

/// Sessions outlive the browser for a day; the cookie is only sent over
/// HTTPS and on same-site navigation.
fn session_middleware<S: SessionStore>(store: S, key: Key) -> SessionMiddleware<S> {
    SessionMiddleware::builder(store, key)
        .session_lifecycle(
            PersistentSession::default().session_ttl(actix_web::cookie::time::Duration::hours(24)),
        )
        .cookie_secure(true)
        .cookie_same_site(SameSite::Lax)
        .build()
}
