use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use subscriber_service::domain::{OutgoingMail, SubscriberEmail};
use subscriber_service::in_flight::WorkTracker;
use subscriber_service::lifecycle::Lifecycle;
use subscriber_service::mail_dispatcher::{
    DISPATCH_CAPACITY, MailTransport, Mailer, TransportError, mail_dispatcher,
};
use subscriber_service::telemetry::{get_subscriber, init_subscriber};

static TRACING: LazyLock<()> = LazyLock::new(|| {
    let default_filter_level = "info".to_string();
    let subscriber_name = "test".to_string();

    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::stdout);
        init_subscriber(subscriber);
    } else {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::sink);
        init_subscriber(subscriber);
    };
});

/// Transport that records every subject it is asked to send, optionally
/// taking its time about it.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

impl RecordingTransport {
    pub fn slow(delay: Duration) -> Self {
        Self {
            sent: Arc::default(),
            delay,
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.sent.lock().unwrap().push(mail.subject().to_owned());
        Ok(())
    }
}

pub struct TestDispatcher {
    pub mailer: Mailer,
    pub tracker: WorkTracker,
    pub lifecycle: Lifecycle,
    pub transport: RecordingTransport,
}

pub fn spawn_dispatcher(transport: RecordingTransport) -> TestDispatcher {
    LazyLock::force(&TRACING);

    let tracker = WorkTracker::new();
    let (mailer, worker, signal) = mail_dispatcher(transport.clone(), DISPATCH_CAPACITY);
    let lifecycle = Lifecycle::new(tracker.clone(), signal, tokio::spawn(worker.run()));
    TestDispatcher {
        mailer,
        tracker,
        lifecycle,
        transport,
    }
}

pub fn mail(subject: impl Into<String>) -> OutgoingMail {
    let recipient = SubscriberEmail::parse("ursula_le_guin@gmail.com").unwrap();
    OutgoingMail::new(recipient, subject, "<p>Hello</p>", "Hello")
}
