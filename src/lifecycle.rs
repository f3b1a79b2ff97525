//! Process shutdown.
//!
//! Teardown runs in one fixed order: refuse and drain in-flight work, stop
//! the mail worker, then close the dispatch queue, the error channel and the
//! signal conduit. No producer can be left writing to a closed channel
//! because every producer is registered in-flight work and the worker is
//! joined before anything is closed.

use std::future::Future;

use tokio::task::JoinHandle;

use crate::in_flight::WorkTracker;
use crate::mail_dispatcher::{MailerChannels, ShutdownSignal};

pub struct Lifecycle {
    tracker: WorkTracker,
    signal: ShutdownSignal,
    worker: JoinHandle<MailerChannels>,
}

impl Lifecycle {
    pub fn new(
        tracker: WorkTracker,
        signal: ShutdownSignal,
        worker: JoinHandle<MailerChannels>,
    ) -> Self {
        Self {
            tracker,
            signal,
            worker,
        }
    }

    /// Wait for SIGINT or SIGTERM, then shut down.
    pub async fn run_until_terminated(self) -> Result<(), std::io::Error> {
        self.shutdown_on(await_termination()).await
    }

    /// Shut down once `termination` resolves. The binary passes the OS
    /// signal listener; anything else that decides when to stop works too.
    pub async fn shutdown_on<F>(self, termination: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = Result<&'static str, std::io::Error>>,
    {
        let signal = termination.await?;
        tracing::info!(signal, "Received termination request");
        self.shutdown().await;
        Ok(())
    }

    #[tracing::instrument(name = "Shutdown", skip_all)]
    pub async fn shutdown(self) {
        let Self {
            tracker,
            mut signal,
            worker,
        } = self;

        tracing::info!("Performing cleanup");

        tracker.close();
        tracing::info!(in_flight = tracker.active(), "Waiting for in-flight work");
        tracker.wait_until_idle().await;

        signal.fire();
        let channels = match worker.await {
            Ok(channels) => Some(channels),
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "Mail dispatcher did not stop cleanly"
                );
                None
            }
        };

        tracing::info!("Closing channels and shutting down application");
        if let Some(mut channels) = channels {
            channels.close_dispatch();
            channels.close_errors();
        }
        signal.close();
    }
}

/// Resolve with the signal's name once the host asks the process to stop.
#[cfg(unix)]
pub async fn await_termination() -> Result<&'static str, std::io::Error> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    Ok(tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
pub async fn await_termination() -> Result<&'static str, std::io::Error> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}

#[cfg(test)]
mod tests {
    use super::Lifecycle;
    use crate::domain::{OutgoingMail, SubscriberEmail};
    use crate::in_flight::WorkTracker;
    use crate::mail_dispatcher::{
        DispatcherState, MailTransport, TransportError, mail_dispatcher,
    };
    use async_trait::async_trait;
    use claims::{assert_none, assert_ok, assert_some};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingTransport {
        subjects: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
            self.subjects.lock().unwrap().push(mail.subject().to_owned());
            Ok(())
        }
    }

    fn mail(subject: &str) -> OutgoingMail {
        let recipient = SubscriberEmail::parse("ursula@domain.com").unwrap();
        OutgoingMail::new(recipient, subject, "<p>body</p>", "body")
    }

    #[tokio::test]
    async fn queued_mail_is_sent_before_shutdown_completes() {
        let transport = RecordingTransport::default();
        let tracker = WorkTracker::new();
        let (mailer, worker, signal) = mail_dispatcher(transport.clone(), 100);
        let lifecycle = Lifecycle::new(tracker, signal, tokio::spawn(worker.run()));

        for subject in ["one", "two", "three"] {
            mailer.enqueue(mail(subject)).await;
        }
        lifecycle.shutdown().await;

        assert_eq!(*transport.subjects.lock().unwrap(), vec!["one", "two", "three"]);
        assert_eq!(mailer.state(), DispatcherState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_waits_for_registered_work() {
        let tracker = WorkTracker::new();
        let (mailer, worker, signal) = mail_dispatcher(RecordingTransport::default(), 100);
        let lifecycle = Lifecycle::new(tracker.clone(), signal, tokio::spawn(worker.run()));
        let guard = assert_some!(tracker.register());

        let shutdown = tokio::spawn(lifecycle.shutdown_on(async { Ok("SIGTERM") }));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!shutdown.is_finished());
        assert_eq!(mailer.state(), DispatcherState::Running);
        assert_none!(tracker.register());

        drop(guard);
        let outcome = tokio::time::timeout(Duration::from_secs(1), shutdown)
            .await
            .expect("Shutdown should complete once the work is done")
            .unwrap();
        assert_ok!(outcome);
        assert_eq!(mailer.state(), DispatcherState::Stopped);
    }

    #[tokio::test]
    async fn failed_termination_listener_does_not_shut_down() {
        let tracker = WorkTracker::new();
        let (_mailer, worker, signal) = mail_dispatcher(RecordingTransport::default(), 100);
        let lifecycle = Lifecycle::new(tracker.clone(), signal, tokio::spawn(worker.run()));

        let outcome = lifecycle
            .shutdown_on(async { Err(std::io::Error::other("no signal handler")) })
            .await;

        assert!(outcome.is_err());
        assert!(!tracker.is_closed());
    }

    #[tokio::test]
    async fn shutdown_survives_a_panicked_worker() {
        struct PanickingTransport;

        #[async_trait]
        impl MailTransport for PanickingTransport {
            async fn send(&self, _mail: &OutgoingMail) -> Result<(), TransportError> {
                panic!("transport blew up");
            }
        }

        let (mailer, worker, signal) = mail_dispatcher(PanickingTransport, 100);
        let lifecycle = Lifecycle::new(WorkTracker::new(), signal, tokio::spawn(worker.run()));
        mailer.enqueue(mail("boom")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), lifecycle.shutdown())
            .await
            .expect("Shutdown should not hang on a dead worker");
    }
}
