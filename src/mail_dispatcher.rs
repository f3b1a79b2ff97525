use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

use crate::domain::OutgoingMail;

/// Default number of requests the dispatch queue holds before `enqueue`
/// starts waiting.
pub const DISPATCH_CAPACITY: usize = 100;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Failed to reach the email API")]
    Request(#[source] reqwest::Error),
    #[error("The email API rejected the message with status {0}")]
    Rejected(reqwest::StatusCode),
}

/// Whatever actually puts a message on the wire.
#[async_trait]
pub trait MailTransport: Send + Sync + 'static {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    Stopping,
    Stopped,
}

/// Producer side of the dispatcher, cheap to clone into request handlers.
#[derive(Clone)]
pub struct Mailer {
    dispatch: mpsc::Sender<OutgoingMail>,
    errors: ErrorReporter,
    state: watch::Receiver<DispatcherState>,
}

/// Write end of the error channel.
#[derive(Clone)]
pub struct ErrorReporter(mpsc::UnboundedSender<TransportError>);

/// The single consumer. Spawn [`MailWorker::run`] once.
pub struct MailWorker<T> {
    transport: T,
    dispatch: mpsc::Receiver<OutgoingMail>,
    errors: mpsc::UnboundedReceiver<TransportError>,
    reporter: ErrorReporter,
    shutdown: oneshot::Receiver<()>,
    state: watch::Sender<DispatcherState>,
}

/// One-shot stop request for the worker loop.
pub struct ShutdownSignal {
    sender: Option<oneshot::Sender<()>>,
}

/// Channel ends handed back by a stopped worker so they can be closed.
pub struct MailerChannels {
    dispatch: mpsc::Receiver<OutgoingMail>,
    errors: mpsc::UnboundedReceiver<TransportError>,
}

/// Wire up the queue, the error channel and the shutdown signal around
/// `transport`.
pub fn mail_dispatcher<T: MailTransport>(
    transport: T,
    capacity: usize,
) -> (Mailer, MailWorker<T>, ShutdownSignal) {
    let (dispatch_tx, dispatch_rx) = mpsc::channel(capacity);
    let (errors_tx, errors_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (state_tx, state_rx) = watch::channel(DispatcherState::Running);
    let reporter = ErrorReporter(errors_tx);

    let mailer = Mailer {
        dispatch: dispatch_tx,
        errors: reporter.clone(),
        state: state_rx,
    };
    let worker = MailWorker {
        transport,
        dispatch: dispatch_rx,
        errors: errors_rx,
        reporter,
        shutdown: shutdown_rx,
        state: state_tx,
    };
    let signal = ShutdownSignal {
        sender: Some(shutdown_tx),
    };
    (mailer, worker, signal)
}

impl Mailer {
    /// Queue `mail` for delivery, waiting while the queue is full.
    ///
    /// # Panics
    ///
    /// If the dispatch channel has already been closed.
    pub async fn enqueue(&self, mail: OutgoingMail) {
        if self.dispatch.send(mail).await.is_err() {
            channel_misuse("dispatch");
        }
    }

    pub fn report_error(&self, error: TransportError) {
        self.errors.report(error);
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Resolve once the worker has reached `Stopped`.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        // An error means the worker is gone, which is as stopped as it gets.
        let _ = state
            .wait_for(|state| *state == DispatcherState::Stopped)
            .await;
    }
}

impl ErrorReporter {
    /// # Panics
    ///
    /// If the error channel has already been closed.
    pub fn report(&self, error: TransportError) {
        if self.0.send(error).is_err() {
            channel_misuse("error");
        }
    }
}

fn channel_misuse(channel: &str) -> ! {
    tracing::error!(channel, "Attempted to write to a closed mail channel");
    panic!("the {channel} channel was written to after it had been closed")
}

impl<T: MailTransport> MailWorker<T> {
    /// Worker loop.
    ///
    /// Mail and transport errors are serviced ahead of the shutdown signal,
    /// so the backlog is drained before stop is honoured. Once the signal
    /// wins the loop exits without waiting for more.
    pub async fn run(mut self) -> MailerChannels {
        tracing::info!("Mail dispatcher running");
        loop {
            tokio::select! {
                biased;
                Some(mail) = self.dispatch.recv() => self.deliver(mail).await,
                Some(error) = self.errors.recv() => {
                    tracing::error!(
                        error.cause_chain = ?error,
                        error.message = %error,
                        "Failed to send an email. Dropping it"
                    );
                }
                _ = &mut self.shutdown => {
                    self.state.send_replace(DispatcherState::Stopping);
                    tracing::info!("Mail dispatcher stopping");
                    break;
                }
            }
        }
        self.state.send_replace(DispatcherState::Stopped);
        tracing::info!("Mail dispatcher stopped");
        MailerChannels {
            dispatch: self.dispatch,
            errors: self.errors,
        }
    }

    #[tracing::instrument(
        name = "Dispatch email",
        skip_all,
        fields(recipients = mail.recipients().len(), subject = %mail.subject())
    )]
    async fn deliver(&self, mail: OutgoingMail) {
        if let Err(e) = self.transport.send(&mail).await {
            self.reporter.report(e);
        }
    }
}

impl ShutdownSignal {
    /// Fire the signal. Only the first call has any effect; it returns
    /// whether this call was the one that fired.
    pub fn fire(&mut self) -> bool {
        match self.sender.take() {
            Some(sender) => {
                // The worker may already be gone, in which case there is
                // nobody left to stop.
                let _ = sender.send(());
                true
            }
            None => false,
        }
    }

    pub fn is_fired(&self) -> bool {
        self.sender.is_none()
    }

    /// Drop the signal's conduit.
    pub fn close(self) {
        drop(self);
    }
}

impl MailerChannels {
    /// Close the dispatch queue. Anything still buffered is discarded.
    pub fn close_dispatch(&mut self) {
        self.dispatch.close();
        let mut dropped = 0usize;
        while self.dispatch.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(dropped, "Discarded queued emails at shutdown");
        }
    }

    pub fn close_errors(&mut self) {
        self.errors.close();
        while let Ok(error) = self.errors.try_recv() {
            tracing::error!(
                error.cause_chain = ?error,
                "Failed to send an email. Dropping it"
            );
        }
    }
}
