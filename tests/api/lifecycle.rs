use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use claims::{assert_none, assert_ok, assert_some};
use subscriber_service::mail_dispatcher::DispatcherState;

use crate::helpers::{RecordingTransport, TestDispatcher, mail, spawn_dispatcher};

#[tokio::test]
async fn queued_mail_goes_out_in_order_before_shutdown_completes() {
    let TestDispatcher {
        mailer,
        lifecycle,
        transport,
        ..
    } = spawn_dispatcher(RecordingTransport::slow(Duration::from_millis(10)));

    for subject in ["first", "second", "third"] {
        mailer.enqueue(mail(subject)).await;
    }
    lifecycle.shutdown_on(async { Ok("SIGTERM") }).await.unwrap();

    assert_eq!(transport.sent(), vec!["first", "second", "third"]);
    assert_eq!(mailer.state(), DispatcherState::Stopped);
}

#[tokio::test]
async fn shutdown_holds_until_registered_work_deregisters() {
    let TestDispatcher {
        mailer,
        tracker,
        lifecycle,
        transport,
    } = spawn_dispatcher(RecordingTransport::default());
    let guard = assert_some!(tracker.register());

    // The termination request is already there; the work is not done.
    let shutdown = tokio::spawn(lifecycle.shutdown_on(async { Ok("SIGINT") }));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!shutdown.is_finished());
    assert_eq!(mailer.state(), DispatcherState::Running);

    // Registered work can still use the mailer while shutdown waits on it.
    mailer.enqueue(mail("late but registered")).await;
    drop(guard);

    let outcome = tokio::time::timeout(Duration::from_secs(1), shutdown)
        .await
        .expect("Shutdown should finish once the work has deregistered")
        .unwrap();
    assert_ok!(outcome);
    assert_eq!(transport.sent(), vec!["late but registered"]);
    assert_none!(tracker.register());
}

#[tokio::test]
async fn work_registered_after_shutdown_began_is_refused() {
    let TestDispatcher {
        tracker, lifecycle, ..
    } = spawn_dispatcher(RecordingTransport::default());

    lifecycle.shutdown().await;

    assert!(tracker.is_closed());
    assert_none!(tracker.register());
    assert_eq!(tracker.active(), 0);
}

/// Producers racing shutdown: each either registers in time and gets its
/// mail delivered, or is refused and never touches the mailer.
fn no_write_after_close(delays: Vec<u8>, shutdown_after: u8) -> bool {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let TestDispatcher {
            mailer,
            tracker,
            lifecycle,
            transport,
        } = spawn_dispatcher(RecordingTransport::default());
        let admitted = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = delays
            .iter()
            .enumerate()
            .map(|(i, delay)| {
                let mailer = mailer.clone();
                let tracker = tracker.clone();
                let admitted = admitted.clone();
                let delay = Duration::from_micros(u64::from(*delay) * 20);
                tokio::spawn(async move {
                    tokio::time::sleep(delay / 2).await;
                    let Some(_guard) = tracker.register() else {
                        return;
                    };
                    admitted.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    mailer.enqueue(mail(i.to_string())).await;
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_micros(u64::from(shutdown_after) * 20)).await;
        lifecycle.shutdown().await;

        let mut clean = true;
        for producer in producers {
            clean &= producer.await.is_ok();
        }
        clean
            && tracker.active() == 0
            && transport.sent().len() == admitted.load(Ordering::SeqCst)
    })
}

#[quickcheck_macros::quickcheck]
fn shutdown_never_races_producers(delays: Vec<u8>, shutdown_after: u8) -> bool {
    no_write_after_close(delays, shutdown_after)
}
