use std::time::Duration;

use subscriber_service::mail_dispatcher::DispatcherState;

use crate::helpers::{RecordingTransport, TestDispatcher, mail, spawn_dispatcher};

#[tokio::test]
async fn dispatcher_is_running_until_signalled() {
    let TestDispatcher {
        mailer, lifecycle, ..
    } = spawn_dispatcher(RecordingTransport::default());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(mailer.state(), DispatcherState::Running);

    lifecycle.shutdown().await;
    assert_eq!(mailer.state(), DispatcherState::Stopped);
}

#[tokio::test]
async fn many_producers_are_served_by_one_worker() {
    let TestDispatcher {
        mailer,
        tracker,
        lifecycle,
        transport,
    } = spawn_dispatcher(RecordingTransport::default());

    let producers: Vec<_> = (0..250)
        .map(|i| {
            let mailer = mailer.clone();
            let guard = tracker.register().unwrap();
            tokio::spawn(async move {
                let _guard = guard;
                mailer.enqueue(mail(i.to_string())).await;
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    lifecycle.shutdown().await;

    let mut sent: Vec<usize> = transport
        .sent()
        .iter()
        .map(|subject| subject.parse().unwrap())
        .collect();
    sent.sort_unstable();
    assert_eq!(sent, (0..250).collect::<Vec<_>>());
}

#[tokio::test]
async fn one_producer_sees_its_mail_in_order() {
    let TestDispatcher {
        mailer,
        lifecycle,
        transport,
        ..
    } = spawn_dispatcher(RecordingTransport::slow(Duration::from_millis(1)));

    let subjects: Vec<String> = (0..150).map(|i| format!("issue #{i}")).collect();
    for subject in &subjects {
        mailer.enqueue(mail(subject.clone())).await;
    }
    lifecycle.shutdown().await;

    assert_eq!(transport.sent(), subjects);
}
