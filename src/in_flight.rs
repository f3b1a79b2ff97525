use std::future::{Ready, ready};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use actix_web::{FromRequest, HttpRequest, dev::Payload, web};
use tokio::sync::Notify;

/// Counts units of work that must finish before the process may shut down.
#[derive(Clone, Default)]
pub struct WorkTracker {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    active: AtomicUsize,
    closed: AtomicBool,
    idle: Notify,
}

/// Registration held for as long as a unit of work runs. Dropping it
/// deregisters, whichever way the work ends.
#[must_use = "the work is deregistered as soon as the guard is dropped"]
#[derive(Debug)]
pub struct WorkGuard {
    inner: Arc<Inner>,
}

impl WorkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit of work, or `None` once [`WorkTracker::close`] has run.
    pub fn register(&self) -> Option<WorkGuard> {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        if self.inner.closed.load(Ordering::SeqCst) {
            release(&self.inner);
            return None;
        }
        Some(WorkGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Refuse any further registrations. Work already registered carries on.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Resolve once no unit of work is registered.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Enabled before the check so a release in between still wakes us.
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        release(&self.inner);
    }
}

fn release(inner: &Inner) {
    if inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
        inner.idle.notify_waiters();
    }
}

/// Extractor registering the current request as in-flight work.
///
/// Handlers that may enqueue mail take it as an argument; the request is
/// deregistered when the handler returns. Once shutdown has begun the
/// request is rejected with 503.
pub struct InFlight(#[allow(dead_code)] WorkGuard);

impl FromRequest for InFlight {
    type Error = actix_web::Error;
    type Future = Ready<Result<InFlight, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let guard = match req.app_data::<web::Data<WorkTracker>>() {
            Some(tracker) => tracker.register(),
            None => {
                return ready(Err(actix_web::error::ErrorInternalServerError(
                    "WorkTracker is not registered as app data",
                )));
            }
        };
        ready(
            guard
                .map(InFlight)
                .ok_or_else(|| actix_web::error::ErrorServiceUnavailable("Shutting down")),
        )
    }
}
