//! Single-consumer delivery context for listener and callback notifications
//!
//! Fetch workers never call listeners directly. They post a closure here and
//! one task runs the closures in order, so subscriber code never sees two
//! notifications at once.

use std::panic::{AssertUnwindSafe, catch_unwind};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Delivery = Box<dyn FnOnce() + Send + 'static>;

/// Sender side of the delivery context. Cheap to clone.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl DeliveryQueue {
    /// Spawn the delivery loop on the current runtime.
    ///
    /// The loop ends once every `DeliveryQueue` clone has been dropped and the
    /// backlog is drained.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::run(rx));
        (Self { tx }, handle)
    }

    async fn run(mut rx: mpsc::UnboundedReceiver<Delivery>) {
        debug!("Delivery loop started");
        while let Some(job) = rx.recv().await {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                warn!("Delivery job panicked; continuing with the next one");
            }
        }
        debug!("Delivery loop finished");
    }

    /// Queue `job` behind everything already posted. Returns false if the loop is gone.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(job)).is_ok()
    }

    /// Wait until everything posted before this call has run
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.post(move || {
            let _ = done_tx.send(());
        }) {
            let _ = done_rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
