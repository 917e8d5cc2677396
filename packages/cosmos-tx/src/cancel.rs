//! Caller-controlled cancellation for long running operations.

use tokio::{sync::watch, time::Instant};

/// Signal checked by broadcasts and polling loops.
///
/// Cloning is cheap and every clone observes the same cancellation.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    recv: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Triggers the paired [CancelSignal].
///
/// Dropping the handle without calling [CancelHandle::cancel] leaves the signal
/// uncancelled.
#[derive(Debug)]
pub struct CancelHandle {
    send: watch::Sender<bool>,
}

/// Create a new connected handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (send, recv) = watch::channel(false);
    (
        CancelHandle { send },
        CancelSignal {
            recv: Some(recv),
            deadline: None,
        },
    )
}

impl CancelHandle {
    /// Cancel all operations observing the paired signal.
    pub fn cancel(&self) {
        self.send.send_replace(true);
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        CancelSignal::never()
    }
}

impl CancelSignal {
    /// A signal which is never cancelled.
    pub fn never() -> Self {
        CancelSignal {
            recv: None,
            deadline: None,
        }
    }

    /// Add a deadline. The earlier of any existing deadline and this one wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Add a deadline relative to now.
    pub fn with_timeout(self, timeout: std::time::Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Has cancellation been requested or the deadline passed?
    pub fn is_cancelled(&self) -> bool {
        let flagged = self.recv.as_ref().map_or(false, |recv| *recv.borrow());
        let expired = self
            .deadline
            .map_or(false, |deadline| Instant::now() >= deadline);
        flagged || expired
    }

    /// Resolves once cancelled. Never resolves for [CancelSignal::never].
    pub async fn cancelled(&self) {
        let flag = async {
            match self.recv.clone() {
                Some(mut recv) => {
                    if recv.wait_for(|cancelled| *cancelled).await.is_err() {
                        // Handle dropped without cancelling
                        futures::future::pending::<()>().await
                    }
                }
                None => futures::future::pending::<()>().await,
            }
        };
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = flag => (),
                    _ = tokio::time::sleep_until(deadline) => (),
                }
            }
            None => flag.await,
        }
    }
}
