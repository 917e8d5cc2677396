//! Background refresh of the timeout height attached to new transactions.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{
    cancel::{cancel_pair, CancelHandle, CancelSignal},
    error::Error,
};

/// Source of the latest block height.
pub(crate) type HeightSource =
    Box<dyn Fn(CancelSignal) -> BoxFuture<'static, Result<u64, Error>> + Send + Sync>;

/// Periodic task keeping the timeout height current.
///
/// Stopped by [TimeoutHeightTask::shutdown] or when dropped.
pub(crate) struct TimeoutHeightTask {
    cancel: CancelHandle,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutHeightTask {
    pub(crate) fn spawn(
        source: HeightSource,
        offset: u64,
        interval: Duration,
        current: Arc<AtomicU64>,
    ) -> Self {
        let (cancel, signal) = cancel_pair();
        let join = tokio::task::spawn(refresh_loop(source, offset, interval, current, signal));
        TimeoutHeightTask {
            cancel,
            join: Mutex::new(Some(join)),
        }
    }

    /// Stop the task and wait for it to exit.
    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();
        let join = self.join.lock().take();
        if let Some(join) = join {
            if let Err(e) = join.await {
                tracing::warn!("Timeout height task did not exit cleanly: {e}");
            }
        }
    }
}

impl Drop for TimeoutHeightTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn refresh_loop(
    source: HeightSource,
    offset: u64,
    interval: Duration,
    current: Arc<AtomicU64>,
    cancel: CancelSignal,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => (),
        }
        match source(cancel.clone()).await {
            Ok(height) => {
                let timeout_height = height + offset;
                current.store(timeout_height, Ordering::SeqCst);
                tracing::debug!("Timeout height set to {timeout_height}");
            }
            Err(Error::Cancelled { .. }) => break,
            Err(e) => tracing::error!("Unable to refresh timeout height: {e}"),
        }
    }
    tracing::debug!("Timeout height task stopped");
}
