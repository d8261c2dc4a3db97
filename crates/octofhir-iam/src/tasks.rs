//! Background task handles.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::emergency::EmergencyAccessCoordinator;
use crate::{IamError, IamResult};

/// Handles for the engine's background tasks.
///
/// Dropping this without calling [`shutdown`](Self::shutdown) leaves the
/// tasks running until the runtime stops.
#[derive(Debug)]
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            handles: Vec::new(),
        }
    }

    pub(crate) fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "Spawning background task");
        self.handles.push((name, tokio::spawn(task)));
    }

    /// Token cancelled on shutdown.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Names of the running tasks.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    /// Number of spawned tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if nothing was spawned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancels every task and waits for them to finish.
    ///
    /// # Errors
    ///
    /// Returns `IamError::Internal` naming the first task that panicked.
    /// The remaining tasks are still awaited.
    pub async fn shutdown(self) -> IamResult<()> {
        self.cancel.cancel();
        let mut failure = None;
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Background task failed");
                failure.get_or_insert_with(|| {
                    IamError::internal(format!("background task '{name}' failed: {e}"))
                });
            }
        }
        info!("Background tasks stopped");
        failure.map_or(Ok(()), Err)
    }
}

/// Periodically removes expired emergency grants until cancelled.
pub async fn run_emergency_sweep(
    coordinator: Arc<EmergencyAccessCoordinator>,
    interval: Duration,
    purge_after: time::Duration,
    cancel: CancellationToken,
) {
    info!(
        interval_secs = interval.as_secs(),
        "Emergency access sweep started"
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Emergency access sweep shutting down");
                break;
            }
            _ = ticker.tick() => {
                let purged = coordinator.purge_expired(purge_after);
                if purged > 0 {
                    debug!(purged, "Emergency access sweep completed");
                }
            }
        }
    }
}
