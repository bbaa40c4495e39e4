//! Periodic cleanup task.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::{FloodgateError, Result};

/// Handle to a running sweep task.
///
/// The task stops when [`Sweeper::stop`] is awaited or the handle is
/// dropped, whichever comes first.
pub(crate) struct Sweeper {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn `sweep` every `interval` on the current tokio runtime.
    ///
    /// The first sweep runs one full interval after spawning.
    pub(crate) fn spawn<F>(interval: Duration, sweep: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        if interval.is_zero() {
            return Err(FloodgateError::Config(
                "cleanup interval must be positive".to_string(),
            ));
        }
        let runtime = Handle::try_current()
            .map_err(|e| FloodgateError::Runtime(format!("no tokio runtime for cleanup task: {}", e)))?;

        let (shutdown, mut stopped) = oneshot::channel::<()>();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep(),
                    _ = &mut stopped => break,
                }
            }
            debug!("Cleanup task exiting");
        });

        info!(interval_ms = interval.as_millis() as u64, "Cleanup task started");
        Ok(Self {
            shutdown: Some(shutdown),
            handle,
        })
    }

    /// Signal the task and wait for it to exit.
    pub(crate) async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.handle).await;
        info!("Cleanup task stopped");
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
