//! Periodic poll task shared by the watchdogs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Watchdog;

/// At most one running poll loop. Stopping cancels future ticks but lets an
/// in-flight check finish.
#[derive(Default)]
pub(crate) struct PollTask {
    cancel: Mutex<Option<CancellationToken>>,
}

impl PollTask {
    /// (Re)start polling `watchdog` every `period`. The loop holds only a weak
    /// reference and exits once the watchdog is dropped.
    pub fn start<W: Watchdog>(&self, watchdog: &Arc<W>, period: Duration) {
        let period = period.max(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        if let Some(previous) = self.slot().replace(cancel.clone()) {
            previous.cancel();
        }

        let name = watchdog.name();
        let weak = Arc::downgrade(watchdog);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            info!(watchdog = name, period_ms = period.as_millis() as u64, "watchdog polling started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(watchdog) = weak.upgrade() else {
                    break;
                };
                watchdog.check().await;
            }

            debug!(watchdog = name, "watchdog polling stopped");
        });
    }

    /// Cancel the loop. Returns whether one was running.
    pub fn stop(&self) -> bool {
        match self.slot().take() {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner())
    }
}
