//! Periodic reclaiming of dialogues whose queues were deleted externally,
//! e.g. by broker-side TTL expiry.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::manager::SessionManager;

/// Periodic liveness check of every active dialogue
pub struct HealthMonitor {
    interval: Duration,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl HealthMonitor {
    /// Monitor ticking every `interval`; nothing runs until [`start`](Self::start).
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Time between two passes
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the monitoring loop. A loop already running is replaced.
    pub fn start(&self, manager: Weak<SessionManager>) {
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    debug!("Session manager dropped, stopping health monitor");
                    return;
                };

                let closed = manager.check_dialogues().await;
                trace!(closed, active = manager.active_count(), "Health check pass complete");
            }
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Whether the background task is alive
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Abort the background task. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            debug!("Health monitor stopped");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
