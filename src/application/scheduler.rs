//! Periodic background tasks.
//!
//! A task carries no scheduling logic of its own; [`spawn_periodic`] drives it on a fixed
//! interval until the returned handle is stopped.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// One idempotent pass. Errors are logged and the next tick runs as usual.
    async fn run_once(&self) -> Result<()>;
}

/// Handle to a running periodic task.
pub struct PeriodicHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PeriodicHandle {
    /// Signals the task to stop and waits for the current pass to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "Periodic task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Runs `task` every `every`, starting immediately.
pub fn spawn_periodic(task: Arc<dyn PeriodicTask>, every: Duration) -> PeriodicHandle {
    let (shutdown, mut stopped) = watch::channel(false);
    let join = tokio::spawn(async move {
        info!(task = task.name(), interval_ms = every.as_millis() as u64, "Periodic task started");
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = task.run_once().await {
                        warn!(task = task.name(), error = %e, "Periodic task run failed");
                    } else {
                        debug!(task = task.name(), "Periodic task run completed");
                    }
                }
                changed = stopped.changed() => {
                    if changed.is_err() || *stopped.borrow() {
                        break;
                    }
                }
            }
        }
        info!(task = task.name(), "Periodic task stopped");
    });

    PeriodicHandle { shutdown, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicTask for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn run_once(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_interval_until_stopped() {
        let counter = Arc::new(Counter::default());
        let handle = spawn_periodic(counter.clone(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(150)).await;
        // Ticks at 0s, 60s and 120s.
        assert_eq!(counter.runs.load(Ordering::SeqCst), 3);

        handle.stop().await;
        let after_stop = counter.runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), after_stop);
    }
}
