//! Per-user periodic sync trigger
//!
//! One background task per user session. Each tick calls the trigger it was
//! given; the trigger decides whether a pass actually starts (see
//! `state::sync_manager`). Ticks never wait for a pass to finish.

use flume::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Handle to a running scheduler task
pub struct SchedulerHandle {
    user_id: String,
    running: Arc<AtomicBool>,
    stop_tx: Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Spawn the poll loop for `user_id`. The first tick fires immediately.
    pub fn spawn<F>(user_id: &str, interval: Duration, trigger: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = flume::bounded(1);

        let task = tokio::spawn(run_poll_loop(
            user_id.to_string(),
            interval,
            running.clone(),
            stop_rx,
            trigger,
        ));

        Self {
            user_id: user_id.to_string(),
            running,
            stop_tx,
            task,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// Stop the loop and wait for the task to exit. A pass already started by
    /// the loop keeps running to completion.
    pub async fn stop(self) {
        info!("Stopping sync scheduler for user: {}", self.user_id);
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.try_send(());
        let _ = self.task.await;
    }
}

async fn run_poll_loop<F>(
    user_id: String,
    period: Duration,
    running: Arc<AtomicBool>,
    stop_rx: Receiver<()>,
    trigger: F,
) where
    F: Fn() + Send + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Starting sync scheduler for user: {} (interval: {:?})",
        user_id, period
    );

    let mut tick_count = 0u64;
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_rx.recv_async() => break,
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }

        tick_count += 1;
        debug!("Sync tick #{} for user: {}", tick_count, user_id);
        trigger();
    }

    info!(
        "Sync scheduler stopped for user: {} after {} ticks",
        user_id, tick_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = SchedulerHandle::spawn("u1", Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Immediate first tick, then one per interval
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(handle.is_running());

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }
}
