//! Deferred callback scheduling on the tokio runtime.
//!
//! The refresh engine retries failed refreshes after a backoff delay. A
//! [`ScheduledTask`] arms a callback to fire once after a delay and can be
//! cancelled or re-armed at any point, including after it has fired; the
//! refresh engine reuses one handle across consecutive failures so a retry
//! is rescheduled, never duplicated.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};

/// Arming state communicated to the timer task.
#[derive(Debug, Clone, Copy)]
enum Arm {
    /// No deadline pending.
    Idle,
    /// Fire once at the given instant.
    At(Instant),
}

/// A one-shot callback timer that can be cancelled and re-armed.
///
/// Dropping the handle cancels any pending deadline and stops the timer
/// task.
#[derive(Debug)]
pub(crate) struct ScheduledTask {
    arm: watch::Sender<Arm>,
}

impl ScheduledTask {
    /// Spawns the timer armed to fire `callback` after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(delay: Duration, callback: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (arm, mut watcher) = watch::channel(Arm::At(Instant::now() + delay));

        tokio::spawn(async move {
            loop {
                let armed = *watcher.borrow_and_update();
                match armed {
                    Arm::Idle => {
                        if watcher.changed().await.is_err() {
                            return;
                        }
                    }
                    Arm::At(deadline) => {
                        tokio::select! {
                            () = time::sleep_until(deadline) => {
                                callback();
                                // Disarmed until the holder re-arms.
                                if watcher.changed().await.is_err() {
                                    return;
                                }
                            }
                            changed = watcher.changed() => {
                                if changed.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        });

        Self { arm }
    }

    /// Re-arms the timer to fire after `delay` from now, replacing any
    /// pending deadline.
    pub fn reschedule(&self, delay: Duration) {
        let _ = self.arm.send(Arm::At(Instant::now() + delay));
    }

    /// Drops any pending deadline without firing.
    pub fn cancel(&self) {
        let _ = self.arm.send(Arm::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicU32>, impl Fn() + Send + 'static) {
        let count = Arc::new(AtomicU32::new(0));
        let fired = Arc::clone(&count);
        (count, move || {
            fired.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let (count, callback) = counter();
        let _task = ScheduledTask::schedule(Duration::from_millis(100), callback);

        time::sleep(Duration::from_millis(99)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // One-shot: no further firings without re-arming.
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (count, callback) = counter();
        let task = ScheduledTask::schedule(Duration::from_millis(100), callback);

        time::sleep(Duration::from_millis(50)).await;
        task.cancel();

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_deadline() {
        let (count, callback) = counter();
        let task = ScheduledTask::schedule(Duration::from_millis(100), callback);

        time::sleep(Duration::from_millis(50)).await;
        task.reschedule(Duration::from_millis(100));

        // The original deadline passes without firing.
        time::sleep(Duration::from_millis(70)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(40)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_after_firing() {
        let (count, callback) = counter();
        let task = ScheduledTask::schedule(Duration::from_millis(100), callback);

        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        task.reschedule(Duration::from_millis(50));
        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_after_cancel() {
        let (count, callback) = counter();
        let task = ScheduledTask::schedule(Duration::from_millis(100), callback);
        task.cancel();

        task.reschedule(Duration::from_millis(30));
        time::sleep(Duration::from_millis(40)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
