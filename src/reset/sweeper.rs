use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use super::codes::VerificationCodeStore;

/// How often expired codes are swept out of memory.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Handle to the running sweep task. `stop` is called during graceful
/// shutdown; dropping the handle instead leaves the task running until the
/// runtime exits.
pub struct SweeperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// Spawn the background sweep for `store`, ticking every `period`.
pub fn spawn(store: Arc<VerificationCodeStore>, period: Duration) -> SweeperHandle {
    let (shutdown, mut rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // an interval's first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = &mut rx => break,
                _ = ticker.tick() => {
                    let removed = store.sweep();
                    if removed > 0 {
                        debug!(removed, "swept expired reset codes");
                    }
                }
            }
        }
        debug!("reset code sweeper stopped");
    });
    SweeperHandle { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reset::codes::VerifyError;
    use time::{Duration as TimeDuration, OffsetDateTime};

    #[tokio::test]
    async fn sweeps_expired_entries_in_background() {
        let store = Arc::new(VerificationCodeStore::new());
        store.save_at(
            "old@b.com",
            "111111",
            OffsetDateTime::now_utc() - TimeDuration::minutes(30),
        );
        store.save("fresh@b.com", "222222");

        let handle = spawn(Arc::clone(&store), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;

        assert_eq!(
            store.verify("old@b.com", "111111"),
            Err(VerifyError::NotFound)
        );
        assert_eq!(store.verify("fresh@b.com", "222222"), Ok(()));
    }

    #[tokio::test]
    async fn stop_terminates_a_long_period_task() {
        let store = Arc::new(VerificationCodeStore::new());
        let handle = spawn(store, Duration::from_secs(3600));
        handle.stop().await;
    }
}
