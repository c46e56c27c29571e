use std::{future::Future, time::Duration};

use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Owns every background task of a race so teardown can stop all of them.
///
/// Tasks are raced against a child of the registry's cancellation token, so cancelling abandons
/// them at their next suspension point.
#[derive(Default)]
pub struct TaskRegistry {
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task`, handing it a token that fires when the registry shuts down.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = self.cancel.child_token();
        let fut = task(token.clone());
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => debug!(task = %task_name, "task cancelled"),
                _ = fut => debug!(task = %task_name, "task finished"),
            }
        });
        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Names of tasks that have not finished yet.
    pub fn running(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Cancels every task and waits up to `grace` for them to exit, aborting the rest.
    /// Returns how many tasks had to be aborted.
    pub async fn shutdown(&mut self, grace: Duration) -> usize {
        self.cancel.cancel();
        let deadline = Instant::now() + grace;
        let mut aborted = 0;
        for (name, mut handle) in self.tasks.drain(..) {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(task = %name, "task ignored cancellation, aborting");
                handle.abort();
                let _ = handle.await;
                aborted += 1;
            }
        }
        aborted
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.cancel.cancel();
        for (_, handle) in &self.tasks {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_looping_tasks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut registry = TaskRegistry::new();
        for i in 0..3 {
            let ticks = ticks.clone();
            registry.spawn(format!("ticker-{i}"), |_| async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            });
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(registry.running().len(), 3);

        let aborted = registry.shutdown(Duration::from_secs(1)).await;
        assert_eq!(aborted, 0);
        assert!(registry.is_empty());

        let seen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_bodies_are_dropped() {
        let mut registry = TaskRegistry::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        registry.spawn("observer", |token| async move {
            token.cancelled().await;
            let _ = tx.send(());
        });
        registry.shutdown(Duration::from_secs(1)).await;
        assert!(rx.await.is_err());
    }
}
