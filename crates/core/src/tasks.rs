//! A small task group for blocking lookup workers.
//!
//! Workers run on tokio's blocking pool inside a `JoinSet`. The owner waits
//! with a bounded poll interval and stops waiting as soon as the cancellation
//! token fires. Workers still running at that point are left to finish on
//! their own.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How waiting on a group ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Every spawned task finished.
    Completed,
    /// Cancellation was seen before all tasks finished.
    Aborted,
}

pub struct TaskGroup {
    name: &'static str,
    set: JoinSet<()>,
    spawned: usize,
    finished: usize,
}

impl TaskGroup {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            set: JoinSet::new(),
            spawned: 0,
            finished: 0,
        }
    }

    /// Start `f` on the blocking pool. Must be called from within a runtime.
    pub fn spawn_blocking<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.set.spawn_blocking(f);
        self.spawned += 1;
    }

    pub fn spawned(&self) -> usize {
        self.spawned
    }

    pub fn finished(&self) -> usize {
        self.finished
    }

    /// Wait for all tasks, checking `cancel` at least every `poll`. A task
    /// that panicked counts as finished.
    pub async fn wait(&mut self, cancel: &CancellationToken, poll: Duration) -> WaitStatus {
        loop {
            if cancel.is_cancelled() {
                return WaitStatus::Aborted;
            }
            match tokio::time::timeout(poll, self.set.join_next()).await {
                Ok(Some(Ok(()))) => self.finished += 1,
                Ok(Some(Err(e))) => {
                    tracing::error!("{} task failed: {}", self.name, e);
                    self.finished += 1;
                }
                Ok(None) => return WaitStatus::Completed,
                Err(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[tokio::test]
    async fn waits_for_all_tasks() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::new("test");
        for i in 0..4 {
            let count = count.clone();
            group.spawn_blocking(move || {
                thread::sleep(Duration::from_millis(10 * i));
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        let status = group.wait(&CancellationToken::new(), Duration::from_millis(5)).await;
        assert_eq!(status, WaitStatus::Completed);
        assert_eq!(group.spawned(), 4);
        assert_eq!(group.finished(), 4);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn panicking_task_still_finishes() {
        let mut group = TaskGroup::new("test");
        group.spawn_blocking(|| panic!("worker failed"));
        group.spawn_blocking(|| {});
        let status = group.wait(&CancellationToken::new(), Duration::from_millis(5)).await;
        assert_eq!(status, WaitStatus::Completed);
        assert_eq!(group.finished(), 2);
    }

    #[tokio::test]
    async fn empty_group_completes() {
        let mut group = TaskGroup::new("test");
        let status = group.wait(&CancellationToken::new(), Duration::from_millis(5)).await;
        assert_eq!(status, WaitStatus::Completed);
        assert_eq!(group.finished(), 0);
    }

    #[test]
    fn cancel_stops_waiting_early() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let (status, spawned, finished) = rt.block_on(async {
            let mut group = TaskGroup::new("test");
            group.spawn_blocking(|| thread::sleep(Duration::from_secs(5)));
            let trigger = cancel.clone();
            group.spawn_blocking(move || trigger.cancel());
            let status = group.wait(&cancel, Duration::from_millis(10)).await;
            (status, group.spawned(), group.finished())
        });
        rt.shutdown_background();

        assert_eq!(status, WaitStatus::Aborted);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(finished < spawned);
    }
}
