//! Fixed pool of cooperative workers sharing one wake-up signal.
//!
//! Each worker repeatedly invokes the pool's task function. The function
//! reports whether there was work: `Continue` re-enters immediately, `Sleep`
//! parks the worker on the shared [`Notify`] until someone calls
//! [`WorkerPool::wake_all`]. An error exits that worker. The pool starts at
//! most once and accepts no new workers after start.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Outcome of one invocation of the pool's task function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    /// There may be more work; invoke again immediately.
    Continue,
    /// Nothing to do; park until woken.
    Sleep,
}

#[derive(Debug, Default)]
struct PoolShared {
    wakeup: Notify,
    closed: AtomicBool,
}

#[derive(Debug)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PoolShared::default()),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn `count` workers over `task`. Returns false when the pool has
    /// already been started or closed; a pool runs at most once.
    pub async fn start<F, Fut>(&self, count: usize, task: F) -> bool
    where
        F: Fn() -> Fut + Clone + Send + 'static,
        Fut: Future<Output = crate::Result<WorkerSignal>> + Send,
    {
        if self.started.swap(true, Ordering::SeqCst) || self.shared.closed.load(Ordering::SeqCst) {
            return false;
        }

        let mut handles = self.handles.lock().await;
        for index in 0..count {
            let shared = Arc::clone(&self.shared);
            let task = task.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    if shared.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    match task().await {
                        Ok(WorkerSignal::Continue) => {}
                        Ok(WorkerSignal::Sleep) => {
                            // Register interest before re-checking the closed
                            // flag so a close between the check and the await
                            // still wakes us.
                            let notified = shared.wakeup.notified();
                            if shared.closed.load(Ordering::SeqCst) {
                                break;
                            }
                            notified.await;
                        }
                        Err(err) => {
                            tracing::error!(worker = index, error = %err, "worker exiting on error");
                            break;
                        }
                    }
                }
                tracing::debug!(worker = index, "worker stopped");
            }));
        }
        true
    }

    /// Signal every sleeping worker once. Non-blocking; workers that are
    /// mid-task are unaffected.
    pub fn wake_all(&self) {
        self.shared.wakeup.notify_waiters();
    }

    /// Mark workers for exit, wake the sleepers, and wait for every worker to
    /// return.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_waiters();

        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "worker task panicked during close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn workers_drain_work_then_sleep() {
        let pool = WorkerPool::new();
        let remaining = Arc::new(AtomicUsize::new(5));
        let done = Arc::new(AtomicUsize::new(0));

        let remaining_clone = Arc::clone(&remaining);
        let done_clone = Arc::clone(&done);
        let started = pool
            .start(2, move || {
                let remaining = Arc::clone(&remaining_clone);
                let done = Arc::clone(&done_clone);
                async move {
                    if remaining
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok()
                    {
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(WorkerSignal::Continue)
                    } else {
                        Ok(WorkerSignal::Sleep)
                    }
                }
            })
            .await;
        assert!(started);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(done.load(Ordering::SeqCst), 5);

        pool.close().await;
    }

    #[tokio::test]
    async fn wake_all_resumes_sleeping_workers() {
        let pool = WorkerPool::new();
        let invocations = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&invocations);
        pool.start(1, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(WorkerSignal::Sleep)
            }
        })
        .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let before = invocations.load(Ordering::SeqCst);
        assert_eq!(before, 1);

        pool.wake_all();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), before + 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn close_terminates_sleepers_and_start_is_once() {
        let pool = WorkerPool::new();
        pool.start(3, || async { Ok(WorkerSignal::Sleep) }).await;

        // Close must return even though every worker is asleep.
        tokio::time::timeout(Duration::from_secs(1), pool.close())
            .await
            .expect("close should not hang");

        // A closed (or already started) pool refuses to start again.
        assert!(!pool.start(1, || async { Ok(WorkerSignal::Sleep) }).await);
    }

    #[tokio::test]
    async fn erroring_worker_exits_alone() {
        let pool = WorkerPool::new();
        let invocations = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&invocations);
        pool.start(1, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(crate::CoreError::Internal("boom".to_string()))
            }
        })
        .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        pool.close().await;
    }
}
