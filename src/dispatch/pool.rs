use super::{Dispatch, Rejected, Task};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// A fixed-size worker pool.
///
/// `ThreadPool` runs submitted tasks on a set of worker threads fed
/// from one shared queue. It exists so the selector has a concrete
/// dispatcher to hand callbacks to; it makes no fairness or ordering
/// promises beyond FIFO hand-off from the shared queue.
///
/// # Shutdown
///
/// [`shutdown`](Self::shutdown) stops the workers and joins them.
/// Tasks already queued are still executed; tasks submitted afterwards
/// are rejected. Dropping the pool shuts it down implicitly.
pub struct ThreadPool {
    /// State shared with the workers.
    inner: Arc<PoolInner>,

    /// Join handles of the worker threads.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct PoolInner {
    /// Pending tasks.
    queue: Mutex<VecDeque<Task>>,

    /// Signalled when a task is queued or shutdown begins.
    available: Condvar,

    /// Set once shutdown has started.
    shutdown: AtomicBool,
}

impl ThreadPool {
    /// Creates a pool with `threads` worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `threads == 0`.
    pub fn new(threads: usize) -> Self {
        assert!(threads > 0, "threads must be > 0");

        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(threads);

        for id in 0..threads {
            let inner = inner.clone();

            let handle = thread::Builder::new()
                .name(format!("sockmux-worker-{id}"))
                .spawn(move || worker_loop(&inner))
                .expect("failed to spawn pool worker");

            workers.push(handle);
        }

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Stops the workers and joins them.
    ///
    /// Idempotent. Queued tasks are drained before the workers exit.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        // Bridge the queue lock so the flag flip cannot slip between a
        // worker's empty-queue check and its wait.
        drop(self.inner.queue.lock().unwrap());
        self.inner.available.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Dispatch for ThreadPool {
    fn execute(&self, task: Task) -> Result<(), Rejected> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Rejected);
        }

        self.inner.queue.lock().unwrap().push_back(task);
        self.inner.available.notify_one();

        Ok(())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs tasks until shutdown is signalled and the queue is empty.
fn worker_loop(inner: &PoolInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock().unwrap();

            loop {
                if let Some(task) = queue.pop_front() {
                    break task;
                }

                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }

                queue = inner.available.wait(queue).unwrap();
            }
        };

        task();
    }
}

#[cfg(test)]
mod tests {
    use super::ThreadPool;
    use crate::dispatch::Dispatch;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn executes_submitted_tasks() {
        let pool = ThreadPool::new(2);
        let (tx, rx) = channel();

        for i in 0..8 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(i).unwrap())).unwrap();
        }

        let mut seen: Vec<i32> = (0..8)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort();

        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn shutdown_drains_queued_tasks_and_rejects_new_ones() {
        let pool = ThreadPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let counter = counter.clone();
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(pool.execute(Box::new(|| ())).is_err());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = ThreadPool::new(1);

        pool.shutdown();
        pool.shutdown();
    }
}
