//! # Worker Pool
//!
//! Background threads for parallel sub-tasks, with an adjustable limit on
//! how many jobs run at once.
//!
//! The frame loop owns one pool and hands it to the simulation hooks. Jobs
//! come from application code: the loop itself only moves the limit. Sync
//! and submission stay on the simulation thread.
//!
//! The limit is what [`add_worker`](WorkerPool::add_worker) and
//! [`remove_worker`](WorkerPool::remove_worker) move. The simulation thread
//! gives up its own slot at startup and borrows it back while it is blocked
//! in the frame handshake, so background jobs keep the cores busy while it
//! sleeps:
//!
//! ```text
//! startup:   remove_worker()         limit = N - 1   (sim thread is busy)
//! handshake: add_worker()            limit = N       (sim thread sleeps)
//!            fence.wait()
//!            remove_worker()         limit = N - 1
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::sync::Fence;

struct Job {
    run: Box<dyn FnOnce() + Send + 'static>,
    done: Arc<Fence>,
}

/// Pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerPoolStats {
    /// Jobs finished (including panicked ones).
    pub jobs_completed: u64,
    /// Jobs that panicked.
    pub jobs_panicked: u64,
    /// Highest number of jobs observed running at once.
    pub peak_active: usize,
}

#[derive(Debug)]
struct Slots {
    limit: usize,
    active: usize,
    stats: WorkerPoolStats,
}

#[derive(Debug)]
struct Shared {
    slots: Mutex<Slots>,
    freed: Condvar,
}

impl Shared {
    fn acquire(&self) {
        let mut slots = self.slots.lock();
        while slots.active >= slots.limit {
            self.freed.wait(&mut slots);
        }
        slots.active += 1;
        slots.stats.peak_active = slots.stats.peak_active.max(slots.active);
    }

    fn release(&self, panicked: bool) {
        let mut slots = self.slots.lock();
        slots.active -= 1;
        slots.stats.jobs_completed += 1;
        if panicked {
            slots.stats.jobs_panicked += 1;
        }
        self.freed.notify_one();
    }
}

/// Completion handle for a spawned job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    done: Arc<Fence>,
}

impl JobHandle {
    /// True once the job has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.is_signaled()
    }

    /// Blocks until the job has finished.
    pub fn wait(&self) {
        self.done.wait();
    }

    /// Waits up to `timeout`. Returns true if finished.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.done.wait_timeout(timeout)
    }
}

/// A fixed set of threads running queued jobs under a concurrency limit.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    receiver: Receiver<Job>,
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Starts a pool that runs up to `workers` jobs at once.
    ///
    /// # Errors
    ///
    /// [`CoreError::ThreadSpawn`] if a thread cannot be started.
    pub fn new(workers: usize) -> CoreResult<Self> {
        let (sender, receiver) = unbounded();
        let pool = Self {
            sender: Some(sender),
            receiver,
            shared: Arc::new(Shared {
                slots: Mutex::new(Slots {
                    limit: workers,
                    active: 0,
                    stats: WorkerPoolStats::default(),
                }),
                freed: Condvar::new(),
            }),
            threads: Mutex::new(Vec::new()),
        };
        for _ in 0..workers {
            pool.spawn_thread()?;
        }
        debug!(workers, "worker pool started");
        Ok(pool)
    }

    fn spawn_thread(&self) -> CoreResult<()> {
        let mut threads = self.threads.lock();
        let receiver = self.receiver.clone();
        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name(format!("worker-{}", threads.len()))
            .spawn(move || {
                for job in &receiver {
                    shared.acquire();
                    let panicked = catch_unwind(AssertUnwindSafe(job.run)).is_err();
                    if panicked {
                        warn!("worker job panicked");
                    }
                    shared.release(panicked);
                    job.done.signal();
                }
            })
            .map_err(|e| CoreError::ThreadSpawn(e.to_string()))?;
        threads.push(thread);
        Ok(())
    }

    /// Current concurrency limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.shared.slots.lock().limit
    }

    /// Jobs running right now.
    #[must_use]
    pub fn active(&self) -> usize {
        self.shared.slots.lock().active
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> WorkerPoolStats {
        self.shared.slots.lock().stats
    }

    /// Raises the concurrency limit by one, starting a thread if every
    /// existing thread is already allowed to run.
    ///
    /// # Errors
    ///
    /// [`CoreError::ThreadSpawn`].
    pub fn add_worker(&self) -> CoreResult<()> {
        let limit = {
            let mut slots = self.shared.slots.lock();
            slots.limit += 1;
            self.shared.freed.notify_one();
            slots.limit
        };
        if limit > self.threads.lock().len() {
            self.spawn_thread()?;
        }
        Ok(())
    }

    /// Lowers the concurrency limit by one. Running jobs are not
    /// interrupted; the limit applies to the next job picked up.
    pub fn remove_worker(&self) {
        let mut slots = self.shared.slots.lock();
        slots.limit = slots.limit.saturating_sub(1);
    }

    /// Queues a job.
    ///
    /// # Errors
    ///
    /// [`CoreError::CoreThreadGone`] if the pool is shutting down.
    pub fn spawn<F>(&self, job: F) -> CoreResult<JobHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let done = Arc::new(Fence::new());
        self.sender
            .as_ref()
            .ok_or(CoreError::CoreThreadGone)?
            .send(Job {
                run: Box::new(job),
                done: Arc::clone(&done),
            })
            .map_err(|_| CoreError::CoreThreadGone)?;
        Ok(JobHandle { done })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender = None;
        // Let queued jobs drain even if the limit was lowered to zero.
        {
            let mut slots = self.shared.slots.lock();
            slots.limit = slots.limit.max(1);
            self.shared.freed.notify_all();
        }
        for thread in self.threads.lock().drain(..) {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_jobs_run() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();
        for h in &handles {
            h.wait();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(pool.stats().jobs_completed, 8);
    }

    #[test]
    fn test_removed_worker_is_borrowed_back() {
        let pool = WorkerPool::new(1).unwrap();
        pool.remove_worker();
        assert_eq!(pool.limit(), 0);

        let job = pool.spawn(|| {}).unwrap();
        assert!(!job.wait_timeout(Duration::from_millis(30)), "no slot available");

        pool.add_worker().unwrap();
        job.wait();
        assert!(job.is_done());
        pool.remove_worker();
        assert_eq!(pool.limit(), 0);
    }

    #[test]
    fn test_add_worker_beyond_threads_spawns() {
        let pool = WorkerPool::new(1).unwrap();
        pool.add_worker().unwrap();
        assert_eq!(pool.limit(), 2);

        // Two jobs that wait on each other need two threads.
        let gate = Arc::new(Fence::new());
        let blocker = {
            let gate = Arc::clone(&gate);
            pool.spawn(move || gate.wait()).unwrap()
        };
        let opener = {
            let gate = Arc::clone(&gate);
            pool.spawn(move || gate.signal()).unwrap()
        };
        opener.wait();
        blocker.wait();
        assert_eq!(pool.stats().jobs_completed, 2);
    }

    #[test]
    fn test_panicking_job_is_contained() {
        let pool = WorkerPool::new(1).unwrap();
        let bad = pool.spawn(|| panic!("boom")).unwrap();
        bad.wait();
        let good = pool.spawn(|| {}).unwrap();
        good.wait();
        let stats = pool.stats();
        assert_eq!(stats.jobs_completed, 2);
        assert_eq!(stats.jobs_panicked, 1);
    }
}
